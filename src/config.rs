//! Runtime configuration for the intake orchestrator.
//!
//! Settings come from `intake.toml` in the project directory when present,
//! with environment variables (`CLAUDE_CMD`, `INTAKE_STORAGE_URL`) taking
//! precedence, and built-in defaults underneath. Every section in the file
//! is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::retry::RetryPolicy;

pub const DEFAULT_PORT: u16 = 4117;
/// Bounded wait applied to the request layer's question waits; the worker
/// itself never times out.
pub const DEFAULT_ANSWER_TIMEOUT_SECS: u64 = 300;

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub claude_cmd: String,
    pub reports_dir: PathBuf,
    pub transcript_dir: PathBuf,
    pub answer_timeout: Duration,
    pub retry: RetryPolicy,
    pub storage_url: Option<String>,
}

// ── intake.toml shape ─────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    server: Option<ServerSection>,
    engine: Option<EngineSection>,
    retry: Option<RetrySection>,
    reports: Option<ReportsSection>,
    storage: Option<StorageSection>,
}

#[derive(Debug, Deserialize)]
struct ServerSection {
    bind: Option<String>,
    port: Option<u16>,
    answer_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct EngineSection {
    claude_cmd: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RetrySection {
    max_attempts: Option<u32>,
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    jitter: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ReportsSection {
    dir: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StorageSection {
    url: Option<String>,
}

impl Config {
    /// Load configuration for `project_dir`, reading `intake.toml` if it
    /// exists and applying env overrides.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let config_path = project_dir.join("intake.toml");
        let file = if config_path.exists() {
            let raw = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            toml::from_str(&raw)
                .with_context(|| format!("Failed to parse {}", config_path.display()))?
        } else {
            FileConfig::default()
        };

        Ok(Self::from_sources(
            project_dir,
            file,
            std::env::var("CLAUDE_CMD").ok(),
            std::env::var("INTAKE_STORAGE_URL").ok(),
        ))
    }

    fn from_sources(
        project_dir: &Path,
        file: FileConfig,
        env_claude_cmd: Option<String>,
        env_storage_url: Option<String>,
    ) -> Self {
        let server = file.server;
        let retry_defaults = RetryPolicy::default();
        let retry_section = file.retry;

        let retry = RetryPolicy {
            max_attempts: retry_section
                .as_ref()
                .and_then(|r| r.max_attempts)
                .unwrap_or(retry_defaults.max_attempts),
            base_delay: retry_section
                .as_ref()
                .and_then(|r| r.base_delay_ms)
                .map(Duration::from_millis)
                .unwrap_or(retry_defaults.base_delay),
            max_delay: retry_section
                .as_ref()
                .and_then(|r| r.max_delay_ms)
                .map(Duration::from_millis)
                .unwrap_or(retry_defaults.max_delay),
            jitter: retry_section
                .as_ref()
                .and_then(|r| r.jitter)
                .unwrap_or(retry_defaults.jitter),
        };

        let reports_dir = file
            .reports
            .and_then(|r| r.dir)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("reports"));
        let reports_dir = if reports_dir.is_absolute() {
            reports_dir
        } else {
            project_dir.join(reports_dir)
        };

        Self {
            bind: server
                .as_ref()
                .and_then(|s| s.bind.clone())
                .unwrap_or_else(|| "127.0.0.1".to_string()),
            port: server.as_ref().and_then(|s| s.port).unwrap_or(DEFAULT_PORT),
            claude_cmd: env_claude_cmd
                .or(file.engine.and_then(|e| e.claude_cmd))
                .unwrap_or_else(|| "claude".to_string()),
            transcript_dir: project_dir.join(".intake").join("transcripts"),
            reports_dir,
            answer_timeout: Duration::from_secs(
                server
                    .as_ref()
                    .and_then(|s| s.answer_timeout_secs)
                    .unwrap_or(DEFAULT_ANSWER_TIMEOUT_SECS),
            ),
            retry,
            storage_url: env_storage_url.or(file.storage.and_then(|s| s.url)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let config = Config::from_sources(Path::new("/proj"), FileConfig::default(), None, None);
        assert_eq!(config.bind, "127.0.0.1");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.claude_cmd, "claude");
        assert_eq!(config.answer_timeout, Duration::from_secs(300));
        assert_eq!(config.reports_dir, PathBuf::from("/proj/reports"));
        assert_eq!(
            config.transcript_dir,
            PathBuf::from("/proj/.intake/transcripts")
        );
        assert!(config.storage_url.is_none());
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_file_sections_override_defaults() {
        let file: FileConfig = toml::from_str(
            r#"
            [server]
            bind = "0.0.0.0"
            port = 9000
            answer_timeout_secs = 30

            [engine]
            claude_cmd = "/opt/claude"

            [retry]
            max_attempts = 5
            base_delay_ms = 500
            max_delay_ms = 10000
            jitter = 0.1

            [reports]
            dir = "/var/reports"

            [storage]
            url = "https://store.example/api"
            "#,
        )
        .unwrap();

        let config = Config::from_sources(Path::new("/proj"), file, None, None);
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.answer_timeout, Duration::from_secs(30));
        assert_eq!(config.claude_cmd, "/opt/claude");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay, Duration::from_millis(500));
        assert_eq!(config.retry.max_delay, Duration::from_secs(10));
        assert_eq!(config.retry.jitter, 0.1);
        assert_eq!(config.reports_dir, PathBuf::from("/var/reports"));
        assert_eq!(
            config.storage_url.as_deref(),
            Some("https://store.example/api")
        );
    }

    #[test]
    fn test_env_beats_file() {
        let file: FileConfig = toml::from_str(
            r#"
            [engine]
            claude_cmd = "/opt/claude"

            [storage]
            url = "https://file.example"
            "#,
        )
        .unwrap();

        let config = Config::from_sources(
            Path::new("/proj"),
            file,
            Some("/env/claude".to_string()),
            Some("https://env.example".to_string()),
        );
        assert_eq!(config.claude_cmd, "/env/claude");
        assert_eq!(config.storage_url.as_deref(), Some("https://env.example"));
    }

    #[test]
    fn test_partial_sections_keep_remaining_defaults() {
        let file: FileConfig = toml::from_str(
            r#"
            [retry]
            max_attempts = 7
            "#,
        )
        .unwrap();

        let config = Config::from_sources(Path::new("/proj"), file, None, None);
        assert_eq!(config.retry.max_attempts, 7);
        assert_eq!(config.retry.base_delay, RetryPolicy::default().base_delay);
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn test_malformed_file_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("intake.toml"), "server = \"nope").unwrap();
        assert!(Config::load(dir.path()).is_err());
    }
}

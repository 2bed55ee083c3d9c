//! Report rendering and durable storage.
//!
//! The final pipeline stage hands its collected fields to a renderer, which
//! produces the artifact file, and optionally to a store, which uploads it
//! and returns the stored location. Both are external collaborators behind
//! narrow traits; neither goes through the retry policy. A render failure
//! is fatal to the pipeline, while a store failure is reported but leaves
//! the local artifact in place.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Structured fields collected from the pipeline for the final document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportFields {
    pub chief_complaint: String,
    pub history_present_illness: String,
    pub assessment: String,
    /// Report body written by the reporter stage.
    pub body: String,
}

/// Convert a title to a filename-safe slug, limited to `max_len` bytes.
pub fn slugify(text: &str, max_len: usize) -> String {
    let slug: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.len() > max_len {
        // Safe to slice: the slug is ASCII by construction.
        slug[..max_len].trim_end_matches('-').to_string()
    } else {
        slug
    }
}

/// Renders the collected fields into a document on disk.
#[async_trait]
pub trait ReportRenderer: Send + Sync {
    async fn render(&self, session_id: &str, fields: &ReportFields) -> Result<PathBuf>;
}

/// Uploads a rendered report; returns the stored location.
#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn store(&self, report_path: &Path, session_id: &str) -> Result<String>;
}

/// Markdown renderer writing into the configured reports directory.
pub struct MarkdownRenderer {
    reports_dir: PathBuf,
}

impl MarkdownRenderer {
    pub fn new(reports_dir: &Path) -> Self {
        Self {
            reports_dir: reports_dir.to_path_buf(),
        }
    }
}

#[async_trait]
impl ReportRenderer for MarkdownRenderer {
    async fn render(&self, session_id: &str, fields: &ReportFields) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.reports_dir)
            .await
            .context("Failed to create reports directory")?;

        let slug = {
            let s = slugify(&fields.chief_complaint, 30);
            if s.is_empty() { "symptom-report".to_string() } else { s }
        };
        let filename = format!(
            "intake_report_{}_{}.md",
            Utc::now().format("%Y%m%d_%H%M%S"),
            slug
        );
        let path = self.reports_dir.join(filename);

        let generated = Utc::now().format("%B %d, %Y at %H:%M UTC");
        let document = format!(
            "# PATIENT INTAKE REPORT\n\n\
             Generated: {generated}  \n\
             Session: {session_id}  \n\
             Source: AI-assisted patient interview\n\n\
             ## 1. Chief Complaint\n\n{chief}\n\n\
             ## 2. History of Present Illness\n\n{history}\n\n\
             ## 3. Preliminary Assessment\n\n{assessment}\n\n\
             ## 4. Report\n\n{body}\n\n\
             ## Important Notes\n\n\
             - This report is generated from an AI-assisted patient interview\n\
             - Information should be verified during clinical examination\n\
             - This report does not constitute medical diagnosis or treatment\n",
            generated = generated,
            session_id = session_id,
            chief = fields.chief_complaint,
            history = fields.history_present_illness,
            assessment = fields.assessment,
            body = fields.body,
        );

        tokio::fs::write(&path, document)
            .await
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        Ok(path)
    }
}

/// Storage path for a report within the durable store.
pub fn storage_location(session_id: &str, filename: &str) -> String {
    format!("patients/{session_id}/reports/{filename}")
}

/// Store that PUTs the rendered document to an HTTP endpoint.
pub struct HttpReportStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpReportStore {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ReportStore for HttpReportStore {
    async fn store(&self, report_path: &Path, session_id: &str) -> Result<String> {
        let filename = report_path
            .file_name()
            .and_then(|n| n.to_str())
            .context("Report path has no filename")?;
        let location = storage_location(session_id, filename);

        let bytes = tokio::fs::read(report_path)
            .await
            .with_context(|| format!("Failed to read report at {}", report_path.display()))?;

        let url = format!("{}/{}", self.base_url, location);
        let response = self
            .client
            .put(&url)
            .body(bytes)
            .send()
            .await
            .with_context(|| format!("Failed to upload report to {url}"))?;

        if !response.status().is_success() {
            anyhow::bail!("Report upload to {} returned {}", url, response.status());
        }
        Ok(location)
    }
}

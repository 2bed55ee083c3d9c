//! Reasoning collaborator boundary.
//!
//! The pipeline treats reasoning as an opaque function from (role,
//! instruction, context) to text. The production implementation shells out
//! to the Claude CLI; tests substitute scripted engines. Retry and fallback
//! live in `retry`, not here; this layer reports failures faithfully.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::errors::EngineError;
use crate::pipeline::StageRole;

/// An external reasoning collaborator.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    /// Resolve one stage invocation to text. The instruction is the stage's
    /// fixed payload; the context carries the dependency outputs.
    async fn complete(
        &self,
        role: StageRole,
        instruction: &str,
        context: &str,
    ) -> Result<String, EngineError>;
}

const COMMUNICATOR_SYSTEM_PROMPT: &str = "You are a warm, careful medical intake \
interviewer. You ask the patient exactly one clear question at a time, in plain \
language, and never diagnose. Respond with only the question text.";

const RESEARCHER_SYSTEM_PROMPT: &str = "You are a medical research assistant. \
Summarize what trusted medical sources say about the reported symptoms, in \
plain prose, without making diagnosis claims.";

const ASSESSOR_SYSTEM_PROMPT: &str = "You are a clinician writing a preliminary \
assessment from intake interview notes. Be factual, flag severity signals, and \
state clearly that this is not a diagnosis.";

const REPORTER_SYSTEM_PROMPT: &str = "You are writing the body of a clinical \
intake report from interview notes. Use clear section headings and neutral \
clinical language.";

fn system_prompt_for(role: StageRole) -> &'static str {
    match role {
        StageRole::Communicator => COMMUNICATOR_SYSTEM_PROMPT,
        StageRole::Researcher => RESEARCHER_SYSTEM_PROMPT,
        StageRole::Assessor => ASSESSOR_SYSTEM_PROMPT,
        StageRole::Reporter => REPORTER_SYSTEM_PROMPT,
    }
}

/// Combine dependency context and the stage instruction into one prompt.
fn build_prompt(instruction: &str, context: &str) -> String {
    if context.is_empty() {
        instruction.to_string()
    } else {
        format!(
            "## Interview context\n\n{}\n\n## Task\n\n{}",
            context, instruction
        )
    }
}

/// Engine backed by the Claude CLI (`claude --print`).
pub struct ClaudeCliEngine {
    claude_cmd: String,
}

impl ClaudeCliEngine {
    pub fn new(claude_cmd: &str) -> Self {
        Self {
            claude_cmd: claude_cmd.to_string(),
        }
    }

    /// Use the `CLAUDE_CMD` env var, defaulting to `claude` on PATH.
    pub fn from_env() -> Self {
        let claude_cmd = std::env::var("CLAUDE_CMD").unwrap_or_else(|_| "claude".to_string());
        Self::new(&claude_cmd)
    }
}

#[async_trait]
impl ReasoningEngine for ClaudeCliEngine {
    async fn complete(
        &self,
        role: StageRole,
        instruction: &str,
        context: &str,
    ) -> Result<String, EngineError> {
        let prompt = build_prompt(instruction, context);

        let output = Command::new(&self.claude_cmd)
            .args([
                "--print",
                "--output-format",
                "text",
                "-p",
                &prompt,
                "--system",
                system_prompt_for(role),
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(EngineError::Spawn)?;

        if !output.status.success() {
            return Err(EngineError::NonZeroExit {
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

//! Typed error hierarchy for the intake orchestrator.
//!
//! Two top-level enums cover the two subsystems that can fail:
//! - `PipelineError` — per-stage execution failures inside the worker
//! - `EngineError` — reasoning collaborator invocation failures
//!
//! Broker operations are infallible by contract and have no error type.

use thiserror::Error;

/// Errors from pipeline execution (the worker side).
///
/// Engine failures never appear here: the resilient invoker absorbs them
/// into role fallbacks. These variants are the fatal, non-retryable class
/// that aborts the remaining stages and marks the session failed.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Stage {stage} depends on {dependency}, which has not produced output")]
    MissingDependency { stage: String, dependency: String },

    #[error("Failed to append transcript record: {0}")]
    Transcript(#[source] std::io::Error),

    #[error("Report rendering failed: {0}")]
    Render(#[source] anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from a single reasoning engine invocation.
///
/// The resilient invoker classifies these by message signature; `Spawn`
/// covers a missing or broken CLI binary, `NonZeroExit` carries whatever
/// the engine printed to stderr (which is where overload markers show up).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to spawn reasoning process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Reasoning process exited with code {exit_code}: {stderr}")]
    NonZeroExit { exit_code: i32, stderr: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

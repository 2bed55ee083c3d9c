//! Worker lifecycle management.
//!
//! Each session runs its pipeline on at most one background task. Starting
//! is idempotent; the task owns the run from start to a terminal status and
//! triggers registry cleanup exactly once (cleanup itself is at-most-once,
//! so a concurrent external cleanup is harmless).
//!
//! **Abandoned worker**: a client-side wait timing out never cancels the
//! worker. A worker parked in `get_message` stays parked: it will consume
//! the next message whenever one arrives, and its session outlives the
//! original caller until cleanup runs. The asymmetry (the worker waits
//! indefinitely, clients wait a bounded span) is deliberate.

use std::path::Path;
use std::sync::Arc;

use crate::runner::PipelineRunner;
use crate::session::{Session, SessionRegistry, SessionStatus, recover};
use crate::transcript::TranscriptLog;

/// Start the background worker for `session` unless one is already live.
/// Returns whether a new worker was spawned.
pub fn spawn(
    registry: Arc<SessionRegistry>,
    session: Arc<Session>,
    runner: Arc<PipelineRunner>,
    transcript_dir: &Path,
) -> bool {
    let mut slot = recover(session.worker.lock());
    if let Some(handle) = slot.as_ref()
        && !handle.is_finished()
    {
        return false;
    }
    if session.status().is_terminal() {
        return false;
    }

    // The transcript is an optional resource: an interview without one
    // still runs.
    match TranscriptLog::create(transcript_dir, &session.id) {
        Ok(log) => session.attach_transcript(log),
        Err(e) => {
            tracing::warn!(session_id = %session.id, error = %e, "transcript unavailable for this session");
        }
    }

    session.set_status(SessionStatus::Running);
    tracing::info!(session_id = %session.id, "interview worker started");

    let handle = tokio::spawn(run_to_completion(registry, Arc::clone(&session), runner));
    *slot = Some(handle);
    true
}

async fn run_to_completion(
    registry: Arc<SessionRegistry>,
    session: Arc<Session>,
    runner: Arc<PipelineRunner>,
) {
    let terminal = match runner.run(&session).await {
        Ok(artifact) => {
            if let Err(e) = session.log_transcript(|log| log.completion(&artifact)) {
                tracing::warn!(session_id = %session.id, error = %e, "failed to record completion");
            }
            session.set_artifact(&artifact);
            tracing::info!(session_id = %session.id, artifact = %artifact, "interview completed");
            SessionStatus::Completed
        }
        Err(e) => {
            let message = e.to_string();
            if let Err(log_err) = session.log_transcript(|log| log.error("pipeline", &message)) {
                tracing::warn!(session_id = %session.id, error = %log_err, "failed to record pipeline error");
            }
            session.set_failure(&message);
            tracing::error!(session_id = %session.id, error = %message, "interview failed");
            SessionStatus::Failed
        }
    };

    // Release resources before broadcasting the terminal status, so a
    // caller woken by completion already observes the registry entry gone.
    // Cleanup is at-most-once, so racing an external DELETE is fine.
    registry.cleanup(&session.id);
    session.set_status(terminal);
}

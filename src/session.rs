//! Sessions and the session registry.
//!
//! A session is the unit of one interview: an opaque token mapped to its
//! broker, its background worker handle, its transcript, and a status
//! watch. Sessions are created lazily on first lookup and destroyed exactly
//! once by cleanup. The registry map is guarded by a single lock; inside a
//! session, each field has one logical owner (the worker mutates pipeline
//! and question state, request handlers only deliver messages), so no
//! further locking discipline is needed beyond the slot mutexes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::broker::MessageBroker;
use crate::transcript::TranscriptLog;

/// Lifecycle status of a session's interview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    AwaitingInput,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }
}

/// What a bounded wait on a session resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The worker posted a (new) outstanding question.
    Question(String),
    Completed { artifact: Option<String> },
    Failed { reason: Option<String> },
    /// The bounded wait elapsed. The worker is untouched and keeps running
    /// (or stays parked on the broker); see the abandoned-worker note on
    /// `worker::spawn`.
    TimedOut,
}

/// One interview's state. Owned by the registry, shared via `Arc`.
pub struct Session {
    pub id: String,
    pub broker: MessageBroker,
    status: watch::Sender<SessionStatus>,
    pub(crate) worker: Mutex<Option<JoinHandle<()>>>,
    transcript: Mutex<Option<TranscriptLog>>,
    artifact: Mutex<Option<String>>,
    failure: Mutex<Option<String>>,
}

pub(crate) fn recover<T>(result: Result<T, PoisonError<T>>) -> T {
    // A poisoned slot is still structurally sound; recover the guard.
    result.unwrap_or_else(PoisonError::into_inner)
}

impl Session {
    fn new(id: &str) -> Self {
        let (status, _) = watch::channel(SessionStatus::Pending);
        Self {
            id: id.to_string(),
            broker: MessageBroker::new(),
            status,
            worker: Mutex::new(None),
            transcript: Mutex::new(None),
            artifact: Mutex::new(None),
            failure: Mutex::new(None),
        }
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    pub fn set_status(&self, status: SessionStatus) {
        self.status.send_replace(status);
    }

    pub fn status_watch(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub fn set_artifact(&self, artifact: &str) {
        *recover(self.artifact.lock()) = Some(artifact.to_string());
    }

    pub fn artifact(&self) -> Option<String> {
        recover(self.artifact.lock()).clone()
    }

    pub fn set_failure(&self, reason: &str) {
        *recover(self.failure.lock()) = Some(reason.to_string());
    }

    pub fn failure(&self) -> Option<String> {
        recover(self.failure.lock()).clone()
    }

    pub(crate) fn attach_transcript(&self, log: TranscriptLog) {
        *recover(self.transcript.lock()) = Some(log);
    }

    /// Append to the transcript if one is attached. Sessions without a
    /// transcript (never started) are a no-op.
    pub(crate) fn log_transcript(
        &self,
        write: impl FnOnce(&mut TranscriptLog) -> std::io::Result<()>,
    ) -> std::io::Result<()> {
        match recover(self.transcript.lock()).as_mut() {
            Some(log) => write(log),
            None => Ok(()),
        }
    }

    fn take_transcript(&self) -> Option<TranscriptLog> {
        recover(self.transcript.lock()).take()
    }

    fn terminal_outcome(&self, status: SessionStatus) -> Option<TurnOutcome> {
        match status {
            SessionStatus::Completed => Some(TurnOutcome::Completed {
                artifact: self.artifact(),
            }),
            SessionStatus::Failed => Some(TurnOutcome::Failed {
                reason: self.failure(),
            }),
            _ => None,
        }
    }

    /// Wait up to `wait` for an outstanding question or a terminal status.
    ///
    /// With `accept_current`, a question that is already outstanding is
    /// returned immediately; the start operation uses this so an
    /// idempotent re-start sees the current question. The answer path must
    /// not accept the current value (it would re-read the question that was
    /// just answered), so it subscribes first and waits for a change.
    pub async fn await_turn(&self, accept_current: bool, wait: Duration) -> TurnOutcome {
        let question_rx = self.broker.question_watch();
        let status_rx = self.status_watch();
        self.wait_on(question_rx, status_rx, accept_current, wait).await
    }

    /// Deliver one patient message, then wait up to `wait` for the next
    /// question or a terminal status.
    ///
    /// The watches are subscribed *before* the message is enqueued so a
    /// fast worker cannot publish the next question in between and leave
    /// this call waiting on a change that already happened.
    pub async fn answer(&self, message: &str, wait: Duration) -> TurnOutcome {
        let question_rx = self.broker.question_watch();
        let status_rx = self.status_watch();
        self.broker.add_message(message).await;
        self.wait_on(question_rx, status_rx, false, wait).await
    }

    async fn wait_on(
        &self,
        mut question_rx: watch::Receiver<Option<String>>,
        mut status_rx: watch::Receiver<SessionStatus>,
        accept_current: bool,
        wait: Duration,
    ) -> TurnOutcome {
        if accept_current && let Some(question) = question_rx.borrow_and_update().clone() {
            return TurnOutcome::Question(question);
        }
        if let Some(outcome) = self.terminal_outcome(*status_rx.borrow_and_update()) {
            return outcome;
        }

        let deadline = tokio::time::sleep(wait);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                changed = question_rx.changed() => {
                    if changed.is_err() {
                        return TurnOutcome::TimedOut;
                    }
                    if let Some(question) = question_rx.borrow_and_update().clone() {
                        return TurnOutcome::Question(question);
                    }
                }
                changed = status_rx.changed() => {
                    if changed.is_err() {
                        return TurnOutcome::TimedOut;
                    }
                    if let Some(outcome) = self.terminal_outcome(*status_rx.borrow_and_update()) {
                        return outcome;
                    }
                }
                _ = &mut deadline => return TurnOutcome::TimedOut,
            }
        }
    }
}

/// Thread-safe keyed store of live sessions.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Mint a fresh opaque session token.
    pub fn mint_id() -> String {
        format!("session_{}", Uuid::new_v4())
    }

    /// Return the session for `id`, creating it (with a fresh broker) on
    /// first lookup. Concurrent calls with the same id observe the same
    /// instance.
    pub fn get_or_create(&self, id: &str) -> Arc<Session> {
        let mut sessions = recover(self.sessions.lock());
        Arc::clone(
            sessions
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(Session::new(id))),
        )
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        recover(self.sessions.lock()).get(id).cloned()
    }

    /// Remove the session (at most once) and release its transcript.
    /// Returns whether a session was actually removed; repeat calls are
    /// no-ops. Transcript deletion errors are swallowed; cleanup must not
    /// fail.
    pub fn cleanup(&self, id: &str) -> bool {
        let removed = recover(self.sessions.lock()).remove(id);
        match removed {
            Some(session) => {
                if let Some(log) = session.take_transcript()
                    && let Err(e) = log.remove()
                {
                    tracing::debug!(session_id = id, error = %e, "transcript removal failed");
                }
                true
            }
            None => false,
        }
    }

    pub fn active_count(&self) -> usize {
        recover(self.sessions.lock()).len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

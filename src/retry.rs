//! Resilient invocation of the reasoning collaborator.
//!
//! Every stage call goes through a `RetryPolicy`: transient upstream
//! failures (overload / rate-limit signatures) are retried with capped
//! exponential backoff and jitter, and anything that survives the policy
//! (fatal failures, exhausted attempts, empty output) collapses into a
//! role-specific fallback string instead of an error, so the pipeline keeps
//! moving in a degraded but defined state.
//!
//! The policy is stateless and shared; it wraps a call closure at each call
//! site rather than mutating any global behavior.

use std::time::Duration;

use rand::Rng;

use crate::pipeline::StageRole;

/// Classification of a failed engine invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Overload or rate limiting upstream; expected to resolve on retry.
    Transient,
    /// Everything else. Not worth retrying.
    Fatal,
}

/// Signatures that mark a failure as transient. Matched case-insensitively
/// against the failure text (error display or stderr).
const TRANSIENT_MARKERS: &[&str] = &[
    "overloaded",
    "rate limit",
    "rate_limit",
    "too many requests",
    "service unavailable",
    "529",
    "503",
    "429",
];

/// Classify a failure by its textual signature.
pub fn classify_failure(signature: &str) -> FailureKind {
    let lowered = signature.to_lowercase();
    if TRANSIENT_MARKERS.iter().any(|m| lowered.contains(m)) {
        FailureKind::Transient
    } else {
        FailureKind::Fatal
    }
}

/// The fallback returned when the policy gives up on a call.
///
/// The human-facing role gets conversational text (it will be shown to the
/// patient as a question); internal roles get a bracketed marker that stays
/// recognizable inside downstream stage context.
pub fn fallback_for(role: StageRole) -> String {
    match role {
        StageRole::Communicator => {
            "I'm having trouble responding right now. Could you bear with me \
             and tell me that again in a moment?"
                .to_string()
        }
        role => format!("[no {} output available]", role.label()),
    }
}

/// Bounded exponential backoff policy for reasoning calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Jitter fraction: each delay is scaled by a factor in `1 ± jitter`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based):
    /// `min(base * 2^attempt * (1 ± jitter), max)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponential = self.base_delay.as_secs_f64() * 2f64.powi(attempt as i32);
        let spread = if self.jitter > 0.0 {
            rand::thread_rng().gen_range(-self.jitter..=self.jitter)
        } else {
            0.0
        };
        let secs = (exponential * (1.0 + spread)).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Run `call` under this policy and always come back with usable text.
    ///
    /// A non-empty (after trim) `Ok` is returned as-is. An `Err`, or an
    /// empty result, which signals "no usable output" just like an error,
    /// is classified by signature: transient failures sleep and retry while
    /// attempts remain; fatal failures and exhausted attempts return the
    /// role fallback immediately.
    pub async fn invoke<F, Fut, E>(&self, role: StageRole, call: F) -> String
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<String, E>>,
        E: std::fmt::Display,
    {
        let mut attempt: u32 = 0;
        loop {
            let signature = match call().await {
                Ok(text) => {
                    let trimmed = text.trim();
                    if !trimmed.is_empty() {
                        return trimmed.to_string();
                    }
                    // Empty output carries no failure signature; the
                    // classifier will land on Fatal below.
                    String::from("empty result")
                }
                Err(e) => e.to_string(),
            };
            attempt += 1;

            match classify_failure(&signature) {
                FailureKind::Transient if attempt < self.max_attempts => {
                    let delay = self.backoff_delay(attempt - 1);
                    tracing::warn!(
                        role = role.label(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient engine failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                kind => {
                    tracing::warn!(
                        role = role.label(),
                        attempt,
                        failure = %signature,
                        kind = ?kind,
                        "engine call failed, substituting fallback"
                    );
                    return fallback_for(role);
                }
            }
        }
    }
}

//! The decision an error handler returns at the pipeline boundary.

use std::time::Duration;

use hero_common::ErrorKind;

#[derive(Debug, Clone)]
pub enum ErrorDecision {
    Retry(Duration),
    SendToDeadLetter(String),
    Discard,
    Escalate,
}

/// Default policy: transient -> Retry (if budget remains); non-transient or
/// retries exhausted -> SendToDeadLetter; catastrophic or cancelled ->
/// Escalate, so both propagate to the caller rather than land as a normal
/// `ProcessingResult`.
pub fn default_decision(
    kind: ErrorKind,
    reason: &str,
    retry_budget_remaining: bool,
    next_delay: Duration,
) -> ErrorDecision {
    match kind {
        ErrorKind::Catastrophic | ErrorKind::Cancellation => ErrorDecision::Escalate,
        ErrorKind::Transient if retry_budget_remaining => ErrorDecision::Retry(next_delay),
        _ => ErrorDecision::SendToDeadLetter(reason.to_string()),
    }
}

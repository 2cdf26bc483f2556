use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverReason {
    RateLimit,
    Billing,
    Timeout,
    ServerError,
    Auth,
    Other,
}

/// Recoverable model-call error, coerced from provider-specific errors by a
/// per-provider-family classifier (§7, §9 "failover error coercion").
#[derive(Debug, Clone, Error)]
#[error("{message} ({reason:?})")]
pub struct FailoverError {
    pub reason: FailoverReason,
    pub status: Option<u16>,
    pub code: Option<String>,
    pub message: String,
}

/// User/parent-initiated cancellation. Never swallowed — bubbles to the
/// caller and results in ledger status `cancelled`.
#[derive(Debug, Clone, Error)]
#[error("aborted: {0}")]
pub struct AbortError(pub String);

#[derive(Debug, Clone, Error)]
pub enum BudgetError {
    #[error("budget denied: {reason}")]
    Denied { reason: String },
    #[error("budget deferred: {reason}")]
    Deferred { reason: String },
}

#[derive(Debug, Clone, Error)]
pub enum PolicyError {
    #[error("send blocked by policy: {0}")]
    SendDenied(String),
    #[error("shared-memory write guard: {0}")]
    SharedMemoryGuard(String),
}

#[derive(Debug, Clone, Error)]
#[error("ledger record rejected: missing field `{field}` for kind `{kind}`")]
pub struct ValidationError {
    pub kind: String,
    pub field: String,
}

/// Formats a user-visible failure message with the required leading glyph
/// and an action-oriented next step (§7).
pub fn format_user_visible_failure(summary: &str, next_step: &str) -> String {
    format!("\u{26A0}\u{FE0F} {summary}. {next_step}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_visible_failure_has_leading_glyph() {
        let msg = format_user_visible_failure(
            "Tool results missing",
            "Retry the command or run it directly with /bash run …",
        );
        assert!(msg.starts_with('\u{26A0}'));
        assert!(msg.contains("Retry the command"));
    }
}

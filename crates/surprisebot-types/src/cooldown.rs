use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownReason {
    RateLimit,
    Billing,
    Timeout,
}

/// Process-local, non-persisted cool-down state for one `provider/model`
/// CLI backend candidate (§3, §4.2.1).
#[derive(Debug, Clone)]
pub struct CliCooldownEntry {
    pub until_epoch_ms: i64,
    pub reason: CooldownReason,
    pub last_error: String,
    pub last_at_epoch_ms: i64,
}

/// `provider/model` cool-down map key.
pub fn cooldown_key(provider: &str, model: &str) -> String {
    format!("{provider}/{model}")
}

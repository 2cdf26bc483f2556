//! Process-local CLI cool-down map (§4.2.1). Non-persisted — cleared on
//! restart, as §3 specifies for all in-memory caches.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use surprisebot_types::{CliCooldownEntry, CooldownReason};
use tokio::sync::Mutex;

const MIN_COOLDOWN_MS: i64 = 60_000;
const MAX_COOLDOWN_MS: i64 = 24 * 60 * 60 * 1000;
const RATE_LIMIT_DEFAULT_MS: i64 = 15 * 60 * 1000;
const BILLING_COOLDOWN_MS: i64 = 6 * 60 * 60 * 1000;
const TIMEOUT_COOLDOWN_MS: i64 = 2 * 60 * 1000;

#[derive(Clone, Default)]
pub struct CooldownStore {
    entries: Arc<Mutex<HashMap<String, CliCooldownEntry>>>,
}

impl CooldownStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes the cool-down duration for `reason` (parsing `message` for
    /// an explicit retry hint on rate limits), clamps it to
    /// `[60s, 24h]`, and records it. `other` reasons (server_error, auth,
    /// other) set no cool-down at all, per §4.2.1.
    pub async fn mark(&self, provider: &str, model: &str, reason: CooldownReason, message: &str, now_ms: i64) {
        let duration_ms = cooldown_duration_ms(reason, message);
        let until_ms = clamp(now_ms + duration_ms);
        let key = surprisebot_types::cooldown_key(provider, model);
        let mut entries = self.entries.lock().await;
        entries.insert(
            key,
            CliCooldownEntry {
                until_epoch_ms: until_ms,
                reason,
                last_error: message.to_string(),
                last_at_epoch_ms: now_ms,
            },
        );
    }

    /// Returns true if `provider/model` is under an unexpired cool-down,
    /// pruning the entry lazily if it has passed.
    pub async fn is_active(&self, provider: &str, model: &str, now_ms: i64) -> bool {
        let key = surprisebot_types::cooldown_key(provider, model);
        let mut entries = self.entries.lock().await;
        match entries.get(&key) {
            Some(entry) if entry.until_epoch_ms > now_ms => true,
            Some(_) => {
                entries.remove(&key);
                false
            }
            None => false,
        }
    }
}

fn clamp(until_ms: i64) -> i64 {
    until_ms.clamp(MIN_COOLDOWN_MS, MAX_COOLDOWN_MS)
}

/// `reason`-driven base duration. Rate-limit durations may be overridden
/// by a hint parsed from the provider error message; everything else uses
/// a fixed duration. Returned in absolute terms (added to `now_ms` by the
/// caller, then clamped) — this function itself does not clamp, so tests
/// can assert pre-clamp values distinctly from [`clamp`].
fn cooldown_duration_ms(reason: CooldownReason, message: &str) -> i64 {
    match reason {
        CooldownReason::RateLimit => parse_rate_limit_hint_ms(message).unwrap_or(RATE_LIMIT_DEFAULT_MS),
        CooldownReason::Billing => BILLING_COOLDOWN_MS,
        CooldownReason::Timeout => TIMEOUT_COOLDOWN_MS,
    }
}

/// Parses `retryDelay: <n>s`, `retry after <n>s`, `retry in <n>s`,
/// `resets_in_seconds: <n>`, or `resets_at: <epoch>` out of a provider
/// error message (§4.2.1). Patterns are tried in this order; the first
/// match wins.
fn parse_rate_limit_hint_ms(message: &str) -> Option<i64> {
    let seconds_patterns = [
        r#"retryDelay"?\s*:\s*"?(\d+)s"#,
        r"retry after (\d+)s",
        r"retry in (\d+)s",
        r#"resets_in_seconds"?\s*:\s*(\d+)"#,
    ];
    for pattern in seconds_patterns {
        if let Ok(re) = Regex::new(pattern) {
            if let Some(caps) = re.captures(message) {
                if let Ok(seconds) = caps[1].parse::<i64>() {
                    return Some(seconds * 1000);
                }
            }
        }
    }
    if let Ok(re) = Regex::new(r#"resets_at"?\s*:\s*(\d+)"#) {
        if let Some(caps) = re.captures(message) {
            if let Ok(epoch_ms) = caps[1].parse::<i64>() {
                return Some(epoch_ms);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn timeout_cooldown_is_exactly_two_minutes() {
        let store = CooldownStore::new();
        let now = 1_000_000_000_000;
        store.mark("cli", "model", CooldownReason::Timeout, "timed out", now).await;
        assert!(store.is_active("cli", "model", now + TIMEOUT_COOLDOWN_MS - 1).await);
        assert!(!store.is_active("cli", "model", now + TIMEOUT_COOLDOWN_MS + 1).await);
    }

    #[tokio::test]
    async fn rate_limit_without_hint_defaults_to_fifteen_minutes() {
        let store = CooldownStore::new();
        let now = 1_000_000_000_000;
        store.mark("cli", "model", CooldownReason::RateLimit, "rate limited", now).await;
        assert!(store.is_active("cli", "model", now + RATE_LIMIT_DEFAULT_MS - 1).await);
        assert!(!store.is_active("cli", "model", now + RATE_LIMIT_DEFAULT_MS + 1).await);
    }

    #[tokio::test]
    async fn rate_limit_hint_is_clamped_up_to_sixty_second_floor() {
        let store = CooldownStore::new();
        let now = 1_000_000_000_000;
        store
            .mark("cli", "model", CooldownReason::RateLimit, r#""retryDelay":"1s""#, now)
            .await;
        assert!(store.is_active("cli", "model", now + MIN_COOLDOWN_MS - 1).await);
        assert!(!store.is_active("cli", "model", now + MIN_COOLDOWN_MS + 1).await);
    }

    #[tokio::test]
    async fn billing_cooldown_is_six_hours() {
        let store = CooldownStore::new();
        let now = 1_000_000_000_000;
        store.mark("cli", "model", CooldownReason::Billing, "billing issue", now).await;
        assert!(store.is_active("cli", "model", now + BILLING_COOLDOWN_MS - 1).await);
        assert!(!store.is_active("cli", "model", now + BILLING_COOLDOWN_MS + 1).await);
    }

    #[test]
    fn parses_retry_after_seconds_hint() {
        assert_eq!(parse_rate_limit_hint_ms("please retry after 42s"), Some(42_000));
    }

    #[test]
    fn parses_resets_in_seconds_hint() {
        assert_eq!(parse_rate_limit_hint_ms(r#"{"resets_in_seconds": 30}"#), Some(30_000));
    }
}

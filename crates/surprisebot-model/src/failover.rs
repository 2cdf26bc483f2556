//! Ordered failover executor (§4.2). Runs a caller-supplied operation
//! against each candidate in turn, classifying failures and rotating to
//! the next candidate until one succeeds or every candidate is exhausted.

use std::future::Future;

use surprisebot_types::{AbortError, FailoverError};

use crate::candidate::Candidate;
use crate::cooldown::CooldownStore;

/// What a single candidate attempt can fail with. `Other` errors are not
/// failover-worthy and rethrow immediately rather than rotating — the
/// source's "if coercion fails, rethrow" rule.
pub enum CandidateError {
    Abort(AbortError),
    Failover(FailoverError),
    Other(anyhow::Error),
}

impl From<FailoverError> for CandidateError {
    fn from(e: FailoverError) -> Self {
        CandidateError::Failover(e)
    }
}

#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub provider: String,
    pub model: String,
    pub reason: surprisebot_types::FailoverReason,
    pub message: String,
}

pub struct FailoverOutcome<T> {
    pub result: T,
    pub provider: String,
    pub model: String,
    pub attempts: Vec<AttemptRecord>,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Abort(#[from] AbortError),
    /// Exactly one attempt was made and it failed: the original error is
    /// preserved and rethrown rather than wrapped in a summary (§4.2,
    /// §8).
    #[error(transparent)]
    SingleFailure(#[from] FailoverError),
    /// Two or more attempts failed: `"All models failed (N): p1/m1: e1
    /// (r1) | p2/m2: e2 (r2) …"`.
    #[error("{message}")]
    AllFailed { attempts: Vec<AttemptRecord>, message: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Executes `run` against each candidate in order. `is_cli_provider`
/// identifies candidates whose failures should record a cool-down;
/// `on_error` is an optional hook invoked with each failed attempt before
/// moving to the next candidate.
pub async fn run_with_failover<T, F, Fut>(
    candidates: &[Candidate],
    is_cli_provider: impl Fn(&str) -> bool,
    cooldowns: &CooldownStore,
    now_ms: i64,
    mut run: F,
    mut on_error: Option<&mut dyn FnMut(&AttemptRecord)>,
) -> Result<FailoverOutcome<T>, ExecutionError>
where
    F: FnMut(&Candidate) -> Fut,
    Fut: Future<Output = Result<T, CandidateError>>,
{
    let mut attempts: Vec<AttemptRecord> = Vec::new();
    let mut last_error: Option<FailoverError> = None;

    for candidate in candidates {
        match run(candidate).await {
            Ok(result) => {
                return Ok(FailoverOutcome {
                    result,
                    provider: candidate.provider.clone(),
                    model: candidate.model.clone(),
                    attempts,
                });
            }
            Err(CandidateError::Abort(abort)) => return Err(ExecutionError::Abort(abort)),
            Err(CandidateError::Other(other)) => return Err(ExecutionError::Other(other)),
            Err(CandidateError::Failover(failover)) => {
                let record = AttemptRecord {
                    provider: candidate.provider.clone(),
                    model: candidate.model.clone(),
                    reason: failover.reason,
                    message: failover.message.clone(),
                };
                if let Some(hook) = on_error.as_mut() {
                    (*hook)(&record);
                }
                if is_cli_provider(&candidate.provider) {
                    if let Some(cooldown_reason) = cooldown_reason_for(failover.reason) {
                        cooldowns.mark(&candidate.provider, &candidate.model, cooldown_reason, &failover.message, now_ms).await;
                    }
                }
                attempts.push(record);
                last_error = Some(failover);
            }
        }
    }

    match (attempts.len(), last_error) {
        (1, Some(only_error)) => Err(ExecutionError::SingleFailure(only_error)),
        (n, _) if n >= 1 => {
            let summary = attempts
                .iter()
                .map(|a| format!("{}/{}: {} ({:?})", a.provider, a.model, a.message, a.reason))
                .collect::<Vec<_>>()
                .join(" | ");
            Err(ExecutionError::AllFailed {
                message: format!("All models failed ({}): {}", attempts.len(), summary),
                attempts,
            })
        }
        _ => Err(ExecutionError::Other(anyhow::anyhow!("no candidates to execute"))),
    }
}

/// Maps a failover reason onto a cool-down reason, or `None` when §4.2.1
/// says no cool-down should be set at all (`server_error`/`auth`/`other`).
fn cooldown_reason_for(reason: surprisebot_types::FailoverReason) -> Option<surprisebot_types::CooldownReason> {
    use surprisebot_types::{CooldownReason, FailoverReason};
    match reason {
        FailoverReason::RateLimit => Some(CooldownReason::RateLimit),
        FailoverReason::Billing => Some(CooldownReason::Billing),
        FailoverReason::Timeout => Some(CooldownReason::Timeout),
        FailoverReason::ServerError | FailoverReason::Auth | FailoverReason::Other => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use surprisebot_types::FailoverReason;

    fn failover_err(reason: FailoverReason, message: &str) -> CandidateError {
        CandidateError::Failover(FailoverError {
            reason,
            status: None,
            code: None,
            message: message.to_string(),
        })
    }

    #[tokio::test]
    async fn single_attempt_failure_rethrows_original_error() {
        let candidates = vec![Candidate::new("anthropic", "opus")];
        let cooldowns = CooldownStore::new();
        let result: Result<FailoverOutcome<()>, _> = run_with_failover(
            &candidates,
            |_| false,
            &cooldowns,
            0,
            |_| async { Err(failover_err(FailoverReason::RateLimit, "rate limited")) },
            None,
        )
        .await;
        match result {
            Err(ExecutionError::SingleFailure(e)) => assert_eq!(e.message, "rate limited"),
            other => panic!("expected SingleFailure, got {}", describe(&other)),
        }
    }

    #[tokio::test]
    async fn multiple_failures_produce_summary_message() {
        let candidates = vec![Candidate::new("anthropic", "opus"), Candidate::new("openai", "gpt4")];
        let cooldowns = CooldownStore::new();
        let result: Result<FailoverOutcome<()>, _> = run_with_failover(
            &candidates,
            |_| false,
            &cooldowns,
            0,
            |c| {
                let msg = format!("{} failed", c.provider);
                async move { Err(failover_err(FailoverReason::ServerError, &msg)) }
            },
            None,
        )
        .await;
        match result {
            Err(ExecutionError::AllFailed { attempts, message }) => {
                assert!(attempts.len() >= 2);
                assert!(regex::Regex::new(r"^All (image )?models failed \(\d+\): ").unwrap().is_match(&message));
            }
            other => panic!("expected AllFailed, got {}", describe(&other)),
        }
    }

    #[tokio::test]
    async fn success_returns_provider_and_model_with_attempts() {
        let candidates = vec![Candidate::new("anthropic", "opus"), Candidate::new("openai", "gpt4")];
        let cooldowns = CooldownStore::new();
        let result = run_with_failover(
            &candidates,
            |_| false,
            &cooldowns,
            0,
            |c| {
                let is_first = c.provider == "anthropic";
                async move {
                    if is_first {
                        Err(failover_err(FailoverReason::Timeout, "timed out"))
                    } else {
                        Ok(42)
                    }
                }
            },
            None,
        )
        .await
        .unwrap();
        assert_eq!(result.result, 42);
        assert_eq!(result.provider, "openai");
        assert_eq!(result.attempts.len(), 1);
    }

    #[tokio::test]
    async fn abort_error_bypasses_remaining_candidates() {
        let candidates = vec![Candidate::new("anthropic", "opus"), Candidate::new("openai", "gpt4")];
        let cooldowns = CooldownStore::new();
        let result: Result<FailoverOutcome<()>, _> = run_with_failover(
            &candidates,
            |_| false,
            &cooldowns,
            0,
            |_| async { Err(CandidateError::Abort(AbortError("cancelled".to_string()))) },
            None,
        )
        .await;
        assert!(matches!(result, Err(ExecutionError::Abort(_))));
    }

    #[tokio::test]
    async fn cli_provider_failure_records_cooldown() {
        let candidates = vec![Candidate::new("cli-provider", "model-a")];
        let cooldowns = CooldownStore::new();
        let _: Result<FailoverOutcome<()>, _> = run_with_failover(
            &candidates,
            |p| p == "cli-provider",
            &cooldowns,
            1_000_000,
            |_| async { Err(failover_err(FailoverReason::Timeout, "timed out")) },
            None,
        )
        .await;
        assert!(cooldowns.is_active("cli-provider", "model-a", 1_000_000 + 1000).await);
    }

    #[tokio::test]
    async fn cli_provider_server_error_sets_no_cooldown() {
        let candidates = vec![Candidate::new("cli-provider", "model-a")];
        let cooldowns = CooldownStore::new();
        let _: Result<FailoverOutcome<()>, _> = run_with_failover(
            &candidates,
            |p| p == "cli-provider",
            &cooldowns,
            1_000_000,
            |_| async { Err(failover_err(FailoverReason::ServerError, "server blew up")) },
            None,
        )
        .await;
        assert!(!cooldowns.is_active("cli-provider", "model-a", 1_000_000 + 1000).await);
    }

    fn describe<T>(r: &Result<FailoverOutcome<T>, ExecutionError>) -> String {
        match r {
            Ok(_) => "Ok".to_string(),
            Err(e) => format!("{e}"),
        }
    }
}

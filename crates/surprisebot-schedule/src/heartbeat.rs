//! Heartbeat scheduler (§4.6): a periodic timer plus a debounced
//! on-demand wake, gated on four conditions, that drives a synthetic
//! "check in" turn through [`AgentRunner`].

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::Mutex as AsyncMutex;

use surprisebot_config::HeartbeatConfig;
use surprisebot_runner::{AgentRunner, Payload, RunOutcomeStatus, RunRequest};
use surprisebot_types::RunSource;

use crate::queue::LaneQueue;

/// Parses a `"<n><unit>"` duration shorthand (`s`/`m`/`h`/`d`), the same
/// grammar `heartbeat.every` uses elsewhere in config (§4.6). Returns
/// `None` for anything malformed rather than erroring — an unparseable
/// interval just means heartbeats are not scheduled.
pub fn parse_interval(raw: &str) -> Option<ChronoDuration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let (digits, unit) = raw.split_at(raw.len() - 1);
    let n: i64 = digits.parse().ok()?;
    match unit {
        "s" => Some(ChronoDuration::seconds(n)),
        "m" => Some(ChronoDuration::minutes(n)),
        "h" => Some(ChronoDuration::hours(n)),
        "d" => Some(ChronoDuration::days(n)),
        _ => None,
    }
}

/// Decides whether heartbeat-reply text should be treated as a silent
/// "nothing to report" — suppressing delivery — rather than a message
/// worth sending. Left pluggable (§9 open question) instead of matching
/// a single hard-coded token, so a deployment can define its own
/// convention (e.g. a JSON `{"status":"ok"}` body, an empty string, or a
/// specific marker phrase).
pub trait SilentReplyPredicate: Send + Sync {
    fn is_silent(&self, reply_text: &str) -> bool;
}

/// Default predicate: a reply consisting only of the configured token
/// (after trimming and case-insensitive comparison) is silent, as is an
/// empty reply.
pub struct TokenSilentPredicate {
    token: String,
}

impl TokenSilentPredicate {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

impl Default for TokenSilentPredicate {
    fn default() -> Self {
        Self::new("HEARTBEAT_OK")
    }
}

impl SilentReplyPredicate for TokenSilentPredicate {
    fn is_silent(&self, reply_text: &str) -> bool {
        let trimmed = reply_text.trim();
        trimmed.is_empty() || trimmed.eq_ignore_ascii_case(&self.token)
    }
}

/// A debounced, coalescing wake latch: repeated [`request`](Self::request)
/// calls within the coalesce window collapse into a single scheduled
/// fire at the *first* request's `fire_at`, with the *latest* reason.
#[derive(Default)]
pub struct CoalescedWake {
    state: AsyncMutex<Option<PendingWake>>,
}

struct PendingWake {
    reason: String,
    fire_at: DateTime<Utc>,
}

impl CoalescedWake {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn request(&self, reason: impl Into<String>, now: DateTime<Utc>, coalesce: ChronoDuration) {
        let mut guard = self.state.lock().await;
        match guard.as_mut() {
            Some(pending) => pending.reason = reason.into(),
            None => *guard = Some(PendingWake { reason: reason.into(), fire_at: now + coalesce }),
        }
    }

    /// Takes and clears the pending wake if its fire time has passed.
    pub async fn take_due(&self, now: DateTime<Utc>) -> Option<String> {
        let mut guard = self.state.lock().await;
        let due = guard.as_ref().map(|p| p.fire_at <= now).unwrap_or(false);
        if due {
            guard.take().map(|p| p.reason)
        } else {
            None
        }
    }

    pub async fn is_pending(&self) -> bool {
        self.state.lock().await.is_some()
    }
}

/// Why a heartbeat tick did or didn't produce a dispatched run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Ran and delivered a non-silent reply.
    Sent,
    /// Ran but the reply was silent (no delivery attempted).
    Silent,
    /// The run itself failed or was cancelled.
    RunFailed(String),
    /// Skipped before a run was even attempted, with the gate reason.
    Skipped(&'static str),
}

#[derive(Debug, Clone)]
pub struct HeartbeatTick {
    pub ts: DateTime<Utc>,
    pub outcome: HeartbeatOutcome,
    pub run_id: Option<String>,
}

/// Strips sentences that claim use of a tool outside `available_tools`
/// from a heartbeat reply (§4.6 "sanitize unavailable-tool claims") —
/// heartbeat prompts run with a restricted tool profile, and a model can
/// still narrate having used a tool (from `known_tools`) it was never
/// granted for this run.
pub fn sanitize_unavailable_tool_claims(text: &str, available_tools: &HashSet<String>, known_tools: &HashSet<String>) -> String {
    text.split_inclusive(['.', '\n'])
        .filter(|sentence| {
            let lower = sentence.to_lowercase();
            let claims_unavailable_tool = known_tools
                .iter()
                .filter(|tool| !available_tools.contains(tool.as_str()))
                .any(|tool| lower.contains(&tool.to_lowercase()));
            !claims_unavailable_tool
        })
        .collect::<Vec<_>>()
        .join("")
}

fn build_heartbeat_prompt(health_lines: &[String]) -> String {
    let mut prompt = String::from(
        "This is a scheduled heartbeat check-in, not a user message. Review pending work and system health. \
         If nothing needs attention, reply with exactly the configured silent-reply token and nothing else.",
    );
    if !health_lines.is_empty() {
        prompt.push_str("\n\nSystem health:\n");
        for line in health_lines {
            prompt.push_str("- ");
            prompt.push_str(line);
            prompt.push('\n');
        }
    }
    prompt
}

/// Gate inputs for one heartbeat evaluation (§4.6's four conditions):
/// enabled, interval configured, the `"main"` lane idle, and the minimum
/// inter-heartbeat interval elapsed.
pub struct GateInputs<'a> {
    pub cfg: &'a HeartbeatConfig,
    pub main_lane_size: u64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
}

pub fn evaluate_gate(inputs: &GateInputs<'_>) -> Result<(), &'static str> {
    if !inputs.cfg.enabled {
        return Err("heartbeats_disabled");
    }
    if parse_interval(&inputs.cfg.every).is_none() {
        return Err("interval_not_configured");
    }
    if inputs.main_lane_size > 0 {
        return Err("main_lane_busy");
    }
    if let Some(last) = inputs.last_success_at {
        let min_interval = ChronoDuration::minutes(inputs.cfg.min_interval_minutes as i64);
        if inputs.now - last < min_interval {
            return Err("min_interval_not_elapsed");
        }
    }
    Ok(())
}

/// Drives heartbeat ticks: owns the last-success timestamp and the
/// coalesced on-demand wake latch, and dispatches through an
/// [`AgentRunner`].
pub struct HeartbeatScheduler {
    runner: Arc<AgentRunner>,
    lane_queue: Arc<LaneQueue>,
    wake: CoalescedWake,
    last_success_at: AsyncMutex<Option<DateTime<Utc>>>,
    silent_predicate: Arc<dyn SilentReplyPredicate>,
}

impl HeartbeatScheduler {
    pub fn new(runner: Arc<AgentRunner>, lane_queue: Arc<LaneQueue>) -> Self {
        Self {
            runner,
            lane_queue,
            wake: CoalescedWake::new(),
            last_success_at: AsyncMutex::new(None),
            silent_predicate: Arc::new(TokenSilentPredicate::default()),
        }
    }

    pub fn with_silent_predicate(mut self, predicate: Arc<dyn SilentReplyPredicate>) -> Self {
        self.silent_predicate = predicate;
        self
    }

    /// Requests an out-of-cycle heartbeat (e.g. from a system event).
    /// Coalesces with any already-pending request within `coalesce_ms`.
    pub async fn request_now(&self, reason: impl Into<String>, now: DateTime<Utc>, coalesce_ms: u64) {
        self.wake.request(reason, now, ChronoDuration::milliseconds(coalesce_ms as i64)).await;
    }

    pub async fn has_pending_wake(&self) -> bool {
        self.wake.is_pending().await
    }

    /// Evaluates the gate and, if it passes, dispatches one heartbeat
    /// run. Does not itself schedule the periodic timer — callers (the
    /// binary's scheduler loop) decide cadence; this is the per-tick
    /// unit of work.
    pub async fn tick(&self, cfg: &HeartbeatConfig, now: DateTime<Utc>, health_lines: &[String]) -> HeartbeatTick {
        let last_success_at = *self.last_success_at.lock().await;
        let gate = GateInputs { cfg, main_lane_size: self.lane_queue.size("main"), last_success_at, now };

        if let Err(reason) = evaluate_gate(&gate) {
            return HeartbeatTick { ts: now, outcome: HeartbeatOutcome::Skipped(reason), run_id: None };
        }

        let agent_id = cfg.agent_id.clone().unwrap_or_else(|| "main".to_string());
        let prompt = build_heartbeat_prompt(health_lines);

        let mut req = RunRequest::new(agent_id, "heartbeat", prompt);
        req.source = RunSource::System;
        req.is_heartbeat = true;
        req.deliver = false;
        req.best_effort_deliver = true;
        req.channel = cfg.channel.clone();
        req.to = cfg.to.clone();

        let outcome = self.runner.run(req).await;

        if outcome.status != RunOutcomeStatus::Done {
            let message = outcome.error.clone().unwrap_or_else(|| "heartbeat run did not complete".to_string());
            return HeartbeatTick { ts: now, outcome: HeartbeatOutcome::RunFailed(message), run_id: Some(outcome.run_id) };
        }

        *self.last_success_at.lock().await = Some(now);

        let reply_text = first_text(&outcome.payloads).unwrap_or_default();
        if self.silent_predicate.is_silent(&reply_text) {
            return HeartbeatTick { ts: now, outcome: HeartbeatOutcome::Silent, run_id: Some(outcome.run_id) };
        }

        if let (Some(channel), Some(to)) = (cfg.channel.as_deref(), cfg.to.as_deref()) {
            if let Err(err) = self.runner.deliver(channel, to, None, &outcome.payloads, true).await {
                tracing::warn!(error = %err, "best-effort heartbeat delivery failed");
            }
        }

        HeartbeatTick { ts: now, outcome: HeartbeatOutcome::Sent, run_id: Some(outcome.run_id) }
    }
}

fn first_text(payloads: &[Payload]) -> Option<String> {
    payloads.iter().find_map(|p| p.text.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_interval_units() {
        assert_eq!(parse_interval("15m"), Some(ChronoDuration::minutes(15)));
        assert_eq!(parse_interval("2h"), Some(ChronoDuration::hours(2)));
        assert_eq!(parse_interval("30s"), Some(ChronoDuration::seconds(30)));
        assert_eq!(parse_interval("1d"), Some(ChronoDuration::days(1)));
        assert_eq!(parse_interval(""), None);
        assert_eq!(parse_interval("bogus"), None);
    }

    #[test]
    fn sanitize_strips_sentences_claiming_ungranted_tools() {
        let mut known = HashSet::new();
        known.insert("browser".to_string());
        known.insert("shell".to_string());
        let mut available = HashSet::new();
        available.insert("shell".to_string());

        let text = "Ran shell checks, all green. Also used the browser tool to verify uptime.";
        let sanitized = sanitize_unavailable_tool_claims(text, &available, &known);
        assert!(sanitized.contains("Ran shell checks"));
        assert!(!sanitized.contains("browser"));
    }

    #[test]
    fn token_predicate_matches_trimmed_case_insensitive_token_or_empty() {
        let pred = TokenSilentPredicate::default();
        assert!(pred.is_silent(""));
        assert!(pred.is_silent("   "));
        assert!(pred.is_silent("heartbeat_ok"));
        assert!(pred.is_silent("  HEARTBEAT_OK  "));
        assert!(!pred.is_silent("found 3 failing jobs"));
    }

    #[test]
    fn gate_skips_when_disabled() {
        let cfg = HeartbeatConfig { enabled: false, ..default_cfg() };
        let gate = GateInputs { cfg: &cfg, main_lane_size: 0, last_success_at: None, now: Utc::now() };
        assert_eq!(evaluate_gate(&gate), Err("heartbeats_disabled"));
    }

    #[test]
    fn gate_skips_when_main_lane_busy() {
        let cfg = default_cfg();
        let gate = GateInputs { cfg: &cfg, main_lane_size: 1, last_success_at: None, now: Utc::now() };
        assert_eq!(evaluate_gate(&gate), Err("main_lane_busy"));
    }

    #[test]
    fn gate_skips_when_min_interval_not_elapsed() {
        let cfg = default_cfg();
        let now = Utc::now();
        let gate = GateInputs { cfg: &cfg, main_lane_size: 0, last_success_at: Some(now - ChronoDuration::minutes(1)), now };
        assert_eq!(evaluate_gate(&gate), Err("min_interval_not_elapsed"));
    }

    #[test]
    fn gate_passes_when_interval_elapsed_and_lane_idle() {
        let cfg = default_cfg();
        let now = Utc::now();
        let gate = GateInputs { cfg: &cfg, main_lane_size: 0, last_success_at: Some(now - ChronoDuration::minutes(20)), now };
        assert!(evaluate_gate(&gate).is_ok());
    }

    #[tokio::test]
    async fn coalesced_wake_collapses_repeated_requests_into_one_fire_with_latest_reason() {
        let wake = CoalescedWake::new();
        let t0 = Utc::now();
        wake.request("first", t0, ChronoDuration::milliseconds(2000)).await;
        wake.request("second", t0 + ChronoDuration::milliseconds(500), ChronoDuration::milliseconds(2000)).await;

        assert!(wake.take_due(t0 + ChronoDuration::milliseconds(1000)).await.is_none());
        let reason = wake.take_due(t0 + ChronoDuration::milliseconds(2001)).await;
        assert_eq!(reason.as_deref(), Some("second"));
        assert!(!wake.is_pending().await);
    }

    fn default_cfg() -> HeartbeatConfig {
        HeartbeatConfig {
            enabled: true,
            every: "15m".to_string(),
            min_interval_minutes: 10,
            coalesce_ms: 2000,
            agent_id: None,
            channel: None,
            to: None,
        }
    }
}

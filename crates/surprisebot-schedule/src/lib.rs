//! Heartbeat, cron, and system-event scheduling (§4.6, §4.7): the timers
//! that originate synthetic runs instead of an inbound channel message,
//! all driving the same [`surprisebot_runner::AgentRunner`] pipeline.

pub mod cron;
pub mod heartbeat;
pub mod queue;
pub mod system_events;

pub use cron::{build_triggers, due_requests, CronParseError, CronSchedule, CronTrigger, FieldMatch};
pub use heartbeat::{
    evaluate_gate, parse_interval, sanitize_unavailable_tool_claims, CoalescedWake, GateInputs, HeartbeatOutcome,
    HeartbeatScheduler, HeartbeatTick, SilentReplyPredicate, TokenSilentPredicate,
};
pub use queue::{LaneGuard, LaneQueue};
pub use system_events::{SystemEvent, SystemEventKey, SystemEventQueue};

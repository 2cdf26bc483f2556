//! Agent runner (§4.5): the central orchestrator. Consumes a [`RunRequest`],
//! resolves the session/model/tool/budget policy, executes the turn with
//! failover, applies the tool-result retry policies, persists session and
//! ledger state, and hands the resulting payloads to delivery.

pub mod compaction;
pub mod delivery;
pub mod events;
pub mod executor;
pub mod messaging_dedup;
pub mod retry;
pub mod runner;
pub mod types;

pub use compaction::{reset_session_for_compaction_failure, CompactionOutcome};
pub use delivery::{deliver_with_best_effort, DeliveryError, DeliverySink, NullDeliverySink};
pub use events::AgentEventBus;
pub use executor::{DualExecutor, ModelExecutor};
pub use messaging_dedup::MessagingDedupTracker;
pub use retry::{evaluate_retry, strict_recheck, RetryReason, ToolResultsPolicy};
pub use runner::{AgentRunner, AllowAllSendPolicy, RunError, RunnerDeps, SendPolicy};
pub use types::{
    AgentRunMeta, ExecutorArgs, ExecutorOutcome, Payload, RunOutcome, RunOutcomeStatus, RunRequest,
    ToolResultsMeta,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunSource {
    Interactive,
    Cron,
    System,
    Hook,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Done,
    Failed,
    Cancelled,
}

/// Append-only run record. Readers MUST collapse records sharing `id` to the
/// one with the latest `ts` (§3, §5) — never assume one record per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLedgerRecord {
    pub id: String,
    pub ts: DateTime<Utc>,
    pub source: RunSource,
    pub status: RunStatus,
    pub agent_id: String,
    pub job_type: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub estimated_tokens: u64,
    #[serde(default)]
    pub meta: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetScope {
    Global,
    Agent,
    Job,
    Run,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetDecision {
    // Ordered so that `max` picks the most restrictive decision: the
    // budget manager collapses per-scope decisions as deny > defer >
    // throttle > allow, so Allow must sort lowest.
    Allow,
    Throttle,
    Defer,
    Deny,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetLedgerRecord {
    pub id: String,
    pub ts: DateTime<Utc>,
    pub scope: BudgetScope,
    pub scope_id: String,
    pub decision: BudgetDecision,
    pub reason: String,
    pub budget_snapshot: Value,
    #[serde(default)]
    pub meta: Value,
}

/// A kind of JSONL ledger record. Each kind has its own required-field set
/// used by `surprisebot-ledger`'s validator at write time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerKind {
    Tasks,
    Messages,
    Activities,
    Documents,
    Notifications,
    Subscriptions,
    Signals,
    RunLedger,
    BudgetLedger,
}

impl LedgerKind {
    pub fn file_name(self) -> &'static str {
        match self {
            LedgerKind::Tasks => "tasks.jsonl",
            LedgerKind::Messages => "messages.jsonl",
            LedgerKind::Activities => "activities.jsonl",
            LedgerKind::Documents => "documents.jsonl",
            LedgerKind::Notifications => "notifications.jsonl",
            LedgerKind::Subscriptions => "subscriptions.jsonl",
            LedgerKind::Signals => "signals.jsonl",
            LedgerKind::RunLedger => "run-ledger.jsonl",
            LedgerKind::BudgetLedger => "budget-ledger.jsonl",
        }
    }

    /// Field names every record of this kind must carry, beyond the common
    /// `{id, ts}` envelope every kind shares.
    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            LedgerKind::Tasks => &["title", "status"],
            LedgerKind::Messages => &["task_id", "body"],
            LedgerKind::Activities => &["kind"],
            LedgerKind::Documents => &["title"],
            LedgerKind::Notifications => &["target_kind", "target_id"],
            LedgerKind::Subscriptions => &["task_id", "agent_id"],
            LedgerKind::Signals => &["source", "summary"],
            LedgerKind::RunLedger => &["source", "status", "agent_id", "job_type"],
            LedgerKind::BudgetLedger => &["scope", "scope_id", "decision", "reason"],
        }
    }
}

//! Typed view over the merged config value. The resolver deserializes the
//! layered store's effective JSON into this struct so the runner, model
//! selector, and budget manager consume `ResolvedConfig` rather than
//! `serde_json::Value` (§9 "dynamic config typing" design note).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use surprisebot_types::ToolPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateRef {
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default)]
    pub default_provider: Option<String>,
    #[serde(default)]
    pub default_model: Option<String>,
    /// When set, only candidates in this list (besides the requested and
    /// default pair) survive candidate construction (§4.2).
    #[serde(default)]
    pub allow_list: Option<Vec<CandidateRef>>,
    #[serde(default)]
    pub fallbacks: Vec<CandidateRef>,
    /// Providers whose candidates are CLI backends (subject to cool-down
    /// filtering, §4.2.1) rather than embedded.
    #[serde(default)]
    pub cli_providers: Vec<String>,
    /// Providers that do not support `ThinkingLevel::Xhigh` — the runner
    /// downgrades a resolved `xhigh` to `high` for these (§4.5 "resolve
    /// thinking").
    #[serde(default)]
    pub xhigh_unsupported_providers: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub global: ToolPolicy,
    #[serde(default)]
    pub by_provider: BTreeMap<String, ToolPolicy>,
    #[serde(default)]
    pub by_agent: BTreeMap<String, ToolPolicy>,
    /// Keyed `"<agentId>/<provider>"`.
    #[serde(default)]
    pub by_agent_provider: BTreeMap<String, ToolPolicy>,
    #[serde(default)]
    pub sandbox: Option<ToolPolicy>,
    #[serde(default)]
    pub subagent_profiles: BTreeMap<String, ToolPolicy>,
    /// Path to the shared-memory file the write guard protects (§4.3), and
    /// the agent ids allowed to write to it.
    #[serde(default)]
    pub shared_memory_path: Option<String>,
    #[serde(default)]
    pub shared_memory_allow_write: Vec<String>,
}

fn default_window_hours() -> u64 {
    24
}

fn default_hard_pct() -> f64 {
    100.0
}

fn default_warn_pct() -> f64 {
    80.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementMode {
    Soft,
    Hard,
}

impl Default for EnforcementMode {
    fn default() -> Self {
        EnforcementMode::Soft
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetScopeConfig {
    #[serde(default = "default_window_hours")]
    pub window_hours: u64,
    #[serde(default)]
    pub run_limit: Option<u64>,
    #[serde(default)]
    pub token_limit: Option<u64>,
    #[serde(default)]
    pub concurrency_limit: Option<u64>,
    #[serde(default)]
    pub query_limit: Option<u64>,
    #[serde(default)]
    pub max_runtime_seconds: Option<u64>,
    #[serde(default)]
    pub max_output_chars: Option<u64>,
    #[serde(default)]
    pub token_estimate: Option<u64>,
    #[serde(default)]
    pub enforcement: EnforcementMode,
    #[serde(default = "default_warn_pct")]
    pub warn_pct: f64,
    #[serde(default = "default_hard_pct")]
    pub hard_pct: f64,
}

impl Default for BudgetScopeConfig {
    fn default() -> Self {
        Self {
            window_hours: default_window_hours(),
            run_limit: None,
            token_limit: None,
            concurrency_limit: None,
            query_limit: None,
            max_runtime_seconds: None,
            max_output_chars: None,
            token_estimate: None,
            enforcement: EnforcementMode::Soft,
            warn_pct: default_warn_pct(),
            hard_pct: default_hard_pct(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BudgetsConfig {
    #[serde(default)]
    pub global: BudgetScopeConfig,
    #[serde(default)]
    pub by_job_type: BTreeMap<String, BudgetScopeConfig>,
    #[serde(default)]
    pub by_agent: BTreeMap<String, BudgetScopeConfig>,
}

fn default_heartbeat_every() -> String {
    "15m".to_string()
}

fn default_min_interval_minutes() -> u64 {
    10
}

fn default_coalesce_ms() -> u64 {
    2_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_heartbeat_every")]
    pub every: String,
    #[serde(default = "default_min_interval_minutes")]
    pub min_interval_minutes: u64,
    #[serde(default = "default_coalesce_ms")]
    pub coalesce_ms: u64,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            every: default_heartbeat_every(),
            min_interval_minutes: default_min_interval_minutes(),
            coalesce_ms: default_coalesce_ms(),
            agent_id: None,
            channel: None,
            to: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJobPayload {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub thinking: Option<String>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub deliver: bool,
    #[serde(default)]
    pub best_effort_deliver: bool,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJobConfig {
    pub id: String,
    pub name: String,
    pub cron_expr: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub job_type: Option<String>,
    pub payload: CronJobPayload,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrustConfig {
    #[serde(default)]
    pub by_source: BTreeMap<String, String>,
    #[serde(default)]
    pub quarantine_sources: Vec<String>,
    #[serde(default = "default_trust_tier")]
    pub default_tier: String,
}

fn default_trust_tier() -> String {
    "unverified".to_string()
}

fn default_keep_days() -> u64 {
    7
}

fn default_min_bytes() -> u64 {
    4096
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollupConfig {
    #[serde(default = "default_keep_days")]
    pub keep_days: u64,
    #[serde(default = "default_min_bytes")]
    pub min_bytes: u64,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            keep_days: default_keep_days(),
            min_bytes: default_min_bytes(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MissionControlConfig {
    #[serde(default)]
    pub trust: TrustConfig,
    #[serde(default)]
    pub rollup: RollupConfig,
    #[serde(default)]
    pub qa_agent_id: Option<String>,
    #[serde(default)]
    pub default_agent_id: Option<String>,
    #[serde(default)]
    pub min_evidence_count: Option<u64>,
    #[serde(default)]
    pub kill_switch: bool,
}

/// Tool-result retry/strict policy (§4.5.1), resolved from config rather
/// than hard-coded so an operator can disable any of the three rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultsPolicyConfig {
    #[serde(default = "default_true")]
    pub retry_once: bool,
    #[serde(default = "default_true")]
    pub warn_on_missing: bool,
    #[serde(default)]
    pub require_tool_for_queries: bool,
    #[serde(default)]
    pub strict: bool,
}

impl Default for ToolResultsPolicyConfig {
    fn default() -> Self {
        Self {
            retry_once: true,
            warn_on_missing: true,
            require_tool_for_queries: false,
            strict: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default)]
    pub tool_results: ToolResultsPolicyConfig,
    /// Appends a trailing usage summary line (tokens/model) to delivered
    /// replies when enabled.
    #[serde(default)]
    pub show_usage_line: bool,
    #[serde(default)]
    pub default_job_type: Option<String>,
    /// Whether a compaction failure resets the session identity and
    /// retries once (§4.5.3). Disabling this surfaces the compaction
    /// failure as a run failure instead.
    #[serde(default = "default_true")]
    pub reset_session_on_compaction_failure: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolvedConfig {
    #[serde(default)]
    pub state_dir: Option<String>,
    #[serde(default)]
    pub allow_unsafe_workspace: bool,
    #[serde(default)]
    pub skills_roots: Vec<String>,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub budgets: BudgetsConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub cron: Vec<CronJobConfig>,
    #[serde(default)]
    pub mission_control: MissionControlConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
}

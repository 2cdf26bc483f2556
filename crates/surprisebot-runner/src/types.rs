use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use surprisebot_types::{ResponseUsage, SessionKey, ThinkingLevel, VerboseLevel};
use tokio_util::sync::CancellationToken;

/// A single outbound payload produced by a run — text, an image, or
/// another media kind the channel adapter knows how to render. The
/// rendering pipeline itself (markdown/block formatting) is an external
/// collaborator (§1); this is the opaque unit that crosses that boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub meta: Value,
}

impl Payload {
    pub fn text(body: impl Into<String>) -> Self {
        Self { kind: "text".to_string(), text: Some(body.into()), meta: Value::Null }
    }

    /// Normalized form used by messaging-tool dedup (§4.5.2): trimmed and
    /// whitespace-collapsed.
    pub fn normalized_text(&self) -> Option<String> {
        self.text.as_ref().map(|t| t.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase())
    }
}

/// Inbound arguments to a single run (§4.5).
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub session_key: Option<SessionKey>,
    pub to: Option<String>,
    pub session_id: Option<String>,
    pub message: String,
    pub images: Vec<String>,
    pub thinking: Option<ThinkingLevel>,
    pub verbose: Option<VerboseLevel>,
    pub timeout_sec: Option<u64>,
    pub lane: Option<String>,
    pub run_id: Option<String>,
    pub deliver: bool,
    pub extra_system_prompt: Option<String>,
    pub abort: CancellationToken,
    pub agent_id: String,
    pub job_type: String,
    pub source: surprisebot_types::RunSource,
    pub channel: Option<String>,
    pub account_id: Option<String>,
    pub is_heartbeat: bool,
    pub best_effort_deliver: bool,
    /// Named tool profile (e.g. a subagent profile configured under
    /// `tools.subagent_profiles`) layered into this run's tool policy
    /// resolution (§4.3), on top of the global/agent/provider layers.
    pub tool_profile: Option<String>,
}

impl RunRequest {
    pub fn new(agent_id: impl Into<String>, job_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            session_key: None,
            to: None,
            session_id: None,
            message: message.into(),
            images: Vec::new(),
            thinking: None,
            verbose: None,
            timeout_sec: None,
            lane: None,
            run_id: None,
            deliver: false,
            extra_system_prompt: None,
            abort: CancellationToken::new(),
            agent_id: agent_id.into(),
            job_type: job_type.into(),
            source: surprisebot_types::RunSource::Interactive,
            channel: None,
            account_id: None,
            is_heartbeat: false,
            best_effort_deliver: false,
            tool_profile: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolResultsMeta {
    pub started: u64,
    pub pending: Vec<String>,
    pub ended: u64,
}

#[derive(Debug, Clone)]
pub struct AgentRunMeta {
    pub usage: ResponseUsage,
    pub provider: String,
    pub model: String,
    pub session_id: String,
    pub tool_results: ToolResultsMeta,
    pub cli_session_id: Option<String>,
    /// Set by the executor when it surfaces an `auto_compaction_*`
    /// lifecycle event that ultimately failed (§4.5.3).
    pub compaction_failed: bool,
}

#[derive(Debug, Clone)]
pub struct ExecutorArgs {
    pub session_id: String,
    pub session_key: SessionKey,
    pub session_file: String,
    pub workspace_dir: String,
    pub prompt: String,
    pub images: Vec<String>,
    pub provider: String,
    pub model: String,
    pub think_level: ThinkingLevel,
    pub verbose_level: VerboseLevel,
    pub timeout_ms: u64,
    pub run_id: String,
    pub lane: Option<String>,
    pub extra_system_prompt: Option<String>,
    pub abort: CancellationToken,
    /// Tool names this invocation may call, resolved by
    /// [`surprisebot_policy::resolve_tool_set`] before execution (§4.3).
    pub allowed_tools: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct ExecutorOutcome {
    pub payloads: Vec<Payload>,
    pub reply_text: String,
    pub meta: AgentRunMeta,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcomeStatus {
    Done,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunOutcomeStatus,
    pub payloads: Vec<Payload>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub usage: Option<ResponseUsage>,
    pub error: Option<String>,
    pub session_key: SessionKey,
    pub run_id: String,
}

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session_key::SessionKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingLevel {
    Off,
    Low,
    Medium,
    High,
    Xhigh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerboseLevel {
    On,
    Off,
}

/// Token usage reported by a completed provider call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    #[serde(default)]
    pub cache_write_tokens: u64,
}

/// Persisted state for one session scope, keyed externally by [`SessionKey`].
///
/// Unknown fields present in a stored record (e.g. written by a newer
/// process version) round-trip via `#[serde(flatten)]` on `extra` rather
/// than being silently dropped, matching the "unknown fields preserved on
/// write" requirement for the session store file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    pub session_id: String,
    pub session_file: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub model_provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub context_tokens: u64,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default = "default_thinking_level")]
    pub thinking_level: ThinkingLevel,
    #[serde(default = "default_verbose_level")]
    pub verbose_level: VerboseLevel,
    #[serde(default)]
    pub provider_override: Option<String>,
    #[serde(default)]
    pub model_override: Option<String>,
    #[serde(default)]
    pub auth_profile_override: Option<String>,
    #[serde(default)]
    pub cli_session_ids: HashMap<String, String>,
    #[serde(default)]
    pub skills_snapshot: Vec<String>,
    #[serde(default)]
    pub system_sent: bool,
    #[serde(default)]
    pub aborted_last_run: bool,
    #[serde(default)]
    pub group_activation_needs_system_intro: bool,
    #[serde(default)]
    pub memory_capture_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub memory_capture_token_count: u64,
    #[serde(default)]
    pub last_channel: Option<String>,
    #[serde(default)]
    pub last_to: Option<String>,
    #[serde(default)]
    pub last_account_id: Option<String>,
    #[serde(default)]
    pub response_usage: Option<ResponseUsage>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_thinking_level() -> ThinkingLevel {
    ThinkingLevel::Off
}

fn default_verbose_level() -> VerboseLevel {
    VerboseLevel::Off
}

impl SessionEntry {
    pub fn new(session_file: String) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            session_file,
            updated_at: Utc::now(),
            model_provider: None,
            model: None,
            context_tokens: 0,
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
            thinking_level: ThinkingLevel::Off,
            verbose_level: VerboseLevel::Off,
            provider_override: None,
            model_override: None,
            auth_profile_override: None,
            cli_session_ids: HashMap::new(),
            skills_snapshot: Vec::new(),
            system_sent: false,
            aborted_last_run: false,
            group_activation_needs_system_intro: false,
            memory_capture_at: None,
            memory_capture_token_count: 0,
            last_channel: None,
            last_to: None,
            last_account_id: None,
            response_usage: None,
            display_name: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Invariant check: `totalTokens >= inputTokens + cacheRead + cacheWrite`
    /// whenever usage has been recorded.
    pub fn tokens_consistent(&self) -> bool {
        let Some(usage) = &self.response_usage else {
            return true;
        };
        self.total_tokens >= usage.input_tokens + usage.cache_read_tokens + usage.cache_write_tokens
    }
}

/// A resolved transcript header line written at the start of every
/// `<sessionId>.jsonl` transcript file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptHeader {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "sessionKey")]
    pub session_key: String,
    #[serde(rename = "parentSession", skip_serializing_if = "Option::is_none")]
    pub parent_session: Option<String>,
    #[serde(rename = "displayName", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// Parsed view of a [`SessionKey`] used by session-store callers that need
/// structured access rather than raw string splitting.
pub struct ParsedSessionKey<'a> {
    pub agent_id: Option<&'a str>,
    pub surface: Option<&'a str>,
    pub thread_id: Option<&'a str>,
}

impl<'a> From<&'a SessionKey> for ParsedSessionKey<'a> {
    fn from(key: &'a SessionKey) -> Self {
        Self {
            agent_id: key.agent_id(),
            surface: key.surface(),
            thread_id: key.thread_id(),
        }
    }
}

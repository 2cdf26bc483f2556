use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentEventStream {
    Lifecycle,
    Tool,
    Compaction,
    Block,
    Error,
}

/// One tuple on the per-`runId` agent-events stream (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    pub ts: DateTime<Utc>,
    pub stream: AgentEventStream,
    pub data: Value,
}

impl AgentEvent {
    pub fn new(stream: AgentEventStream, data: Value) -> Self {
        Self {
            ts: Utc::now(),
            stream,
            data,
        }
    }
}

/// General-purpose engine event published on the process-wide event bus,
/// generalized from the teacher's `EngineEvent` (`{id, type, properties}`)
/// so session/permission/run observers share one envelope shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub properties: Value,
}

impl EngineEvent {
    pub fn new(event_type: impl Into<String>, properties: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            properties,
        }
    }
}

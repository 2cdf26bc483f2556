//! Outbound delivery interface (§6) — the boundary between the runner and
//! the real channel adapters (WhatsApp/Telegram/Slack/Discord/Signal/…),
//! which are explicitly out of scope (§1) and live outside this
//! workspace. This crate only defines the `Channel`/`SendMessage`-style
//! trait boundary the runner dispatches through, generalized from the
//! teacher's `tandem-channels::dispatcher` keying convention
//! (`{channel_name}:{sender_id}` → session), plus an in-memory test
//! double so the runner and its tests don't need a live adapter.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use surprisebot_runner::{DeliveryError, DeliverySink, Payload};
use tokio::sync::Mutex;

/// One inbound message as a channel adapter would report it, before it is
/// translated into a [`surprisebot_runner::RunRequest`]. Mirrors the
/// teacher's `ChannelMessage` shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub channel: String,
    pub sender: String,
    pub thread_id: Option<String>,
    pub text: String,
}

impl ChannelMessage {
    /// `{channel_name}:{sender_id}` — the dispatcher's session-mapping key.
    pub fn dispatch_key(&self) -> String {
        format!("{}:{}", self.channel, self.sender)
    }
}

/// A single send-message operation a channel adapter exposes. Real
/// adapters implement this against their own wire protocol; the core
/// orchestrator only ever calls through [`DeliverySink`] (§6), which this
/// trait backs.
#[async_trait]
pub trait SendMessage: Send + Sync {
    async fn send(&self, to: &str, payloads: &[Payload]) -> Result<(), DeliveryError>;
}

/// Routes a [`DeliverySink::deliver`] call to the adapter registered under
/// `channel`. Unknown channels are a delivery error, not a panic — a
/// misconfigured or not-yet-wired channel must not crash the run.
pub struct ChannelRegistry {
    adapters: HashMap<String, Arc<dyn SendMessage>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self { adapters: HashMap::new() }
    }

    pub fn register(&mut self, channel: impl Into<String>, adapter: Arc<dyn SendMessage>) {
        self.adapters.insert(channel.into(), adapter);
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeliverySink for ChannelRegistry {
    async fn deliver(
        &self,
        channel: &str,
        to: &str,
        _account_id: Option<&str>,
        payloads: &[Payload],
    ) -> Result<(), DeliveryError> {
        let Some(adapter) = self.adapters.get(channel) else {
            return Err(DeliveryError(format!("no channel adapter registered for `{channel}`")));
        };
        adapter.send(to, payloads).await
    }
}

/// An in-memory channel double: every delivered payload is appended to a
/// shared buffer instead of crossing a real wire. Used by heartbeat/cron
/// dry runs and integration tests that need to assert on what would have
/// been sent without standing up a real adapter.
#[derive(Clone, Default)]
pub struct RecordingChannel {
    sent: Arc<Mutex<Vec<(String, Vec<Payload>)>>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<(String, Vec<Payload>)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl SendMessage for RecordingChannel {
    async fn send(&self, to: &str, payloads: &[Payload]) -> Result<(), DeliveryError> {
        self.sent.lock().await.push((to.to_string(), payloads.to_vec()));
        Ok(())
    }
}

/// A channel double that always fails — used to exercise §7's
/// best-effort delivery semantics.
pub struct FailingChannel;

#[async_trait]
impl SendMessage for FailingChannel {
    async fn send(&self, _to: &str, _payloads: &[Payload]) -> Result<(), DeliveryError> {
        Err(DeliveryError("simulated adapter failure".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_routes_to_the_registered_channel() {
        let mut registry = ChannelRegistry::new();
        let recorder = Arc::new(RecordingChannel::new());
        registry.register("telegram", recorder.clone());

        registry
            .deliver("telegram", "chat-1", None, &[Payload::text("hi")])
            .await
            .unwrap();

        let sent = recorder.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "chat-1");
    }

    #[tokio::test]
    async fn unknown_channel_is_a_delivery_error_not_a_panic() {
        let registry = ChannelRegistry::new();
        let err = registry.deliver("whatsapp", "chat-1", None, &[]).await.unwrap_err();
        assert!(err.0.contains("whatsapp"));
    }

    #[test]
    fn dispatch_key_matches_channel_colon_sender_convention() {
        let msg = ChannelMessage {
            channel: "slack".to_string(),
            sender: "U123".to_string(),
            thread_id: None,
            text: "hi".to_string(),
        };
        assert_eq!(msg.dispatch_key(), "slack:U123");
    }
}

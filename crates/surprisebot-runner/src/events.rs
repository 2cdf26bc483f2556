//! Per-`runId` agent-events stream (§6, §9 "event bus"). Generalizes the
//! teacher's process-wide `EventBus::publish`/single `broadcast` channel
//! into one bounded channel per subscriber, keyed by `runId`, with the
//! `lifecycle|tool|compaction|block|error` stream discriminator. A
//! subscriber that falls behind drops non-lifecycle events rather than
//! blocking the publisher or losing a terminal lifecycle event (§9).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use surprisebot_types::{AgentEvent, AgentEventStream};
use tokio::sync::{mpsc, Mutex};

const SUBSCRIBER_CAPACITY: usize = 256;

struct Subscriber {
    tx: mpsc::Sender<AgentEvent>,
    dropped: u64,
}

/// Tracks one channel per active `runId`. The runner publishes lifecycle
/// events through this bus and is responsible (per §6) for ensuring a
/// terminal `lifecycle.end`/`lifecycle.error` is always emitted for every
/// `lifecycle.start`, then calling [`AgentEventBus::clear`].
#[derive(Clone, Default)]
pub struct AgentEventBus {
    subscribers: Arc<Mutex<HashMap<String, Vec<Subscriber>>>>,
}

impl AgentEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to a `runId`'s stream, returning the receiving half of a
    /// bounded channel.
    pub async fn subscribe(&self, run_id: &str) -> mpsc::Receiver<AgentEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        let mut subs = self.subscribers.lock().await;
        subs.entry(run_id.to_string()).or_default().push(Subscriber { tx, dropped: 0 });
        rx
    }

    /// Publishes to every subscriber of `run_id`. Lifecycle events are
    /// never dropped — channel capacity is large enough in practice, and a
    /// full channel on a lifecycle event is an anomaly worth logging
    /// rather than silently discarding. Non-lifecycle events (tool
    /// updates) are best-effort: a full channel drops them and increments
    /// a counter instead of backpressuring the run.
    pub async fn publish(&self, run_id: &str, stream: AgentEventStream, data: Value) {
        let event = AgentEvent::new(stream, data);
        let mut subs = self.subscribers.lock().await;
        let Some(list) = subs.get_mut(run_id) else {
            return;
        };
        for sub in list.iter_mut() {
            match sub.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) if !matches!(stream, AgentEventStream::Lifecycle) => {
                    sub.dropped += 1;
                }
                Err(mpsc::error::TrySendError::Full(ev)) => {
                    // Lifecycle events block briefly rather than drop.
                    let tx = sub.tx.clone();
                    tokio::spawn(async move {
                        let _ = tx.send(ev).await;
                    });
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }

    /// Drops every subscriber for `run_id`. Called by the runner once the
    /// terminal lifecycle event has been published.
    pub async fn clear(&self, run_id: &str) {
        self.subscribers.lock().await.remove(run_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscriber_receives_published_events() {
        let bus = AgentEventBus::new();
        let mut rx = bus.subscribe("run-1").await;
        bus.publish("run-1", AgentEventStream::Lifecycle, json!({"phase": "start"})).await;
        let event = rx.recv().await.unwrap();
        assert!(matches!(event.stream, AgentEventStream::Lifecycle));
    }

    #[tokio::test]
    async fn clear_removes_subscribers_for_run_id() {
        let bus = AgentEventBus::new();
        let mut rx = bus.subscribe("run-1").await;
        bus.clear("run-1").await;
        bus.publish("run-1", AgentEventStream::Lifecycle, json!({})).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unrelated_run_id_is_unaffected() {
        let bus = AgentEventBus::new();
        let mut rx_a = bus.subscribe("run-a").await;
        let _rx_b = bus.subscribe("run-b").await;
        bus.publish("run-b", AgentEventStream::Tool, json!({})).await;
        assert!(rx_a.try_recv().is_err());
    }
}

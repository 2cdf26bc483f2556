//! System-event queue (§4.7): external events (file changes, webhook
//! pings, …) destined for a particular session/context. Multiple events
//! for the same `(session_key, context_key)` pair collapse to the latest
//! message rather than queuing duplicates — the next run only needs to
//! know the freshest state, not every intermediate one.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SystemEventKey {
    pub session_key: String,
    pub context_key: String,
}

#[derive(Debug, Clone)]
pub struct SystemEvent {
    pub session_key: String,
    pub context_key: String,
    pub message: String,
    pub meta: Value,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct SystemEventQueue {
    pending: Mutex<HashMap<SystemEventKey, SystemEvent>>,
}

impl SystemEventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues an event, overwriting any pending event already queued
    /// for the same `(session_key, context_key)` pair.
    pub fn enqueue(&self, event: SystemEvent) {
        let key = SystemEventKey { session_key: event.session_key.clone(), context_key: event.context_key.clone() };
        self.pending.lock().expect("system event queue mutex poisoned").insert(key, event);
    }

    /// Removes and returns all pending events, in no particular order.
    pub fn drain(&self) -> Vec<SystemEvent> {
        self.pending.lock().expect("system event queue mutex poisoned").drain().map(|(_, v)| v).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().expect("system event queue mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

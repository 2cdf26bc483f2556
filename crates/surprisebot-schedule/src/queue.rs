//! Per-lane pending-count tracker. The heartbeat gate (§4.6) checks the
//! `"main"` lane's size before dispatching a synthetic run, so the
//! heartbeat never competes with an in-flight interactive turn.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct LaneQueue {
    counts: Mutex<HashMap<String, u64>>,
}

impl LaneQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks one unit of work as entering `lane`. Returns the new size.
    pub fn enter(&self, lane: &str) -> u64 {
        let mut counts = self.counts.lock().expect("lane queue mutex poisoned");
        let entry = counts.entry(lane.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Marks one unit of work as leaving `lane`. Saturates at zero rather
    /// than underflowing on an unmatched `leave`.
    pub fn leave(&self, lane: &str) -> u64 {
        let mut counts = self.counts.lock().expect("lane queue mutex poisoned");
        let entry = counts.entry(lane.to_string()).or_insert(0);
        *entry = entry.saturating_sub(1);
        *entry
    }

    pub fn size(&self, lane: &str) -> u64 {
        let counts = self.counts.lock().expect("lane queue mutex poisoned");
        counts.get(lane).copied().unwrap_or(0)
    }
}

/// RAII guard returned by [`LaneQueue::enter`]-and-hold helpers in callers
/// that want automatic `leave` on drop. Kept minimal; callers that just
/// need enter/leave counts can use the plain methods above.
pub struct LaneGuard<'a> {
    queue: &'a LaneQueue,
    lane: String,
}

impl<'a> LaneGuard<'a> {
    pub fn acquire(queue: &'a LaneQueue, lane: impl Into<String>) -> Self {
        let lane = lane.into();
        queue.enter(&lane);
        Self { queue, lane }
    }
}

impl Drop for LaneGuard<'_> {
    fn drop(&mut self) {
        self.queue.leave(&self.lane);
    }
}

use std::sync::atomic::{AtomicU64, Ordering};

use crate::session_key::SessionKey;

/// Per-session-key ephemeral state for the duration of one run. `query_count`
/// is incremented by tool invocations for mid-run budget enforcement
/// (§4.4's `resolveBudgetCaps`).
pub struct JobContext {
    pub session_key: SessionKey,
    pub job_type: String,
    pub run_id: String,
    pub started_at_ms: i64,
    query_count: AtomicU64,
}

impl JobContext {
    pub fn new(session_key: SessionKey, job_type: String, run_id: String, started_at_ms: i64) -> Self {
        Self {
            session_key,
            job_type,
            run_id,
            started_at_ms,
            query_count: AtomicU64::new(0),
        }
    }

    pub fn record_query(&self) -> u64 {
        self.query_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn query_count(&self) -> u64 {
        self.query_count.load(Ordering::SeqCst)
    }
}

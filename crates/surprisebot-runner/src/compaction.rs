//! Auto-compaction handling (§4.5.3). The embedded executor reports
//! `auto_compaction_start`/`auto_compaction_end` through its event
//! stream; the runner owns the resulting state transition
//! (`running → compaction_failed → reset → running'`) per §9's design
//! note — the executor reports, it never mutates session identity itself.

use surprisebot_types::SessionEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// `auto_compaction_end` with `willRetry=true`: the run state resets
    /// for an in-place retry and the retry counter increments.
    WillRetry,
    /// `auto_compaction_end` with `willRetry=false`: a pending wait (if
    /// any) resolves and the run continues normally.
    Resolved,
    /// The executor surfaced a compaction failure (e.g. it exceeded its
    /// own retry budget). The runner must reset the session identity.
    Failed,
}

/// Applies the session-reset half of a [`CompactionOutcome::Failed`]:
/// allocates a new `sessionId` and clears `systemSent` so the next attempt
/// re-sends a full system prompt. The caller is responsible for actually
/// retrying the run exactly once after calling this.
pub fn reset_session_for_compaction_failure(entry: &mut SessionEntry) {
    entry.session_id = uuid::Uuid::new_v4().to_string();
    entry.system_sent = false;
}

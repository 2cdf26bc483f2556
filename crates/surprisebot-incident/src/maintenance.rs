//! Mission-control ledger maintenance (§4.11): periodic rollup of aged
//! ledger records into dated archive files, and a daily pass that prunes
//! duplicate incidents (and cascades the prune to anything created from
//! them).

use std::collections::{HashMap, HashSet};
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use surprisebot_ledger::LedgerStore;
use surprisebot_types::LedgerKind;
use tokio::io::AsyncWriteExt;

use crate::db::MissionControlDb;

const ALL_KINDS: &[LedgerKind] = &[
    LedgerKind::Tasks,
    LedgerKind::Messages,
    LedgerKind::Activities,
    LedgerKind::Documents,
    LedgerKind::Notifications,
    LedgerKind::Subscriptions,
    LedgerKind::Signals,
    LedgerKind::RunLedger,
    LedgerKind::BudgetLedger,
];

#[derive(Debug, thiserror::Error)]
pub enum MaintenanceError {
    #[error("ledger error: {0}")]
    Ledger(#[from] surprisebot_ledger::LedgerError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("mission control db error: {0}")]
    Db(#[from] crate::db::MissionControlError),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RollupState {
    last_rollup_date: Option<String>,
    last_prune_date: Option<String>,
}

async fn load_state(path: &Path) -> Result<RollupState, MaintenanceError> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => Ok(serde_json::from_str(&raw).unwrap_or_default()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(RollupState::default()),
        Err(err) => Err(err.into()),
    }
}

async fn save_state(path: &Path, state: &RollupState) -> Result<(), MaintenanceError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, serde_json::to_vec_pretty(state)?).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn record_date(record: &Value) -> Option<NaiveDate> {
    let ts = record.get("ts")?.as_str()?;
    DateTime::parse_from_rfc3339(ts).ok().map(|dt| dt.date_naive())
}

#[derive(Debug, Clone, Default)]
pub struct RollupSummary {
    pub ran: bool,
    pub archived_counts: HashMap<&'static str, usize>,
}

/// Runs a rollup pass if one hasn't already run today: every ledger kind
/// is split into records newer than `keep_days` (kept in place) and
/// older ones (appended to `<rollups_dir>/<record-date>/<kind>.jsonl` and
/// removed from the live ledger file).
pub async fn rollup_once(
    ledger: &LedgerStore,
    state_path: &Path,
    rollups_dir: &Path,
    keep_days: u64,
    now: DateTime<Utc>,
) -> Result<RollupSummary, MaintenanceError> {
    let mut state = load_state(state_path).await?;
    let today = now.date_naive().to_string();
    if state.last_rollup_date.as_deref() == Some(today.as_str()) {
        return Ok(RollupSummary { ran: false, archived_counts: HashMap::new() });
    }

    let cutoff = now.date_naive() - chrono::Duration::days(keep_days as i64);
    let mut archived_counts = HashMap::new();

    for &kind in ALL_KINDS {
        let records = ledger.tail(kind).await?;
        let mut keep = Vec::with_capacity(records.len());
        let mut archived = 0usize;

        for record in records {
            match record_date(&record) {
                Some(date) if date < cutoff => {
                    append_to_rollup_file(rollups_dir, date, kind.file_name(), &record).await?;
                    archived += 1;
                }
                _ => keep.push(record),
            }
        }

        if archived > 0 {
            ledger.rewrite_kind(kind, &keep).await?;
        }
        archived_counts.insert(kind.file_name(), archived);
    }

    state.last_rollup_date = Some(today);
    save_state(state_path, &state).await?;

    Ok(RollupSummary { ran: true, archived_counts })
}

async fn append_to_rollup_file(rollups_dir: &Path, date: NaiveDate, kind_file_name: &str, record: &Value) -> Result<(), MaintenanceError> {
    let dir = rollups_dir.join(date.to_string());
    tokio::fs::create_dir_all(&dir).await?;
    let path = dir.join(kind_file_name);
    let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await?;
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    file.write_all(line.as_bytes()).await?;
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct DuplicatePruneSummary {
    pub ran: bool,
    pub pruned_incident_ids: Vec<String>,
    pub cascaded_task_ids: Vec<String>,
}

/// Runs the daily duplicate-incident prune if one hasn't already run
/// today: incidents (stored as [`LedgerKind::Signals`] records) are
/// deduped by `(source, normalized summary, url, path)`, keeping the
/// first occurrence; anything else referencing a pruned incident's id
/// (tasks whose `meta.incident_id` points to it, and their activities/
/// subscriptions) is cascade-deleted from mission control.
pub async fn duplicate_prune_once(
    ledger: &LedgerStore,
    mission_control: &MissionControlDb,
    state_path: &Path,
    now: DateTime<Utc>,
) -> Result<DuplicatePruneSummary, MaintenanceError> {
    let mut state = load_state(state_path).await?;
    let today = now.date_naive().to_string();
    if state.last_prune_date.as_deref() == Some(today.as_str()) {
        return Ok(DuplicatePruneSummary::default());
    }

    let records = ledger.tail(LedgerKind::Signals).await?;
    let mut seen: HashSet<(String, String, String, String)> = HashSet::new();
    let mut keep = Vec::with_capacity(records.len());
    let mut pruned_ids = Vec::new();

    for record in records {
        let key = dedupe_key(&record);
        if seen.insert(key) {
            keep.push(record);
        } else if let Some(id) = record.get("id").and_then(|v| v.as_str()) {
            pruned_ids.push(id.to_string());
        }
    }

    if !pruned_ids.is_empty() {
        ledger.rewrite_kind(LedgerKind::Signals, &keep).await?;
    }

    let mut cascaded_task_ids = Vec::new();
    for incident_id in &pruned_ids {
        if let Some(task_id) = find_task_for_incident(ledger, incident_id).await? {
            mission_control.delete_task_cascade(&task_id).await?;
            cascaded_task_ids.push(task_id);
        }
    }

    state.last_prune_date = Some(today);
    save_state(state_path, &state).await?;

    Ok(DuplicatePruneSummary { ran: true, pruned_incident_ids: pruned_ids, cascaded_task_ids })
}

fn dedupe_key(record: &Value) -> (String, String, String, String) {
    let source = record.get("source").and_then(|v| v.as_str()).unwrap_or("").to_string();
    let summary = record.get("summary").and_then(|v| v.as_str()).unwrap_or("");
    let normalized_summary = surprisebot_types::normalize_summary(summary);
    let url = record.get("url").and_then(|v| v.as_str()).unwrap_or("").to_string();
    let path = record.get("path").and_then(|v| v.as_str()).unwrap_or("").to_string();
    (source, normalized_summary, url, path)
}

/// Finds a task whose `meta.incident_id` matches, by scanning the
/// activities ledger for a `task_created_from_incident` record — the
/// only place the task/incident link is recorded outside mission
/// control's own `tasks.meta`. The mission-control DB is the source of
/// truth for tasks; this is purely a lookup to find the cascade target.
async fn find_task_for_incident(ledger: &LedgerStore, incident_id: &str) -> Result<Option<String>, MaintenanceError> {
    let activities = ledger.tail(LedgerKind::Activities).await?;
    for activity in activities {
        let matches_incident = activity.get("meta").and_then(|m| m.get("incident_id")).and_then(|v| v.as_str()) == Some(incident_id);
        let is_creation = activity.get("kind").and_then(|v| v.as_str()) == Some("task_created_from_incident");
        if matches_incident && is_creation {
            return Ok(activity.get("task_id").and_then(|v| v.as_str()).map(str::to_string));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, ts: &str, extra: Value) -> Value {
        let mut base = json!({"id": id, "ts": ts});
        if let Value::Object(extra_map) = extra {
            base.as_object_mut().unwrap().extend(extra_map);
        }
        base
    }

    #[tokio::test]
    async fn rollup_archives_records_older_than_keep_days_and_keeps_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = LedgerStore::new(dir.path()).await.unwrap();

        let old = record("t-old", "2026-01-01T00:00:00Z", json!({"title": "old", "status": "inbox"}));
        let recent = record("t-new", "2026-07-27T00:00:00Z", json!({"title": "new", "status": "inbox"}));
        ledger.append(LedgerKind::Tasks, old).await.unwrap();
        ledger.append(LedgerKind::Tasks, recent).await.unwrap();

        let state_path = dir.path().join("rollup.state.json");
        let rollups_dir = dir.path().join("rollups");
        let now = DateTime::parse_from_rfc3339("2026-07-28T12:00:00Z").unwrap().with_timezone(&Utc);

        let summary = rollup_once(&ledger, &state_path, &rollups_dir, 7, now).await.unwrap();
        assert!(summary.ran);
        assert_eq!(summary.archived_counts.get("tasks.jsonl"), Some(&1));

        let remaining = ledger.tail(LedgerKind::Tasks).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0]["id"], "t-new");

        let archived = tokio::fs::read_to_string(rollups_dir.join("2026-01-01").join("tasks.jsonl")).await.unwrap();
        assert!(archived.contains("t-old"));
    }

    #[tokio::test]
    async fn rollup_is_gated_to_once_per_day() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = LedgerStore::new(dir.path()).await.unwrap();
        let state_path = dir.path().join("rollup.state.json");
        let rollups_dir = dir.path().join("rollups");
        let now = Utc::now();

        let first = rollup_once(&ledger, &state_path, &rollups_dir, 7, now).await.unwrap();
        assert!(first.ran);
        let second = rollup_once(&ledger, &state_path, &rollups_dir, 7, now).await.unwrap();
        assert!(!second.ran);
    }

    #[tokio::test]
    async fn duplicate_prune_keeps_first_occurrence_and_cascades() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = LedgerStore::new(dir.path()).await.unwrap();
        let mc = MissionControlDb::open(&dir.path().join("mc.sqlite3")).await.unwrap();

        let inc_a = record("inc-a", "2026-07-28T00:00:00Z", json!({"source": "monitor", "summary": "Disk Full on worker-3"}));
        let inc_b = record("inc-b", "2026-07-28T01:00:00Z", json!({"source": "monitor", "summary": "disk full on worker-3"}));
        ledger.append(LedgerKind::Signals, inc_a).await.unwrap();
        ledger.append(LedgerKind::Signals, inc_b).await.unwrap();
        ledger
            .append(
                LedgerKind::Activities,
                record("act-1", "2026-07-28T01:05:00Z", json!({"kind": "task_created_from_incident", "task_id": "task-1", "meta": {"incident_id": "inc-b"}})),
            )
            .await
            .unwrap();

        let task = surprisebot_types::TaskRecord {
            id: "task-1".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            title: "dup".to_string(),
            description: String::new(),
            status: surprisebot_types::TaskStatus::Inbox,
            priority: surprisebot_types::TaskPriority::Medium,
            source: "monitor".to_string(),
            severity: surprisebot_types::Severity::Medium,
            trust_tier: surprisebot_types::TrustTier::Trusted,
            fingerprint: "fp".to_string(),
            assignees: Vec::new(),
            labels: Vec::new(),
            parent_task_id: None,
            meta: json!({"incident_id": "inc-b"}),
        };
        mc.insert_task(&task).await.unwrap();

        let state_path = dir.path().join("prune.state.json");
        let summary = duplicate_prune_once(&ledger, &mc, &state_path, Utc::now()).await.unwrap();

        assert!(summary.ran);
        assert_eq!(summary.pruned_incident_ids, vec!["inc-b".to_string()]);
        assert_eq!(summary.cascaded_task_ids, vec!["task-1".to_string()]);

        let remaining = ledger.tail(LedgerKind::Signals).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0]["id"], "inc-a");
        assert_eq!(mc.task_count().await.unwrap(), 0);
    }
}

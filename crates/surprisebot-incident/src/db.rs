//! Mission-control SQLite store (§6 schema): tasks, messages, activities,
//! subscriptions, documents, and notifications. Grounded on
//! `tandem-memory::db::MemoryDatabase`'s connection setup (bundled
//! `rusqlite`, WAL, busy-timeout, idempotent schema), minus the
//! vector-embedding tables that crate adds for semantic memory — mission
//! control has no embedding need, only relational bookkeeping.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use surprisebot_types::{TaskPriority, TaskRecord, TaskStatus};
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum MissionControlError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MissionControlError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertTaskResult {
    Created,
    Duplicate { existing_id: String },
}

/// `Arc<Mutex<Connection>>`-wrapped SQLite store shared across the
/// incident pipeline's task-creation, activity-logging, and maintenance
/// paths (all of which must serialize writes through the same
/// connection).
pub struct MissionControlDb {
    conn: Arc<Mutex<Connection>>,
}

impl MissionControlDb {
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_millis(5000))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        let db = Self { conn: Arc::new(Mutex::new(conn)) };
        db.init_schema().await?;
        Ok(db)
    }

    async fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    /// Inserts a task unless its `fingerprint` already exists, in which
    /// case the UNIQUE constraint itself is the dedupe mechanism (§4.10
    /// step 6) — the caller gets back the existing task's id instead of
    /// an error.
    pub async fn insert_task(&self, task: &TaskRecord) -> Result<InsertTaskResult> {
        let conn = self.conn.lock().await;
        if let Some(existing_id) = find_task_id_by_fingerprint(&conn, &task.fingerprint)? {
            return Ok(InsertTaskResult::Duplicate { existing_id });
        }
        conn.execute(
            "INSERT INTO tasks (id, created_at, updated_at, title, description, status, priority, source, severity, trust_tier, fingerprint, assignees, labels, parent_task_id, meta)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                task.id,
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
                task.title,
                task.description,
                status_str(task.status),
                priority_str(task.priority),
                task.source,
                severity_str(task.severity),
                trust_tier_str(task.trust_tier),
                task.fingerprint,
                serde_json::to_string(&task.assignees)?,
                serde_json::to_string(&task.labels)?,
                task.parent_task_id,
                task.meta.to_string(),
            ],
        )?;
        Ok(InsertTaskResult::Created)
    }

    pub async fn task_id_by_fingerprint(&self, fingerprint: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        find_task_id_by_fingerprint(&conn, fingerprint)
    }

    pub async fn insert_activity(&self, id: &str, task_id: Option<&str>, created_at: DateTime<Utc>, kind: &str, meta: &Value) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO activities (id, task_id, created_at, kind, meta) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, task_id, created_at.to_rfc3339(), kind, meta.to_string()],
        )?;
        Ok(())
    }

    pub async fn insert_subscription(&self, id: &str, task_id: &str, agent_id: &str, reason: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO subscriptions (id, task_id, agent_id, reason) VALUES (?1, ?2, ?3, ?4)",
            params![id, task_id, agent_id, reason],
        )?;
        Ok(())
    }

    pub async fn insert_notification(&self, id: &str, target_kind: &str, target_id: &str, created_at: DateTime<Utc>, meta: &Value) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO notifications (id, target_kind, target_id, created_at, delivered, meta) VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            params![id, target_kind, target_id, created_at.to_rfc3339(), meta.to_string()],
        )?;
        Ok(())
    }

    /// Deletes a task and everything that references it — used by the
    /// duplicate-prune pass (§4.11) when an upstream incident it was
    /// created from turns out to be a duplicate.
    pub async fn delete_task_cascade(&self, task_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM subscriptions WHERE task_id = ?1", params![task_id])?;
        conn.execute("DELETE FROM activities WHERE task_id = ?1", params![task_id])?;
        conn.execute("DELETE FROM messages WHERE task_id = ?1", params![task_id])?;
        conn.execute("DELETE FROM tasks WHERE id = ?1", params![task_id])?;
        Ok(())
    }

    pub async fn task_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        Ok(conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?)
    }
}

fn find_task_id_by_fingerprint(conn: &Connection, fingerprint: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row("SELECT id FROM tasks WHERE fingerprint = ?1", params![fingerprint], |row| row.get(0))
        .optional()?)
}

fn status_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Inbox => "inbox",
        TaskStatus::Assigned => "assigned",
        TaskStatus::InProgress => "in_progress",
        TaskStatus::Review => "review",
        TaskStatus::Verified => "verified",
        TaskStatus::Done => "done",
        TaskStatus::Blocked => "blocked",
        TaskStatus::Cancelled => "cancelled",
    }
}

fn priority_str(priority: TaskPriority) -> &'static str {
    match priority {
        TaskPriority::Low => "low",
        TaskPriority::Medium => "medium",
        TaskPriority::High => "high",
        TaskPriority::Critical => "critical",
    }
}

fn severity_str(severity: surprisebot_types::Severity) -> &'static str {
    match severity {
        surprisebot_types::Severity::Low => "low",
        surprisebot_types::Severity::Medium => "medium",
        surprisebot_types::Severity::High => "high",
    }
}

fn trust_tier_str(tier: surprisebot_types::TrustTier) -> &'static str {
    match tier {
        surprisebot_types::TrustTier::Trusted => "trusted",
        surprisebot_types::TrustTier::Unverified => "unverified",
        surprisebot_types::TrustTier::Quarantine => "quarantine",
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL,
    priority TEXT NOT NULL,
    source TEXT NOT NULL,
    severity TEXT NOT NULL,
    trust_tier TEXT NOT NULL,
    fingerprint TEXT NOT NULL UNIQUE,
    assignees TEXT NOT NULL DEFAULT '[]',
    labels TEXT NOT NULL DEFAULT '[]',
    parent_task_id TEXT,
    meta TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
CREATE INDEX IF NOT EXISTS idx_tasks_updated_at ON tasks(updated_at);
CREATE INDEX IF NOT EXISTS idx_tasks_priority ON tasks(priority);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    task_id TEXT NOT NULL REFERENCES tasks(id),
    created_at TEXT NOT NULL,
    body TEXT NOT NULL,
    meta TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_messages_task_id ON messages(task_id);

CREATE TABLE IF NOT EXISTS activities (
    id TEXT PRIMARY KEY,
    task_id TEXT REFERENCES tasks(id),
    created_at TEXT NOT NULL,
    kind TEXT NOT NULL,
    meta TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_activities_task_id ON activities(task_id);
CREATE INDEX IF NOT EXISTS idx_activities_created_at ON activities(created_at);

CREATE TABLE IF NOT EXISTS subscriptions (
    id TEXT PRIMARY KEY,
    task_id TEXT NOT NULL REFERENCES tasks(id),
    agent_id TEXT NOT NULL,
    reason TEXT NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS idx_subscriptions_task_agent ON subscriptions(task_id, agent_id);

CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    created_at TEXT NOT NULL,
    body TEXT NOT NULL DEFAULT '',
    meta TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS notifications (
    id TEXT PRIMARY KEY,
    target_kind TEXT NOT NULL,
    target_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    delivered INTEGER NOT NULL DEFAULT 0,
    meta TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_notifications_target ON notifications(target_kind, target_id);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use surprisebot_types::Severity;

    fn sample_task(fingerprint: &str) -> TaskRecord {
        let now = Utc::now();
        TaskRecord {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            title: "disk usage critical on worker-3".to_string(),
            description: "evidence line".to_string(),
            status: TaskStatus::Inbox,
            priority: TaskPriority::High,
            source: "monitor".to_string(),
            severity: Severity::High,
            trust_tier: surprisebot_types::TrustTier::Trusted,
            fingerprint: fingerprint.to_string(),
            assignees: vec!["ops".to_string()],
            labels: Vec::new(),
            parent_task_id: None,
            meta: json!({}),
        }
    }

    #[tokio::test]
    async fn inserting_a_task_and_reading_it_back() {
        let dir = tempfile::tempdir().unwrap();
        let db = MissionControlDb::open(&dir.path().join("mc.sqlite3")).await.unwrap();
        let task = sample_task("fp-1");
        assert_eq!(db.insert_task(&task).await.unwrap(), InsertTaskResult::Created);
        assert_eq!(db.task_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicate_fingerprint_is_reported_rather_than_erroring() {
        let dir = tempfile::tempdir().unwrap();
        let db = MissionControlDb::open(&dir.path().join("mc.sqlite3")).await.unwrap();
        let task = sample_task("fp-dup");
        db.insert_task(&task).await.unwrap();

        let mut other = sample_task("fp-dup");
        other.id = uuid::Uuid::new_v4().to_string();
        let result = db.insert_task(&other).await.unwrap();
        assert_eq!(result, InsertTaskResult::Duplicate { existing_id: task.id });
        assert_eq!(db.task_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_task_cascade_removes_dependents() {
        let dir = tempfile::tempdir().unwrap();
        let db = MissionControlDb::open(&dir.path().join("mc.sqlite3")).await.unwrap();
        let task = sample_task("fp-cascade");
        db.insert_task(&task).await.unwrap();
        db.insert_subscription("sub-1", &task.id, "ops", "assignee").await.unwrap();
        db.insert_activity("act-1", Some(&task.id), Utc::now(), "task_created", &json!({})).await.unwrap();

        db.delete_task_cascade(&task.id).await.unwrap();
        assert_eq!(db.task_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reopening_the_same_path_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mc.sqlite3");
        {
            let db = MissionControlDb::open(&path).await.unwrap();
            db.insert_task(&sample_task("fp-reopen")).await.unwrap();
        }
        let db = MissionControlDb::open(&path).await.unwrap();
        assert_eq!(db.task_count().await.unwrap(), 1);
    }
}

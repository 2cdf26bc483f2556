//! Session store — CRUD for [`SessionEntry`] keyed by [`SessionKey`], with
//! atomic persistence and per-session transcript files (§4.1).
//!
//! The whole map round-trips on every [`SessionStore::load`]/
//! [`SessionStore::save`] — a torn write is never observable, and a
//! corrupt file fails loudly rather than silently dropping entries.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use surprisebot_types::{SessionEntry, SessionKey, TranscriptHeader};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    #[error("failed to parse session store at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A loaded, in-memory map of every session entry, keyed by its raw
/// `SessionKey` string so it serializes as a plain JSON object.
pub type SessionMap = HashMap<String, SessionEntry>;

/// Owns the single writer for one session-store file. A `SessionStore`
/// instance must not be constructed twice over the same path within a
/// process — §5 requires writes to a given path be fully serialized by a
/// single writer.
pub struct SessionStore {
    path: PathBuf,
    state_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state_dir: state_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Returns an empty map if the file does not exist; fails loudly (does
    /// not emit partial entries) on parse failure.
    pub async fn load(&self) -> Result<SessionMap, SessionStoreError> {
        load_session_map(&self.path).await
    }

    /// Serializes to JSON and writes via `tmpfile + rename` for atomic
    /// replacement. Callers must serialize their own writes to this store
    /// (the `write_lock` enforces that within one process).
    pub async fn save(&self, map: &SessionMap) -> Result<(), SessionStoreError> {
        let _guard = self.write_lock.lock().await;
        save_session_map(&self.path, map).await
    }

    /// Read-modify-write with last-write-wins semantics; returns the
    /// resulting entry.
    pub async fn update<F>(&self, key: &SessionKey, update_fn: F) -> Result<SessionEntry, SessionStoreError>
    where
        F: FnOnce(Option<SessionEntry>) -> SessionEntry,
    {
        let _guard = self.write_lock.lock().await;
        let mut map = load_session_map(&self.path).await?;
        let existing = map.remove(key.as_str());
        let mut updated = update_fn(existing);
        updated.updated_at = Utc::now();
        map.insert(key.as_str().to_string(), updated.clone());
        save_session_map(&self.path, &map).await?;
        Ok(updated)
    }

    pub async fn get(&self, key: &SessionKey) -> Result<Option<SessionEntry>, SessionStoreError> {
        let map = self.load().await?;
        Ok(map.get(key.as_str()).cloned())
    }

    /// `<stateDir>/sessions/<sessionId>[-topic-<threadId>].jsonl`
    pub fn resolve_transcript_path(&self, session_id: &str, thread_id: Option<&str>) -> PathBuf {
        let name = match thread_id {
            Some(topic) => format!("{session_id}-topic-{topic}.jsonl"),
            None => format!("{session_id}.jsonl"),
        };
        self.state_dir.join("sessions").join(name)
    }

    /// Creates a new session whose transcript header references the
    /// parent transcript path. The parent entry is left intact — forking
    /// never mutates the session it branches from.
    pub async fn fork_for_thread(
        &self,
        parent_key: &SessionKey,
        thread_key: &SessionKey,
        label: &str,
    ) -> Result<SessionEntry, SessionStoreError> {
        let _guard = self.write_lock.lock().await;
        let mut map = load_session_map(&self.path).await?;
        let parent = map.get(parent_key.as_str()).cloned();
        let parent_transcript = parent.as_ref().map(|p| p.session_file.clone());

        let new_session_id = uuid::Uuid::new_v4().to_string();
        let transcript_path = self.resolve_transcript_path(&new_session_id, thread_key.thread_id());

        if let Some(dir) = transcript_path.parent() {
            fs::create_dir_all(dir).await?;
        }
        let header = TranscriptHeader {
            session_id: new_session_id.clone(),
            session_key: thread_key.as_str().to_string(),
            parent_session: parent_transcript,
            display_name: Some(label.to_string()),
            created_at: Utc::now(),
        };
        write_transcript_header(&transcript_path, &header).await?;

        let mut entry = SessionEntry::new(transcript_path.to_string_lossy().to_string());
        entry.session_id = new_session_id;
        entry.display_name = Some(label.to_string());

        map.insert(thread_key.as_str().to_string(), entry.clone());
        save_session_map(&self.path, &map).await?;
        Ok(entry)
    }
}

async fn load_session_map(path: &Path) -> Result<SessionMap, SessionStoreError> {
    let raw = match fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(err) => return Err(err.into()),
    };
    if raw.trim().is_empty() {
        return Ok(HashMap::new());
    }
    serde_json::from_str(&raw).map_err(|source| SessionStoreError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

async fn save_session_map(path: &Path, map: &SessionMap) -> Result<(), SessionStoreError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).await?;
    }
    let serialized = serde_json::to_string_pretty(map).map_err(|source| SessionStoreError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, serialized.as_bytes()).await?;
    fs::rename(&tmp_path, path).await?;
    Ok(())
}

async fn write_transcript_header(path: &Path, header: &TranscriptHeader) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new().create(true).append(true).open(path).await?;
    let line = serde_json::to_string(header).expect("TranscriptHeader always serializes");
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &Path) -> SessionStore {
        SessionStore::new(dir.join("sessions.json"), dir.to_path_buf())
    }

    #[tokio::test]
    async fn load_missing_file_returns_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let map = store.load().await.unwrap();
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let key = SessionKey::build("main", "slack", "channel:C1");
        let mut map = HashMap::new();
        map.insert(key.as_str().to_string(), SessionEntry::new("s.jsonl".to_string()));
        store.save(&map).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains_key(key.as_str()));
    }

    #[tokio::test]
    async fn update_applies_last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let key = SessionKey::build("main", "slack", "channel:C1");

        store
            .update(&key, |existing| {
                let mut e = existing.unwrap_or_else(|| SessionEntry::new("s.jsonl".to_string()));
                e.total_tokens = 10;
                e
            })
            .await
            .unwrap();

        let updated = store
            .update(&key, |existing| {
                let mut e = existing.unwrap();
                e.total_tokens += 5;
                e
            })
            .await
            .unwrap();

        assert_eq!(updated.total_tokens, 15);
    }

    #[tokio::test]
    async fn fork_for_thread_creates_new_session_with_parent_transcript_header() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let parent_key = SessionKey::build("main", "slack", "channel:C1");
        let parent_entry = SessionEntry::new("/root/parent.jsonl".to_string());
        let parent_session_id = parent_entry.session_id.clone();
        let mut map = HashMap::new();
        map.insert(parent_key.as_str().to_string(), parent_entry);
        store.save(&map).await.unwrap();

        let thread_key = parent_key.with_thread("123");
        let forked = store
            .fork_for_thread(&parent_key, &thread_key, "Slack thread #general: starter")
            .await
            .unwrap();

        assert_ne!(forked.session_id, parent_session_id);
        assert_eq!(forked.display_name.as_deref(), Some("Slack thread #general: starter"));

        let transcript = fs::read_to_string(&forked.session_file).await.unwrap();
        let header: TranscriptHeader = serde_json::from_str(transcript.lines().next().unwrap()).unwrap();
        assert_eq!(header.parent_session.as_deref(), Some("/root/parent.jsonl"));
    }

    #[tokio::test]
    async fn resolve_transcript_path_includes_topic_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let path = store.resolve_transcript_path("sess-1", Some("456"));
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), "sess-1-topic-456.jsonl");
    }
}

//! Append-only JSONL ledger store.
//!
//! Each [`LedgerKind`] lives in its own file under the store's base
//! directory. Appends are serialized per kind (a single writer per file,
//! per §9's "ledger writes funneled through a single writer") and rejected
//! at write time when required fields are missing, per §6's
//! `REQUIRED_FIELDS` table. Bulk rewrites (used by mission-control rollup
//! and duplicate-pruning) go through `rewrite_kind`, which uses the same
//! `tmpfile + rename` atomicity as the session store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use surprisebot_types::LedgerKind;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger record rejected: missing field `{field}` for kind `{kind}`")]
    MissingField { kind: &'static str, field: &'static str },
    #[error("ledger record must not contain embedded newlines")]
    EmbeddedNewline,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

#[derive(Clone)]
pub struct LedgerStore {
    base: PathBuf,
    writers: Arc<HashMap<&'static str, Mutex<()>>>,
}

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

impl LedgerStore {
    pub async fn new(base: impl AsRef<Path>) -> anyhow::Result<Self> {
        let base = base.as_ref().to_path_buf();
        fs::create_dir_all(&base).await?;
        let mut writers = HashMap::new();
        for kind in ALL_KINDS {
            writers.insert(kind.file_name(), Mutex::new(()));
        }
        Ok(Self {
            base,
            writers: Arc::new(writers),
        })
    }

    pub fn path_for(&self, kind: LedgerKind) -> PathBuf {
        self.base.join(kind.file_name())
    }

    /// Validates the common `{id, ts}` envelope plus the kind's required
    /// fields, then appends a single line. Unknown kinds can't reach this
    /// function (the caller must hold a [`LedgerKind`] value), and missing
    /// required fields are rejected rather than silently accepted,
    /// per §7's `ValidationError` semantics ("does not corrupt the stream").
    pub async fn append(&self, kind: LedgerKind, record: Value) -> Result<(), LedgerError> {
        validate_record(kind, &record)?;
        let line = serde_json::to_string(&record)?;
        if line.contains('\n') {
            return Err(LedgerError::EmbeddedNewline);
        }

        let guard = self
            .writers
            .get(kind.file_name())
            .expect("all ledger kinds registered at construction");
        let _lock = guard.lock().await;

        let path = self.path_for(kind);
        let mut file = fs::OpenOptions::new().create(true).append(true).open(&path).await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }

    /// Reads every record of this kind, in file order. Malformed lines are
    /// skipped with a warning rather than failing the whole tail — a single
    /// torn line must never corrupt the stream for other readers.
    pub async fn tail(&self, kind: LedgerKind) -> Result<Vec<Value>, LedgerError> {
        let path = self.path_for(kind);
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut out = Vec::new();
        for (lineno, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(line) {
                Ok(value) => out.push(value),
                Err(err) => {
                    tracing::warn!(kind = kind.file_name(), lineno, %err, "skipping malformed ledger line");
                }
            }
        }
        Ok(out)
    }

    /// Reads records with `ts >= since`, collapsing duplicate `id`s to the
    /// record with the latest `ts` — the dedup rule every ledger reader
    /// (budget manager, run-status lookups) must apply per §3/§5.
    pub async fn tail_since_latest_by_id(
        &self,
        kind: LedgerKind,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Value>, LedgerError> {
        let all = self.tail(kind).await?;
        let mut latest: HashMap<String, Value> = HashMap::new();
        for record in all {
            let Some(id) = record.get("id").and_then(|v| v.as_str()).map(str::to_string) else {
                continue;
            };
            let Some(ts) = record.get("ts").and_then(|v| v.as_str()).and_then(|s| {
                DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
            }) else {
                continue;
            };
            if let Some(window_start) = since {
                if ts < window_start {
                    continue;
                }
            }
            match latest.get(&id).and_then(|existing| existing.get("ts")).and_then(|v| v.as_str()) {
                Some(existing_ts)
                    if DateTime::parse_from_rfc3339(existing_ts)
                        .map(|dt| dt.with_timezone(&Utc))
                        .map(|existing_ts| existing_ts >= ts)
                        .unwrap_or(false) => {}
                _ => {
                    latest.insert(id, record);
                }
            }
        }
        Ok(latest.into_values().collect())
    }

    /// Atomically replaces the contents of a ledger file with `records`,
    /// one per line, via `tmpfile + rename`. Used by mission-control rollup
    /// and duplicate-pruning, which rewrite a file after filtering it.
    pub async fn rewrite_kind(&self, kind: LedgerKind, records: &[Value]) -> Result<(), LedgerError> {
        let guard = self
            .writers
            .get(kind.file_name())
            .expect("all ledger kinds registered at construction");
        let _lock = guard.lock().await;

        let path = self.path_for(kind);
        let tmp_path = path.with_extension("jsonl.tmp");
        let mut buf = String::new();
        for record in records {
            buf.push_str(&serde_json::to_string(record)?);
            buf.push('\n');
        }
        fs::write(&tmp_path, buf.as_bytes()).await?;
        fs::rename(&tmp_path, &path).await?;
        Ok(())
    }
}

fn validate_record(kind: LedgerKind, record: &Value) -> Result<(), LedgerError> {
    let obj = record.as_object().ok_or(LedgerError::MissingField {
        kind: "_",
        field: "id",
    })?;
    if !obj.contains_key("id") {
        return Err(LedgerError::MissingField {
            kind: kind_name(kind),
            field: "id",
        });
    }
    if !obj.contains_key("ts") {
        return Err(LedgerError::MissingField {
            kind: kind_name(kind),
            field: "ts",
        });
    }
    for field in kind.required_fields() {
        if !obj.contains_key(*field) {
            return Err(LedgerError::MissingField {
                kind: kind_name(kind),
                field,
            });
        }
    }
    Ok(())
}

fn kind_name(kind: LedgerKind) -> &'static str {
    kind.file_name().trim_end_matches(".jsonl")
}

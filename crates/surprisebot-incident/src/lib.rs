//! Incident generation and mission-control maintenance (§4.8–§4.11): a
//! read-only tail of workspace files feeds classification, which feeds
//! incident records onto the ledger and, for anything severe enough,
//! task creation in the mission-control store.

pub mod active_memory;
pub mod classify;
pub mod db;
pub mod maintenance;
pub mod tail;
pub mod task_creation;
pub mod watcher;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use surprisebot_config::MissionControlConfig;
use surprisebot_ledger::LedgerStore;
use surprisebot_types::{IncidentRecord, Severity};

use classify::{classify_log_chunk, classify_output_growth, classify_research_finding, classify_status, ResearchFinding};
use db::MissionControlDb;
use tail::TailState;
use watcher::PathKind;

pub use active_memory::{refresh_active_memory, render_with_generated_section, ActiveMemoryError};
pub use classify::ClassifiedLog;
pub use db::{InsertTaskResult, MissionControlError};
pub use maintenance::{duplicate_prune_once, rollup_once, DuplicatePruneSummary, MaintenanceError, RollupSummary};
pub use task_creation::{maybe_create_task_from_incident, TaskCreationResult};
pub use watcher::{classify_path_kind, IncidentWatcher, PathDebouncer};

/// How long a `low`-severity finding for the same path is suppressed
/// after the first emission (§4.8 "low-severity suppression window") —
/// a noisy-but-harmless source shouldn't re-emit every debounce tick.
pub const LOW_SEVERITY_SUPPRESSION: ChronoDuration = ChronoDuration::seconds(30);

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("ledger error: {0}")]
    Ledger(#[from] surprisebot_ledger::LedgerError),
    #[error(transparent)]
    Db(#[from] MissionControlError),
}

/// Owns per-path tailing and low-severity suppression state across calls
/// to [`IncidentPipeline::process_path`].
pub struct IncidentPipeline {
    tail: TailState,
    last_low_severity_emit: HashMap<PathBuf, DateTime<Utc>>,
    ledger: std::sync::Arc<LedgerStore>,
    mission_control: std::sync::Arc<MissionControlDb>,
}

impl IncidentPipeline {
    pub fn new(ledger: std::sync::Arc<LedgerStore>, mission_control: std::sync::Arc<MissionControlDb>) -> Self {
        Self { tail: TailState::new(), last_low_severity_emit: HashMap::new(), ledger, mission_control }
    }

    /// Processes one stable, changed path: tails its new bytes, classifies
    /// them per `kind`, and — if classification produced a severity —
    /// records an incident and attempts task creation from it. Returns
    /// `Ok(None)` when nothing new was read or classification found
    /// nothing worth an incident (including a suppressed low-severity
    /// repeat).
    pub async fn process_path(
        &mut self,
        path: &Path,
        kind: PathKind,
        now: DateTime<Utc>,
        cfg: &MissionControlConfig,
    ) -> Result<Option<IncidentRecord>, PipelineError> {
        let Some(bytes) = self.tail.read_new_bytes(path).await else {
            return Ok(None);
        };
        let text = String::from_utf8_lossy(&bytes).into_owned();

        let Some(classification) = self.classify(kind, &text, cfg) else {
            return Ok(None);
        };

        if classification.severity == Severity::Low {
            if let Some(last) = self.last_low_severity_emit.get(path) {
                if now - *last < LOW_SEVERITY_SUPPRESSION {
                    return Ok(None);
                }
            }
            self.last_low_severity_emit.insert(path.to_path_buf(), now);
        }

        let source = source_name(kind);
        let summary = classification.evidence.first().cloned().unwrap_or_else(|| format!("{source} activity detected"));

        let incident = IncidentRecord {
            id: uuid::Uuid::new_v4().to_string(),
            ts: now,
            source: source.to_string(),
            severity: classification.severity,
            summary,
            evidence: classification.evidence,
            url: classification.url,
            path: Some(path.display().to_string()),
            meta: Value::Null,
        };

        self.ledger
            .append(
                surprisebot_types::LedgerKind::Signals,
                serde_json::json!({
                    "id": incident.id,
                    "ts": incident.ts.to_rfc3339(),
                    "source": incident.source,
                    "severity": severity_name(incident.severity),
                    "summary": incident.summary,
                    "evidence": incident.evidence,
                    "url": incident.url,
                    "path": incident.path,
                }),
            )
            .await?;

        maybe_create_task_from_incident(&self.mission_control, cfg, &incident).await?;

        Ok(Some(incident))
    }

    fn classify(&self, kind: PathKind, text: &str, cfg: &MissionControlConfig) -> Option<Classification> {
        match kind {
            PathKind::Log => classify_log_chunk(text).map(|c| Classification { severity: c.severity, evidence: c.evidence, url: None }),
            PathKind::OutputOrTargets => {
                let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
                let severity = classify_output_growth(lines.len())?;
                let evidence = lines.iter().rev().take(10).map(|s| s.to_string()).collect();
                Some(Classification { severity, evidence, url: None })
            }
            PathKind::Status => {
                let value: Value = text.lines().rev().find_map(|l| serde_json::from_str(l).ok())?;
                let running = value.get("running").and_then(|v| v.as_bool()).unwrap_or(false);
                let exit_code = value.get("exitCode").and_then(|v| v.as_i64());
                let severity = classify_status(running, exit_code)?;
                Some(Classification {
                    severity,
                    evidence: vec![format!("status running={running} exitCode={exit_code:?}")],
                    url: None,
                })
            }
            PathKind::Research => {
                let min_evidence = cfg.min_evidence_count.unwrap_or(1) as usize;
                let mut best: Option<Classification> = None;
                for line in text.lines() {
                    let Ok(value) = serde_json::from_str::<Value>(line) else { continue };
                    let finding = ResearchFinding {
                        kind: value.get("kind").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                        title: value.get("title").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                        tags: value
                            .get("tags")
                            .and_then(|v| v.as_array())
                            .map(|a| a.iter().filter_map(|e| e.as_str().map(String::from)).collect())
                            .unwrap_or_default(),
                        severity: value.get("severity").and_then(|v| v.as_str()).map(String::from),
                        url: value.get("url").and_then(|v| v.as_str()).map(String::from),
                        evidence: value
                            .get("evidence")
                            .and_then(|v| v.as_array())
                            .map(|a| a.iter().filter_map(|e| e.as_str().map(String::from)).collect())
                            .unwrap_or_default(),
                    };
                    if let Some(severity) = classify_research_finding(&finding, min_evidence) {
                        best = Some(Classification { severity, evidence: finding.evidence, url: finding.url });
                    }
                }
                best
            }
            PathKind::Unknown => None,
        }
    }
}

struct Classification {
    severity: Severity,
    evidence: Vec<String>,
    url: Option<String>,
}

fn source_name(kind: PathKind) -> &'static str {
    match kind {
        PathKind::Log => "log",
        PathKind::OutputOrTargets => "output",
        PathKind::Status => "status",
        PathKind::Research => "research",
        PathKind::Unknown => "unknown",
    }
}

fn severity_name(severity: Severity) -> &'static str {
    match severity {
        Severity::Low => "low",
        Severity::Medium => "medium",
        Severity::High => "high",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use surprisebot_config::{RollupConfig, TrustConfig};
    use tokio::io::AsyncWriteExt;

    fn cfg() -> MissionControlConfig {
        MissionControlConfig {
            trust: TrustConfig::default(),
            rollup: RollupConfig::default(),
            qa_agent_id: Some("qa".to_string()),
            default_agent_id: Some("ops".to_string()),
            min_evidence_count: Some(1),
            kill_switch: false,
        }
    }

    async fn write(path: &Path, content: &str) {
        let mut f = tokio::fs::File::create(path).await.unwrap();
        f.write_all(content.as_bytes()).await.unwrap();
        f.flush().await.unwrap();
    }

    #[tokio::test]
    async fn log_file_with_error_lines_emits_an_incident() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = std::sync::Arc::new(LedgerStore::new(dir.path().join("ledger")).await.unwrap());
        let mc = std::sync::Arc::new(MissionControlDb::open(&dir.path().join("mc.sqlite3")).await.unwrap());
        let mut pipeline = IncidentPipeline::new(ledger.clone(), mc);

        let log_path = dir.path().join("recon").join("scan.log");
        tokio::fs::create_dir_all(log_path.parent().unwrap()).await.unwrap();
        write(&log_path, "an ERROR occurred talking to the target host").await;

        let incident = pipeline.process_path(&log_path, PathKind::Log, Utc::now(), &cfg()).await.unwrap();
        assert!(incident.is_some());

        let signals = ledger.tail(surprisebot_types::LedgerKind::Signals).await.unwrap();
        assert_eq!(signals.len(), 1);
    }

    #[tokio::test]
    async fn noisy_recon_log_produces_no_incident() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = std::sync::Arc::new(LedgerStore::new(dir.path().join("ledger")).await.unwrap());
        let mc = std::sync::Arc::new(MissionControlDb::open(&dir.path().join("mc.sqlite3")).await.unwrap());
        let mut pipeline = IncidentPipeline::new(ledger, mc);

        let log_path = dir.path().join("recon.log");
        write(&log_path, "connection refused by 10.0.0.5:443\n").await;

        let incident = pipeline.process_path(&log_path, PathKind::Log, Utc::now(), &cfg()).await.unwrap();
        assert!(incident.is_none());
    }

    #[tokio::test]
    async fn low_severity_repeats_are_suppressed_within_window() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = std::sync::Arc::new(LedgerStore::new(dir.path().join("ledger")).await.unwrap());
        let mc = std::sync::Arc::new(MissionControlDb::open(&dir.path().join("mc.sqlite3")).await.unwrap());
        let mut pipeline = IncidentPipeline::new(ledger, mc);

        let out_path = dir.path().join("outputs").join("targets.txt");
        tokio::fs::create_dir_all(out_path.parent().unwrap()).await.unwrap();
        write(&out_path, "target-1\ntarget-2\n").await;

        let t0 = Utc::now();
        let first = pipeline.process_path(&out_path, PathKind::OutputOrTargets, t0, &cfg()).await.unwrap();
        assert!(first.is_some());

        // Append more low-volume growth well within the suppression
        // window — should be suppressed.
        let mut f = tokio::fs::OpenOptions::new().append(true).open(&out_path).await.unwrap();
        f.write_all(b"target-3\n").await.unwrap();
        f.flush().await.unwrap();
        let second = pipeline.process_path(&out_path, PathKind::OutputOrTargets, t0 + ChronoDuration::seconds(5), &cfg()).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn status_crash_emits_medium_severity_incident() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = std::sync::Arc::new(LedgerStore::new(dir.path().join("ledger")).await.unwrap());
        let mc = std::sync::Arc::new(MissionControlDb::open(&dir.path().join("mc.sqlite3")).await.unwrap());
        let mut pipeline = IncidentPipeline::new(ledger, mc);

        let status_path = dir.path().join("status.json");
        write(&status_path, r#"{"running": false, "exitCode": 1}"#).await;

        let incident = pipeline.process_path(&status_path, PathKind::Status, Utc::now(), &cfg()).await.unwrap().unwrap();
        assert_eq!(incident.severity, Severity::Medium);
    }

    #[tokio::test]
    async fn research_finding_requiring_qa_creates_a_reviewable_task() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = std::sync::Arc::new(LedgerStore::new(dir.path().join("ledger")).await.unwrap());
        let mc_inner = MissionControlDb::open(&dir.path().join("mc.sqlite3")).await.unwrap();
        let mc = std::sync::Arc::new(mc_inner);
        let mut pipeline = IncidentPipeline::new(ledger, mc.clone());

        let research_path = dir.path().join("research").join("findings.jsonl");
        tokio::fs::create_dir_all(research_path.parent().unwrap()).await.unwrap();
        write(
            &research_path,
            "{\"kind\": \"credential-leak\", \"url\": \"https://example.com/x\", \"evidence\": [\"a\", \"b\"]}\n",
        )
        .await;

        let incident = pipeline.process_path(&research_path, PathKind::Research, Utc::now(), &cfg()).await.unwrap();
        assert!(incident.is_some());
        assert_eq!(mc.task_count().await.unwrap(), 1);
    }
}

//! Task creation from incidents (§4.10): the seven-step
//! `maybeCreateTaskFromIncident` algorithm — kill-switch, severity/evidence
//! gate, trust-tier resolution, QA routing, fingerprinting, insert-or-dedupe,
//! and subscription/activity bookkeeping.

use chrono::Utc;
use serde_json::json;
use surprisebot_config::MissionControlConfig;
use surprisebot_types::{canonical_fingerprint, IncidentRecord, Severity, TaskPriority, TaskRecord, TaskStatus, TrustTier};

use crate::db::{InsertTaskResult, MissionControlDb, MissionControlError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskCreationResult {
    /// A new task was created, optionally routed through QA review.
    Created { task_id: String, qa_required: bool },
    /// The incident's fingerprint matched an existing task; no new task
    /// was created, but the dedupe was recorded as an activity.
    Deduplicated { existing_task_id: String },
    /// Skipped before a task was ever attempted, with the gate reason.
    Skipped(&'static str),
}

/// Runs the full seven-step pipeline for one incident.
pub async fn maybe_create_task_from_incident(
    db: &MissionControlDb,
    cfg: &MissionControlConfig,
    incident: &IncidentRecord,
) -> Result<TaskCreationResult, MissionControlError> {
    // 1. kill switch — an operator can disable task creation entirely
    // without touching the rest of the incident pipeline.
    if cfg.kill_switch {
        return Ok(TaskCreationResult::Skipped("kill_switch"));
    }

    // 2. minimum severity + evidence gate. Research/exposure sources are
    // held to a stricter bar: they must carry a URL and enough evidence
    // lines, on top of the shared severity floor.
    if matches!(incident.severity, Severity::Low) {
        return Ok(TaskCreationResult::Skipped("severity_below_floor"));
    }
    if is_research_like_source(&incident.source) {
        let min_evidence = cfg.min_evidence_count.unwrap_or(1) as usize;
        if incident.url.is_none() {
            return Ok(TaskCreationResult::Skipped("research_source_missing_url"));
        }
        if incident.evidence.len() < min_evidence {
            return Ok(TaskCreationResult::Skipped("research_source_insufficient_evidence"));
        }
    }

    // 3. trust tier for the incident's source.
    let trust_tier = resolve_trust_tier(cfg, &incident.source);

    // 4. QA routing: high severity or anything less than fully trusted
    // goes through review rather than straight to the inbox.
    let qa_required = is_qa_required(incident.severity, trust_tier);
    let status = if qa_required { TaskStatus::Review } else { TaskStatus::Inbox };
    let assignee = if qa_required { cfg.qa_agent_id.clone() } else { cfg.default_agent_id.clone() };

    // 5. fingerprint — the same canonical form used for incident dedup,
    // so a task and the incident that spawned it agree on identity.
    let fingerprint = canonical_fingerprint(&incident.source, incident.severity, &incident.summary, &incident.evidence);

    let now = Utc::now();
    let task = TaskRecord {
        id: uuid::Uuid::new_v4().to_string(),
        created_at: now,
        updated_at: now,
        title: incident.summary.clone(),
        description: incident.evidence.join("\n"),
        status,
        priority: priority_for(incident.severity),
        source: incident.source.clone(),
        severity: incident.severity,
        trust_tier,
        fingerprint,
        assignees: assignee.into_iter().collect(),
        labels: Vec::new(),
        parent_task_id: None,
        meta: json!({"incident_id": incident.id}),
    };

    // 6. insert or dedupe via the fingerprint UNIQUE constraint.
    match db.insert_task(&task).await? {
        InsertTaskResult::Duplicate { existing_id } => {
            db.insert_activity(
                &uuid::Uuid::new_v4().to_string(),
                Some(&existing_id),
                now,
                "incident_deduplicated",
                &json!({"incident_id": incident.id}),
            )
            .await?;
            Ok(TaskCreationResult::Deduplicated { existing_task_id: existing_id })
        }
        InsertTaskResult::Created => {
            // 7. subscriptions + activity for the newly created task.
            for agent in &task.assignees {
                db.insert_subscription(&uuid::Uuid::new_v4().to_string(), &task.id, agent, "assignee").await?;
            }
            db.insert_activity(
                &uuid::Uuid::new_v4().to_string(),
                Some(&task.id),
                now,
                "task_created_from_incident",
                &json!({"incident_id": incident.id}),
            )
            .await?;
            Ok(TaskCreationResult::Created { task_id: task.id, qa_required })
        }
    }
}

fn is_research_like_source(source: &str) -> bool {
    matches!(source, "research" | "exposure" | "osint")
}

fn resolve_trust_tier(cfg: &MissionControlConfig, source: &str) -> TrustTier {
    if cfg.trust.quarantine_sources.iter().any(|s| s == source) {
        return TrustTier::Quarantine;
    }
    match cfg.trust.by_source.get(source).map(String::as_str) {
        Some("trusted") => TrustTier::Trusted,
        Some("unverified") => TrustTier::Unverified,
        Some("quarantine") => TrustTier::Quarantine,
        _ => match cfg.trust.default_tier.as_str() {
            "trusted" => TrustTier::Trusted,
            "quarantine" => TrustTier::Quarantine,
            _ => TrustTier::Unverified,
        },
    }
}

/// QA is required for high-severity incidents, or for anything from a
/// source that isn't fully trusted — an unverified or quarantined
/// source always routes through review regardless of severity.
fn is_qa_required(severity: Severity, trust_tier: TrustTier) -> bool {
    matches!(severity, Severity::High) || !matches!(trust_tier, TrustTier::Trusted)
}

fn priority_for(severity: Severity) -> TaskPriority {
    match severity {
        Severity::High => TaskPriority::High,
        Severity::Medium => TaskPriority::Medium,
        Severity::Low => TaskPriority::Low,
    }
}

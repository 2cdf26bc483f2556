use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Inbox,
    Assigned,
    InProgress,
    Review,
    Verified,
    Done,
    Blocked,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustTier {
    Trusted,
    Unverified,
    Quarantine,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub source: String,
    pub severity: Severity,
    pub trust_tier: TrustTier,
    pub fingerprint: String,
    #[serde(default)]
    pub assignees: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub parent_task_id: Option<String>,
    #[serde(default)]
    pub meta: Value,
}

/// `SHA-256(source + "\n" + severity + "\n" + summary + "\n" + evidence.joinNL)`,
/// the canonical fingerprint used for both task and incident dedup (§4.10).
pub fn canonical_fingerprint(source: &str, severity: Severity, summary: &str, evidence: &[String]) -> String {
    let severity_str = match severity {
        Severity::Low => "low",
        Severity::Medium => "medium",
        Severity::High => "high",
    };
    let joined_evidence = evidence.join("\n");
    let canonical = format!("{source}\n{severity_str}\n{summary}\n{joined_evidence}");
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub id: String,
    pub ts: DateTime<Utc>,
    pub source: String,
    pub severity: Severity,
    pub summary: String,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub meta: Value,
}

impl IncidentRecord {
    /// Normalizes the summary for the `(source, summary-normalized, url, path)`
    /// dedup tuple: trimmed, lowercased, internal whitespace collapsed.
    pub fn normalized_summary(&self) -> String {
        normalize_summary(&self.summary)
    }

    pub fn dedupe_key(&self) -> (String, String, String, String) {
        (
            self.source.clone(),
            self.normalized_summary(),
            self.url.clone().unwrap_or_default(),
            self.path.clone().unwrap_or_default(),
        )
    }
}

pub fn normalize_summary(summary: &str) -> String {
    summary
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_for_identical_inputs() {
        let a = canonical_fingerprint("recon", Severity::High, "disk full", &["/var".into()]);
        let b = canonical_fingerprint("recon", Severity::High, "disk full", &["/var".into()]);
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_differs_on_severity() {
        let a = canonical_fingerprint("recon", Severity::High, "disk full", &[]);
        let b = canonical_fingerprint("recon", Severity::Medium, "disk full", &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn normalized_summary_collapses_whitespace_and_case() {
        assert_eq!(normalize_summary("  Disk   FULL  "), "disk full");
    }
}

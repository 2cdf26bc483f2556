//! Incident classification (§4.8 step 2): turns a chunk of newly-tailed
//! bytes, a status payload, or a research finding into a severity plus
//! supporting evidence lines, or `None` when nothing rises to an
//! incident.

use once_cell::sync::Lazy;
use regex::Regex;
use surprisebot_types::Severity;

/// Lines matching these patterns are routine recon noise (closed ports,
/// expected DNS failures, connection resets from a target that simply
/// isn't listening) and are dropped before severity is computed — a scan
/// log full of these would otherwise look like a wall of errors.
static NOISY_RECON_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(connection refused|no route to host|name or service not known|network is unreachable|host is down|connection timed out)").unwrap()
});

static HIGH_SEVERITY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(panic|fatal|critical|segfault|out of memory|stack overflow)").unwrap());

static ERROR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(error|exception|traceback|failed)").unwrap());

static EXPOSURE_KIND_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(exposure|leak|credential|secret|pii|breach)").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedLog {
    pub severity: Severity,
    pub evidence: Vec<String>,
}

/// Classifies a chunk of log text (§4.8 "log" branch): noisy recon lines
/// are filtered, then severity is the highest of any remaining line
/// (`high` on a fatal/panic pattern, `medium` on a plain error pattern).
/// Returns `None` if every line was noise or blank.
pub fn classify_log_chunk(text: &str) -> Option<ClassifiedLog> {
    let mut evidence = Vec::new();
    let mut severity = Severity::Low;
    let mut saw_anything = false;

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() || NOISY_RECON_RE.is_match(line) {
            continue;
        }
        if HIGH_SEVERITY_RE.is_match(line) {
            severity = Severity::High;
            evidence.push(line.to_string());
            saw_anything = true;
        } else if ERROR_RE.is_match(line) {
            if severity == Severity::Low {
                severity = Severity::Medium;
            }
            evidence.push(line.to_string());
            saw_anything = true;
        }
    }

    if !saw_anything {
        return None;
    }
    Some(ClassifiedLog { severity, evidence })
}

/// Classifies growth in an output/targets-list file (§4.8 "output
/// targets" branch): a burst of `new_line_count` freshly-appended lines
/// is only noteworthy once it crosses a volume threshold.
pub fn classify_output_growth(new_line_count: usize) -> Option<Severity> {
    if new_line_count == 0 {
        None
    } else if new_line_count >= 50 {
        Some(Severity::Medium)
    } else {
        Some(Severity::Low)
    }
}

/// Classifies a job-status transition (§4.8 "status" branch): a clean
/// exit (`running=false`, `exit_code=Some(0)`) is not an incident; any
/// other terminal state is.
pub fn classify_status(running: bool, exit_code: Option<i64>) -> Option<Severity> {
    if running {
        return None;
    }
    match exit_code {
        Some(0) => None,
        Some(_) => Some(Severity::Medium),
        None => Some(Severity::Medium),
    }
}

#[derive(Debug, Clone)]
pub struct ResearchFinding {
    pub kind: String,
    pub title: String,
    pub tags: Vec<String>,
    pub severity: Option<String>,
    pub url: Option<String>,
    pub evidence: Vec<String>,
}

/// Classifies a research finding (§4.8 "research" branch): only an
/// exposure-shaped item — `kind`, `title`, or any `tags` entry matching
/// the exposure pattern — with a concrete URL and at least `min_evidence`
/// supporting lines becomes an incident — research findings are the
/// noisiest source, so this branch is the most conservative. Severity is
/// derived from the item's own `severity` field, not assumed: `critical`
/// and `high` map to `high`, `medium` stays `medium`, anything else
/// (including absent) is `low`.
pub fn classify_research_finding(finding: &ResearchFinding, min_evidence: usize) -> Option<Severity> {
    let is_exposure = EXPOSURE_KIND_RE.is_match(&finding.kind)
        || EXPOSURE_KIND_RE.is_match(&finding.title)
        || finding.tags.iter().any(|tag| EXPOSURE_KIND_RE.is_match(tag));
    if !is_exposure {
        return None;
    }
    if finding.url.is_none() {
        return None;
    }
    if finding.evidence.len() < min_evidence {
        return None;
    }
    Some(research_severity(finding.severity.as_deref()))
}

/// Maps a research item's own severity label onto the incident severity
/// scale: `critical|high → high`, `medium → medium`, else `low`.
fn research_severity(severity: Option<&str>) -> Severity {
    match severity.map(|s| s.to_ascii_lowercase()) {
        Some(ref s) if s == "critical" || s == "high" => Severity::High,
        Some(ref s) if s == "medium" => Severity::Medium,
        _ => Severity::Low,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noisy_recon_lines_are_dropped() {
        let text = "connection refused by 10.0.0.5:443\nname or service not known: internal.example";
        assert!(classify_log_chunk(text).is_none());
    }

    #[test]
    fn plain_errors_are_medium() {
        let classified = classify_log_chunk("2026-07-28 an ERROR occurred talking to the API").unwrap();
        assert_eq!(classified.severity, Severity::Medium);
        assert_eq!(classified.evidence.len(), 1);
    }

    #[test]
    fn fatal_lines_are_high_even_alongside_medium_lines() {
        let text = "an error happened\nPANIC: worker thread crashed";
        let classified = classify_log_chunk(text).unwrap();
        assert_eq!(classified.severity, Severity::High);
        assert_eq!(classified.evidence.len(), 2);
    }

    #[test]
    fn output_growth_below_threshold_is_low() {
        assert_eq!(classify_output_growth(3), Some(Severity::Low));
        assert_eq!(classify_output_growth(0), None);
        assert_eq!(classify_output_growth(50), Some(Severity::Medium));
    }

    #[test]
    fn status_clean_exit_is_not_an_incident() {
        assert_eq!(classify_status(false, Some(0)), None);
        assert_eq!(classify_status(true, None), None);
        assert_eq!(classify_status(false, Some(1)), Some(Severity::Medium));
        assert_eq!(classify_status(false, None), Some(Severity::Medium));
    }

    fn finding(kind: &str, title: &str, tags: &[&str], severity: Option<&str>) -> ResearchFinding {
        ResearchFinding {
            kind: kind.to_string(),
            title: title.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            severity: severity.map(String::from),
            url: Some("https://example.com".to_string()),
            evidence: vec!["a".to_string(), "b".to_string()],
        }
    }

    #[test]
    fn research_finding_requires_exposure_kind_url_and_evidence_count() {
        let f = finding("credential-leak", "found creds", &[], Some("critical"));
        assert_eq!(classify_research_finding(&f, 2), Some(Severity::High));
        assert_eq!(classify_research_finding(&f, 3), None);

        let no_url = ResearchFinding { url: None, ..f.clone() };
        assert_eq!(classify_research_finding(&no_url, 1), None);

        let not_exposure = finding("note", "just a note", &[], Some("critical"));
        assert_eq!(classify_research_finding(&not_exposure, 1), None);
    }

    #[test]
    fn research_finding_matches_via_title_or_tags_when_kind_is_plain() {
        let via_title = finding("note", "credential leak found in repo", &[], None);
        assert!(classify_research_finding(&via_title, 1).is_some());

        let via_tags = finding("note", "routine note", &["pii"], None);
        assert!(classify_research_finding(&via_tags, 1).is_some());

        let neither = finding("note", "routine note", &["internal"], None);
        assert_eq!(classify_research_finding(&neither, 1), None);
    }

    #[test]
    fn research_finding_severity_is_derived_from_item_not_assumed_high() {
        let critical = finding("exposure", "t", &[], Some("critical"));
        assert_eq!(classify_research_finding(&critical, 1), Some(Severity::High));

        let high = finding("exposure", "t", &[], Some("high"));
        assert_eq!(classify_research_finding(&high, 1), Some(Severity::High));

        let medium = finding("exposure", "t", &[], Some("medium"));
        assert_eq!(classify_research_finding(&medium, 1), Some(Severity::Medium));

        let low = finding("exposure", "t", &[], Some("low"));
        assert_eq!(classify_research_finding(&low, 1), Some(Severity::Low));

        let missing = finding("exposure", "t", &[], None);
        assert_eq!(classify_research_finding(&missing, 1), Some(Severity::Low));
    }
}

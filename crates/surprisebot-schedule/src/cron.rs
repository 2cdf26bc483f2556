//! Cron scheduling (§4.7): a compact 5-field (`min hour dom mon dow`)
//! evaluator and the trigger that turns a due [`CronJobConfig`] into a
//! [`RunRequest`]. No example repo in the corpus depends on an external
//! cron-parsing crate, so this evaluator is hand-written rather than
//! pulling in one purely for this (see `DESIGN.md`).

use chrono::{DateTime, Datelike, Timelike, Utc};
use surprisebot_config::{CronJobConfig, ResolvedConfig};
use surprisebot_types::{RunSource, SessionKey};

use surprisebot_runner::RunRequest;

/// One of the five cron fields, parsed into the set of values it matches.
/// Supports `*`, single values, comma lists, ranges (`a-b`), and steps
/// (`*/n`, `a-b/n`) — standard cron grammar.
#[derive(Debug, Clone)]
pub struct FieldMatch {
    values: Vec<u32>,
    is_wildcard: bool,
}

impl FieldMatch {
    pub fn matches(&self, value: u32) -> bool {
        self.is_wildcard || self.values.contains(&value)
    }
}

/// Parses one cron field over the inclusive range `[min, max]`.
pub fn parse_field(raw: &str, min: u32, max: u32) -> Result<FieldMatch, CronParseError> {
    let raw = raw.trim();
    if raw == "*" {
        return Ok(FieldMatch { values: Vec::new(), is_wildcard: true });
    }

    let mut values = Vec::new();
    for part in raw.split(',') {
        values.extend(parse_field_part(part, min, max)?);
    }
    values.sort_unstable();
    values.dedup();
    if values.is_empty() {
        return Err(CronParseError::Empty(raw.to_string()));
    }
    Ok(FieldMatch { values, is_wildcard: false })
}

fn parse_field_part(part: &str, min: u32, max: u32) -> Result<Vec<u32>, CronParseError> {
    let (range_part, step) = match part.split_once('/') {
        Some((range, step)) => {
            let step: u32 = step.parse().map_err(|_| CronParseError::Invalid(part.to_string()))?;
            if step == 0 {
                return Err(CronParseError::Invalid(part.to_string()));
            }
            (range, step)
        }
        None => (part, 1),
    };

    let (lo, hi) = if range_part == "*" {
        (min, max)
    } else if let Some((a, b)) = range_part.split_once('-') {
        let a: u32 = a.parse().map_err(|_| CronParseError::Invalid(part.to_string()))?;
        let b: u32 = b.parse().map_err(|_| CronParseError::Invalid(part.to_string()))?;
        (a, b)
    } else {
        let v: u32 = range_part.parse().map_err(|_| CronParseError::Invalid(part.to_string()))?;
        (v, v)
    };

    if lo > hi || hi > max || lo < min {
        return Err(CronParseError::Invalid(part.to_string()));
    }

    Ok((lo..=hi).step_by(step as usize).collect())
}

#[derive(Debug, thiserror::Error)]
pub enum CronParseError {
    #[error("cron field `{0}` parsed to no matching values")]
    Empty(String),
    #[error("cron field `{0}` is out of range or malformed")]
    Invalid(String),
    #[error("expected a 5-field cron expression, got `{0}`")]
    WrongArity(String),
}

/// A parsed `min hour dom mon dow` expression. Day-of-month and
/// day-of-week combine with logical OR when both are restricted
/// (non-`*`) — standard cron semantics — and with AND when at least one
/// of them is `*`.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    minute: FieldMatch,
    hour: FieldMatch,
    day_of_month: FieldMatch,
    month: FieldMatch,
    day_of_week: FieldMatch,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self, CronParseError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronParseError::WrongArity(expr.to_string()));
        }
        Ok(Self {
            minute: parse_field(fields[0], 0, 59)?,
            hour: parse_field(fields[1], 0, 23)?,
            day_of_month: parse_field(fields[2], 1, 31)?,
            month: parse_field(fields[3], 1, 12)?,
            day_of_week: parse_field(fields[4], 0, 6)?,
        })
    }

    /// Whether `at` (truncated to the minute) satisfies this schedule.
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        if !self.minute.matches(at.minute()) || !self.hour.matches(at.hour()) || !self.month.matches(at.month()) {
            return false;
        }
        let dom_matches = self.day_of_month.matches(at.day());
        let dow_matches = self.day_of_week.matches(at.weekday().num_days_from_sunday());

        if self.day_of_month.is_wildcard || self.day_of_week.is_wildcard {
            dom_matches && dow_matches
        } else {
            dom_matches || dow_matches
        }
    }
}

/// A configured cron job paired with its parsed schedule.
pub struct CronTrigger {
    config: CronJobConfig,
    schedule: CronSchedule,
}

impl CronTrigger {
    pub fn new(config: CronJobConfig) -> Result<Self, CronParseError> {
        let schedule = CronSchedule::parse(&config.cron_expr)?;
        Ok(Self { config, schedule })
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// Fires at most once per matching minute: callers are expected to
    /// call this once per tick at second granularity and only act on a
    /// `true` result for the first tick of that minute (the caller's
    /// scheduler loop enforces the once-per-minute cadence, not this
    /// method).
    pub fn is_due(&self, at: DateTime<Utc>) -> bool {
        self.schedule.matches(at)
    }

    pub fn session_key(&self) -> SessionKey {
        SessionKey::cron(&self.config.id)
    }

    pub fn agent_id(&self) -> &str {
        self.config.agent_id.as_deref().unwrap_or("main")
    }

    pub fn job_type(&self) -> &str {
        self.config.job_type.as_deref().unwrap_or("cron")
    }

    /// `"[cron:<id> <name>] <message>"` — identifies the synthetic
    /// trigger inline in the transcript so a later reader can tell a
    /// cron-initiated turn from an interactive one.
    pub fn composed_prompt(&self) -> String {
        format!("[cron:{} {}] {}", self.config.id, self.config.name, self.config.payload.message)
    }

    pub fn build_run_request(&self) -> RunRequest {
        let mut req = RunRequest::new(self.agent_id(), self.job_type(), self.composed_prompt());
        req.session_key = Some(self.session_key());
        req.source = RunSource::Cron;
        req.deliver = self.config.payload.deliver;
        req.best_effort_deliver = self.config.payload.best_effort_deliver;
        req.channel = self.config.payload.channel.clone();
        req.to = self.config.payload.to.clone();
        req.timeout_sec = self.config.payload.timeout_seconds;
        req
    }
}

/// Builds one [`CronTrigger`] per configured job, dropping (and logging)
/// any whose `cron_expr` fails to parse rather than failing the whole
/// scheduler over one bad entry.
pub fn build_triggers(cfg: &ResolvedConfig) -> Vec<CronTrigger> {
    cfg.cron
        .iter()
        .filter_map(|job| match CronTrigger::new(job.clone()) {
            Ok(trigger) => Some(trigger),
            Err(err) => {
                tracing::warn!(job_id = %job.id, error = %err, "skipping cron job with unparseable schedule");
                None
            }
        })
        .collect()
}

/// Returns the triggers due at `at`, paired with the [`RunRequest`] each
/// would produce (§4.7 "evaluate due jobs").
pub fn due_requests(triggers: &[CronTrigger], at: DateTime<Utc>) -> Vec<(String, RunRequest)> {
    triggers
        .iter()
        .filter(|t| t.is_due(at))
        .map(|t| (t.id().to_string(), t.build_run_request()))
        .collect()
}

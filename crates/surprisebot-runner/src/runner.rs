//! The agent runner (§4.5): the central state machine. One [`AgentRunner`]
//! is constructed per process and drives every run — interactive,
//! heartbeat, and cron alike — through the same pipeline: resolve the
//! session, check the send policy, evaluate the budget, resolve the model
//! candidates and tool policy, execute with failover, apply the
//! tool-result retry rules, persist session/ledger state, and hand the
//! reply to delivery.
//!
//! Every stage after send-policy returns its failure into the run's
//! terminal status rather than panicking — callers (heartbeat ticks, cron
//! jobs, channel dispatch) always get a [`RunOutcome`] back, never a
//! `Result` they have to unwrap.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use surprisebot_config::{resolve, ConfigStore};
use surprisebot_ledger::LedgerStore;
use surprisebot_model::{build_candidates, Candidate, CooldownStore, ExecutionError};
use surprisebot_policy::{
    build_layer_list, evaluate_budget, resolve_budget_caps, resolve_profile_policy, resolve_tool_set,
};
use surprisebot_session::SessionStore;
use surprisebot_tools::ToolRegistry;
use surprisebot_types::{
    format_user_visible_failure, AbortError, AgentEventStream, BudgetDecision, BudgetError, LedgerKind,
    PolicyError, RunLedgerRecord, RunStatus, SessionEntry, SessionKey, ThinkingLevel,
};

use crate::compaction::reset_session_for_compaction_failure;
use crate::delivery::{deliver_with_best_effort, DeliverySink};
use crate::events::AgentEventBus;
use crate::executor::DualExecutor;
use crate::messaging_dedup::MessagingDedupTracker;
use crate::retry::{evaluate_retry, strict_recheck, ToolResultsPolicy};
use crate::types::{ExecutorArgs, ExecutorOutcome, Payload, RunOutcome, RunOutcomeStatus, RunRequest};

/// Checked before budget evaluation (§4.5 "check send policy"). A denial
/// short-circuits the run before any model/budget work happens.
#[async_trait]
pub trait SendPolicy: Send + Sync {
    async fn check(&self, req: &RunRequest) -> Result<(), PolicyError>;
}

/// The default policy: every run is allowed. Real deployments wire in a
/// policy backed by `tools.sandbox`/trust-tier rules; this is the safe
/// starting point for a process that hasn't configured one.
pub struct AllowAllSendPolicy;

#[async_trait]
impl SendPolicy for AllowAllSendPolicy {
    async fn check(&self, _req: &RunRequest) -> Result<(), PolicyError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Abort(#[from] AbortError),
    #[error(transparent)]
    Budget(#[from] BudgetError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error("execution failed: {0}")]
    Execution(String),
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

/// Everything the runner needs injected. One instance is built per process
/// and shared (behind `Arc` at the call site) across every run.
pub struct RunnerDeps {
    pub session_store: Arc<SessionStore>,
    pub ledger: Arc<LedgerStore>,
    pub cooldowns: CooldownStore,
    pub config_store: ConfigStore,
    pub tool_registry: ToolRegistry,
    pub executor: Arc<DualExecutor>,
    pub delivery: Arc<dyn DeliverySink>,
    pub events: AgentEventBus,
    pub send_policy: Arc<dyn SendPolicy>,
}

pub struct AgentRunner {
    deps: RunnerDeps,
}

impl AgentRunner {
    pub fn new(deps: RunnerDeps) -> Self {
        Self { deps }
    }

    /// Delivers payloads outside the normal run pipeline — used by the
    /// heartbeat and incident schedulers, which decide whether a reply is
    /// worth sending only after the run has already completed (§4.6,
    /// §4.10), so they cannot simply set `RunRequest::deliver`.
    pub async fn deliver(
        &self,
        channel: &str,
        to: &str,
        account_id: Option<&str>,
        payloads: &[crate::types::Payload],
        best_effort: bool,
    ) -> Result<(), crate::delivery::DeliveryError> {
        crate::delivery::deliver_with_best_effort(self.deps.delivery.as_ref(), channel, to, account_id, payloads, best_effort).await
    }

    /// Runs one stimulus end to end (§4.5's run diagram). Never panics;
    /// every error path is captured into the returned [`RunOutcome`]
    /// rather than propagated, since none of this orchestrator's callers
    /// (heartbeat, cron, channel dispatch) have anyone left to hand a
    /// `Result` to.
    pub async fn run(&self, req: RunRequest) -> RunOutcome {
        let run_id = req.run_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let session_key = req.session_key.clone().unwrap_or_else(|| {
            SessionKey::build(&req.agent_id, req.channel.as_deref().unwrap_or("direct"), req.to.as_deref().unwrap_or("unknown"))
        });
        let started_at = Utc::now();

        self.deps
            .events
            .publish(&run_id, AgentEventStream::Lifecycle, json!({"phase": "start", "session_key": session_key.as_str()}))
            .await;

        let outcome = self.run_inner(&req, &session_key, &run_id).await;

        let (status, ledger_status, error_message) = match &outcome {
            Ok(ok) => (ok.status.clone(), RunStatus::Done, None),
            Err(RunError::Abort(e)) => (RunOutcomeStatus::Cancelled, RunStatus::Cancelled, Some(e.0.clone())),
            Err(e) => (RunOutcomeStatus::Failed, RunStatus::Failed, Some(e.to_string())),
        };
        let estimated_tokens = outcome
            .as_ref()
            .ok()
            .and_then(|ok| ok.usage.as_ref())
            .map(|u| u.input_tokens + u.output_tokens)
            .unwrap_or(0);

        let record = RunLedgerRecord {
            id: run_id.clone(),
            ts: Utc::now(),
            source: req.source,
            status: ledger_status,
            agent_id: req.agent_id.clone(),
            job_type: req.job_type.clone(),
            command: Some(req.message.clone()),
            started_at: Some(started_at),
            finished_at: Some(Utc::now()),
            exit_code: Some(if matches!(ledger_status, RunStatus::Done) { 0 } else { 1 }),
            estimated_tokens,
            meta: error_message.clone().map(|m| json!({"error": m})).unwrap_or_else(|| json!({})),
        };
        // §7: a ledger-write failure in this finally clause is logged, not
        // rethrown — doing so would replace a real outcome with a
        // bookkeeping failure.
        match serde_json::to_value(&record) {
            Ok(value) => {
                if let Err(err) = self.deps.ledger.append(LedgerKind::RunLedger, value).await {
                    tracing::error!(%err, run_id = %run_id, "failed to append terminal run-ledger record");
                }
            }
            Err(err) => tracing::error!(%err, run_id = %run_id, "failed to serialize terminal run-ledger record"),
        }

        tracing::info!(
            target: "surprisebot.run",
            run_id = %run_id,
            agent_id = %req.agent_id,
            job_type = %req.job_type,
            status = ?ledger_status,
            duration_ms = (Utc::now() - started_at).num_milliseconds(),
            estimated_tokens,
            "run completed"
        );

        self.deps
            .events
            .publish(&run_id, AgentEventStream::Lifecycle, json!({"phase": "end", "status": format!("{status:?}")}))
            .await;
        self.deps.events.clear(&run_id).await;

        match outcome {
            Ok(ok) => ok,
            Err(err) => RunOutcome {
                status,
                payloads: vec![Payload::text(format_user_visible_failure(
                    &err.to_string(),
                    "Retry the command or run it directly with /bash run …",
                ))],
                provider: None,
                model: None,
                usage: None,
                error: Some(err.to_string()),
                session_key,
                run_id,
            },
        }
    }

    async fn run_inner(&self, req: &RunRequest, session_key: &SessionKey, run_id: &str) -> Result<RunOutcome, RunError> {
        let started_at = Utc::now();

        // resolve-session
        let mut entry = self
            .deps
            .session_store
            .update(session_key, |existing| {
                existing.unwrap_or_else(|| {
                    let new_session_id = uuid::Uuid::new_v4().to_string();
                    let transcript_path = self.deps.session_store.resolve_transcript_path(&new_session_id, session_key.thread_id());
                    let mut e = SessionEntry::new(transcript_path.to_string_lossy().to_string());
                    e.session_id = new_session_id;
                    e
                })
            })
            .await
            .map_err(|e| RunError::Fatal(e.into()))?;

        // check-send-policy
        self.deps.send_policy.check(req).await?;

        let cfg = resolve(&self.deps.config_store).await.map_err(RunError::Fatal)?;

        // evaluate-budget
        let token_estimate = cfg
            .budgets
            .by_agent
            .get(&req.agent_id)
            .and_then(|c| c.token_estimate)
            .or(cfg.budgets.global.token_estimate)
            .unwrap_or(0);
        let budget = evaluate_budget(&self.deps.ledger, &cfg.budgets, &req.agent_id, &req.job_type, token_estimate, Utc::now())
            .await
            .map_err(RunError::Fatal)?;
        match budget.decision {
            BudgetDecision::Deny => return Err(BudgetError::Denied { reason: budget.reason }.into()),
            BudgetDecision::Defer => return Err(BudgetError::Deferred { reason: budget.reason }.into()),
            BudgetDecision::Throttle | BudgetDecision::Allow => {}
        }
        let caps = resolve_budget_caps(&cfg.budgets, &req.agent_id, &req.job_type);

        // resolve-workspace / ensure shared-memory file exists
        let workspace_dir = cfg.state_dir.clone().unwrap_or_else(|| ".".to_string());
        if let Some(shared_path) = &cfg.tools.shared_memory_path {
            let path = PathBuf::from(shared_path);
            if let Some(parent) = path.parent() {
                let _ = tokio::fs::create_dir_all(parent).await;
            }
            if tokio::fs::metadata(&path).await.is_err() {
                let _ = tokio::fs::write(&path, b"").await;
            }
        }

        // resolve-model: build the ordered candidate list (§4.2)
        let default_candidate = Candidate::new(
            cfg.models.default_provider.clone().unwrap_or_else(|| "anthropic".to_string()),
            cfg.models.default_model.clone().unwrap_or_else(|| "default".to_string()),
        );
        let requested_candidate = match (&entry.provider_override, &entry.model_override) {
            (Some(p), Some(m)) => Some(Candidate::new(p.clone(), m.clone())),
            _ => None,
        };
        let fallbacks: Vec<Candidate> = cfg.models.fallbacks.iter().map(Candidate::from).collect();
        let allow_list: Option<Vec<Candidate>> = cfg.models.allow_list.as_ref().map(|list| list.iter().map(Candidate::from).collect());
        let is_cli_provider = |p: &str| cfg.models.cli_providers.iter().any(|c| c == p);

        let mut probe_pool = fallbacks.clone();
        probe_pool.push(default_candidate.clone());
        if let Some(requested) = &requested_candidate {
            probe_pool.push(requested.clone());
        }
        let now_ms = Utc::now().timestamp_millis();
        let mut cooled_down: HashSet<String> = HashSet::new();
        for candidate in &probe_pool {
            if is_cli_provider(&candidate.provider) && self.deps.cooldowns.is_active(&candidate.provider, &candidate.model, now_ms).await {
                cooled_down.insert(candidate.cooldown_key());
            }
        }

        let candidates = build_candidates(
            requested_candidate.as_ref(),
            &default_candidate,
            &fallbacks,
            allow_list.as_deref(),
            is_cli_provider,
            |c| cooled_down.contains(&c.cooldown_key()),
        );

        // resolve-thinking: request override wins, else the session's
        // sticky level; downgrade xhigh when the winning candidate's
        // provider doesn't support it.
        let mut thinking = req.thinking.unwrap_or(entry.thinking_level);
        let winning_provider = candidates.first().map(|c| c.provider.as_str()).unwrap_or(default_candidate.provider.as_str());
        if thinking == ThinkingLevel::Xhigh && cfg.models.xhigh_unsupported_providers.iter().any(|p| p == winning_provider) {
            thinking = ThinkingLevel::High;
        }
        let verbose = req.verbose.unwrap_or(entry.verbose_level);

        // build-skill-snapshot for a brand new session
        if entry.skills_snapshot.is_empty() && !cfg.skills_roots.is_empty() {
            entry.skills_snapshot = cfg.skills_roots.clone();
        }

        // persist overrides ahead of execution so a crash mid-run still
        // leaves thinking/verbose/skills-snapshot recorded.
        let snapshot_for_update = entry.skills_snapshot.clone();
        entry = self
            .deps
            .session_store
            .update(session_key, move |existing| {
                let mut e = existing.unwrap_or_else(|| SessionEntry::new(String::new()));
                e.thinking_level = thinking;
                e.verbose_level = verbose;
                if e.skills_snapshot.is_empty() {
                    e.skills_snapshot = snapshot_for_update;
                }
                e
            })
            .await
            .map_err(|e| RunError::Fatal(e.into()))?;

        // append run-ledger(running)
        let running_record = RunLedgerRecord {
            id: run_id.to_string(),
            ts: Utc::now(),
            source: req.source,
            status: RunStatus::Running,
            agent_id: req.agent_id.clone(),
            job_type: req.job_type.clone(),
            command: Some(req.message.clone()),
            started_at: Some(started_at),
            finished_at: None,
            exit_code: None,
            estimated_tokens: token_estimate,
            meta: json!({}),
        };
        self.deps
            .ledger
            .append(LedgerKind::RunLedger, serde_json::to_value(&running_record).map_err(anyhow::Error::from)?)
            .await
            .map_err(anyhow::Error::from)?;

        // resolve the tool policy set for this run (§4.3's folded layers)
        let profile_policy = req.tool_profile.as_deref().and_then(|name| resolve_profile_policy(&self.deps.tool_registry, &cfg.tools, name));
        // Sandbox and subagent-profile layers are not modeled at this
        // boundary yet; both are always absent here.
        let layers = build_layer_list(&cfg.tools, profile_policy.as_ref(), winning_provider, &req.agent_id, false, None);
        let allowed_tools = resolve_tool_set(&self.deps.tool_registry, &layers);

        // execute-with-failover
        let mut dedup = MessagingDedupTracker::new();
        let mut exec_outcome = self
            .execute_once(req, session_key, &entry, &candidates, thinking, verbose, &workspace_dir, run_id, caps.max_runtime_seconds, &allowed_tools)
            .await
            .map_err(to_run_error)?;

        // auto-compaction handling (§4.5.3): reset session identity and
        // retry exactly once when the executor reported a failure.
        if exec_outcome.meta.compaction_failed && cfg.runner.reset_session_on_compaction_failure {
            reset_session_for_compaction_failure(&mut entry);
            exec_outcome = self
                .execute_once(req, session_key, &entry, &candidates, thinking, verbose, &workspace_dir, run_id, caps.max_runtime_seconds, &allowed_tools)
                .await
                .map_err(to_run_error)?;
        }

        // messaging-tool dedup (§4.5.2): the executor is a black box here,
        // so `dedup` only ever sees the final payload set — a concrete
        // executor wires `on_tool_start`/`on_tool_complete` from its own
        // agent-events stream as it drains.
        let mut payloads: Vec<Payload> = exec_outcome
            .payloads
            .into_iter()
            .filter(|p| p.normalized_text().map(|t| !dedup.already_sent(&t)).unwrap_or(true))
            .collect();

        // apply retry policies (§4.5.1)
        let policy = ToolResultsPolicy {
            retry_once: cfg.runner.tool_results.retry_once,
            warn_on_missing: cfg.runner.tool_results.warn_on_missing,
            require_tool_for_queries: cfg.runner.tool_results.require_tool_for_queries,
            strict: cfg.runner.tool_results.strict,
        };
        if let Some(reason) = evaluate_retry(&policy, &exec_outcome.reply_text, &req.message, &exec_outcome.meta.tool_results) {
            let mut retry_req = req.clone();
            retry_req.message = format!("{}\n\n{}", req.message, reason.instruction());
            retry_req.session_key = Some(session_key.clone());
            if let Ok(retried) = self
                .execute_once(&retry_req, session_key, &entry, &candidates, thinking, verbose, &workspace_dir, run_id, caps.max_runtime_seconds, &allowed_tools)
                .await
            {
                if let Some(replacement) = strict_recheck(&policy, reason, &retried.reply_text, &req.message, &retried.meta.tool_results) {
                    payloads = vec![Payload::text(replacement)];
                } else {
                    payloads = retried.payloads;
                }
                exec_outcome.meta = retried.meta;
            }
        }

        // update the session store with this run's resolved model/usage
        let usage = exec_outcome.meta.usage.clone();
        let resolved_provider = exec_outcome.meta.provider.clone();
        let resolved_model = exec_outcome.meta.model.clone();
        let resolved_session_id = exec_outcome.meta.session_id.clone();
        let cli_session_id = exec_outcome.meta.cli_session_id.clone();
        let channel = req.channel.clone();
        let to = req.to.clone();
        let account_id = req.account_id.clone();
        entry = self
            .deps
            .session_store
            .update(session_key, move |existing| {
                let mut e = existing.unwrap_or_else(|| SessionEntry::new(String::new()));
                e.model_provider = Some(resolved_provider.clone());
                e.model = Some(resolved_model.clone());
                e.session_id = resolved_session_id.clone();
                e.input_tokens = usage.input_tokens;
                e.output_tokens = usage.output_tokens;
                e.total_tokens = usage.input_tokens + usage.output_tokens + usage.cache_read_tokens + usage.cache_write_tokens;
                e.context_tokens = e.total_tokens;
                e.response_usage = Some(usage.clone());
                e.system_sent = true;
                e.aborted_last_run = false;
                if let Some(cli_id) = &cli_session_id {
                    e.cli_session_ids.insert(resolved_provider.clone(), cli_id.clone());
                }
                if let (Some(channel), Some(to)) = (&channel, &to) {
                    e.last_channel = Some(channel.clone());
                    e.last_to = Some(to.clone());
                }
                if let Some(account) = &account_id {
                    e.last_account_id = Some(account.clone());
                }
                e
            })
            .await
            .map_err(|e| RunError::Fatal(e.into()))?;

        if cfg.runner.show_usage_line {
            if let Some(last) = payloads.last_mut() {
                if let Some(text) = &mut last.text {
                    text.push_str(&format!("\n\n— {}/{} · {} tokens", exec_outcome.meta.provider, exec_outcome.meta.model, entry.total_tokens));
                }
            }
        }

        // deliver-or-return
        if req.deliver {
            match (&req.channel, &req.to) {
                (Some(channel), Some(to)) => {
                    deliver_with_best_effort(self.deps.delivery.as_ref(), channel, to, req.account_id.as_deref(), &payloads, req.best_effort_deliver)
                        .await
                        .map_err(|e| RunError::Fatal(e.into()))?;
                }
                _ => tracing::warn!(run_id, "deliver requested but no channel/to resolved on the request, skipping delivery"),
            }
        }

        Ok(RunOutcome {
            status: RunOutcomeStatus::Done,
            payloads,
            provider: Some(exec_outcome.meta.provider),
            model: Some(exec_outcome.meta.model),
            usage: Some(exec_outcome.meta.usage),
            error: None,
            session_key: session_key.clone(),
            run_id: run_id.to_string(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_once(
        &self,
        req: &RunRequest,
        session_key: &SessionKey,
        entry: &SessionEntry,
        candidates: &[Candidate],
        thinking: ThinkingLevel,
        verbose: surprisebot_types::VerboseLevel,
        workspace_dir: &str,
        run_id: &str,
        max_runtime_seconds: Option<u64>,
        allowed_tools: &std::collections::BTreeSet<String>,
    ) -> Result<ExecutorOutcome, ExecutionError> {
        let timeout_ms = req.timeout_sec.or(max_runtime_seconds).map(|s| s * 1000).unwrap_or(120_000);

        let outcome = surprisebot_model::run_with_failover(
            candidates,
            |p| self.deps.executor.is_cli_provider(p),
            &self.deps.cooldowns,
            Utc::now().timestamp_millis(),
            |candidate| {
                let args = ExecutorArgs {
                    session_id: entry.session_id.clone(),
                    session_key: session_key.clone(),
                    session_file: entry.session_file.clone(),
                    workspace_dir: workspace_dir.to_string(),
                    prompt: req.message.clone(),
                    images: req.images.clone(),
                    provider: candidate.provider.clone(),
                    model: candidate.model.clone(),
                    think_level: thinking,
                    verbose_level: verbose,
                    timeout_ms,
                    run_id: run_id.to_string(),
                    lane: req.lane.clone(),
                    extra_system_prompt: req.extra_system_prompt.clone(),
                    abort: req.abort.clone(),
                    allowed_tools: allowed_tools.clone(),
                };
                let executor = self.deps.executor.clone();
                async move { executor.execute(args).await }
            },
            None,
        )
        .await?;

        Ok(outcome.result)
    }
}

fn to_run_error(err: ExecutionError) -> RunError {
    match err {
        ExecutionError::Abort(abort) => RunError::Abort(abort),
        other => RunError::Execution(other.to_string()),
    }
}

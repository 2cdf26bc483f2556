//! Tool-result retry policies (§4.5.1): after the first successful
//! execution, up to one retry per rule is applied, in order. After any
//! retry path completes, strict-mode re-checks run again and may replace
//! the model's reply with a user-visible error payload instead.

use regex::Regex;
use surprisebot_types::format_user_visible_failure;

use crate::types::ToolResultsMeta;

#[derive(Debug, Clone, Default)]
pub struct ToolResultsPolicy {
    pub retry_once: bool,
    pub warn_on_missing: bool,
    pub require_tool_for_queries: bool,
    pub strict: bool,
}

/// Which retry rule (if any) fired, so the caller can compose the
/// re-run instruction to append to the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    MissingToolResults,
    ClaimedToolUsage,
    RequiredToolForQuery,
}

impl RetryReason {
    /// The instruction appended to the prompt before re-running (§4.5.1).
    pub fn instruction(self) -> &'static str {
        match self {
            RetryReason::MissingToolResults => {
                "Some tool calls have not returned results yet. Re-run the pending tools and wait for their results before replying."
            }
            RetryReason::ClaimedToolUsage => {
                "Do not claim a tool was run or its result was produced unless a tool call actually executed this turn."
            }
            RetryReason::RequiredToolForQuery => {
                "This request requires running the relevant tool before answering; run it now."
            }
        }
    }
}

fn claimed_tool_usage_patterns() -> [Regex; 3] {
    [
        Regex::new(r"(?i)\btool (call|result)\b").unwrap(),
        Regex::new(r"(?i)\bstill waiting\b").unwrap(),
        Regex::new(r"(?i)\bI (ran|executed)\b").unwrap(),
    ]
}

fn filesystem_or_command_query_re() -> Regex {
    Regex::new(r"(?i)\b(ls|cat|grep|find|run|exec(ute)?|what files|list files)\b").unwrap()
}

/// Evaluates the three retry rules in order and returns at most one
/// [`RetryReason`] — only one retry is ever applied per run (§4.5.1).
pub fn evaluate_retry(
    policy: &ToolResultsPolicy,
    reply_text: &str,
    inbound_command: &str,
    tool_results: &ToolResultsMeta,
) -> Option<RetryReason> {
    if !tool_results.pending.is_empty() && policy.retry_once {
        return Some(RetryReason::MissingToolResults);
    }

    if tool_results.started == 0
        && policy.warn_on_missing
        && claimed_tool_usage_patterns().iter().any(|re| re.is_match(reply_text))
    {
        return Some(RetryReason::ClaimedToolUsage);
    }

    if tool_results.started == 0
        && policy.require_tool_for_queries
        && filesystem_or_command_query_re().is_match(inbound_command)
    {
        return Some(RetryReason::RequiredToolForQuery);
    }

    None
}

/// Strict-mode re-check after a retry has already run once: if the
/// condition that triggered the retry still holds, the reply is replaced
/// with a `⚠️`-prefixed user-visible error rather than the model's text
/// (§4.5.1, §7).
pub fn strict_recheck(
    policy: &ToolResultsPolicy,
    reason: RetryReason,
    reply_text: &str,
    inbound_command: &str,
    tool_results: &ToolResultsMeta,
) -> Option<String> {
    if !policy.strict {
        return None;
    }
    let still_failing = match reason {
        RetryReason::MissingToolResults => !tool_results.pending.is_empty(),
        RetryReason::ClaimedToolUsage => {
            tool_results.started == 0 && claimed_tool_usage_patterns().iter().any(|re| re.is_match(reply_text))
        }
        RetryReason::RequiredToolForQuery => {
            tool_results.started == 0 && filesystem_or_command_query_re().is_match(inbound_command)
        }
    };
    if !still_failing {
        return None;
    }
    let summary = match reason {
        RetryReason::MissingToolResults => "Tool results missing",
        RetryReason::ClaimedToolUsage => "The reply claims tool usage that did not happen",
        RetryReason::RequiredToolForQuery => "This request requires a tool that was never run",
    };
    Some(format_user_visible_failure(summary, "Retry the command or run it directly with /bash run …"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(started: u64, pending: Vec<&str>) -> ToolResultsMeta {
        ToolResultsMeta {
            started,
            pending: pending.into_iter().map(String::from).collect(),
            ended: started,
        }
    }

    #[test]
    fn missing_tool_results_triggers_retry_when_enabled() {
        let policy = ToolResultsPolicy { retry_once: true, ..Default::default() };
        let reason = evaluate_retry(&policy, "done", "list files", &meta(1, vec!["call-1"]));
        assert_eq!(reason, Some(RetryReason::MissingToolResults));
    }

    #[test]
    fn claimed_tool_usage_without_a_started_tool_triggers_retry() {
        let policy = ToolResultsPolicy { warn_on_missing: true, ..Default::default() };
        let reason = evaluate_retry(&policy, "I ran the script and it passed", "do a thing", &meta(0, vec![]));
        assert_eq!(reason, Some(RetryReason::ClaimedToolUsage));
    }

    #[test]
    fn required_tool_for_filesystem_query_triggers_retry() {
        let policy = ToolResultsPolicy { require_tool_for_queries: true, ..Default::default() };
        let reason = evaluate_retry(&policy, "here you go", "grep for TODO", &meta(0, vec![]));
        assert_eq!(reason, Some(RetryReason::RequiredToolForQuery));
    }

    #[test]
    fn no_rule_fires_when_everything_looks_fine() {
        let policy = ToolResultsPolicy {
            retry_once: true,
            warn_on_missing: true,
            require_tool_for_queries: true,
            strict: true,
        };
        let reason = evaluate_retry(&policy, "here is the answer", "what's 2+2", &meta(1, vec![]));
        assert_eq!(reason, None);
    }

    #[test]
    fn strict_recheck_replaces_reply_when_still_failing() {
        let policy = ToolResultsPolicy { strict: true, ..Default::default() };
        let replacement = strict_recheck(&policy, RetryReason::MissingToolResults, "done", "cmd", &meta(1, vec!["call-1"]));
        let text = replacement.unwrap();
        assert!(text.starts_with('\u{26A0}'));
    }

    #[test]
    fn strict_recheck_is_none_when_resolved() {
        let policy = ToolResultsPolicy { strict: true, ..Default::default() };
        let replacement = strict_recheck(&policy, RetryReason::MissingToolResults, "done", "cmd", &meta(1, vec![]));
        assert!(replacement.is_none());
    }
}

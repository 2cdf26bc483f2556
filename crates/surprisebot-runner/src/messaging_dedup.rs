//! Messaging-tool dedup (§4.5.2): tracks text the agent has already sent
//! via a send-message tool call so delivery doesn't echo it a second time
//! through the normal reply path.

use std::collections::HashMap;

#[derive(Default)]
pub struct MessagingDedupTracker {
    pending_texts: HashMap<String, String>,
    pending_targets: HashMap<String, String>,
    sent_texts: Vec<String>,
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

impl MessagingDedupTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a send-message tool call's text/target while the call is
    /// still in flight.
    pub fn on_tool_start(&mut self, tool_call_id: &str, text: &str, target: Option<&str>) {
        self.pending_texts.insert(tool_call_id.to_string(), text.to_string());
        if let Some(target) = target {
            self.pending_targets.insert(tool_call_id.to_string(), target.to_string());
        }
    }

    /// On a successful completion the pending text graduates into the
    /// sent list; on error it's discarded without ever being considered
    /// "sent" (§4.5.2).
    pub fn on_tool_complete(&mut self, tool_call_id: &str, is_error: bool) {
        self.pending_targets.remove(tool_call_id);
        let Some(text) = self.pending_texts.remove(tool_call_id) else {
            return;
        };
        if !is_error {
            self.sent_texts.push(text);
        }
    }

    /// True if `candidate` (case/whitespace-normalized) matches text the
    /// agent already sent via a tool this run.
    pub fn already_sent(&self, candidate: &str) -> bool {
        let normalized = normalize(candidate);
        self.sent_texts.iter().any(|sent| normalize(sent) == normalized)
    }
}

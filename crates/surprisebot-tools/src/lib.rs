//! Tool registry backing the tool policy engine (§4.3).
//!
//! Unlike the teacher's `tandem-tools`, this registry does not execute
//! tools — the core orchestrator treats tool execution as belonging to the
//! injected embedded/CLI executor (§6's "Model executor interfaces"), an
//! external collaborator. What the policy layer needs from a registry is
//! the universe of known tool names, their category (so the shared-memory
//! write guard and messaging-tool dedup can recognize write-like and
//! send-message tools without hardcoding name lists at every call site),
//! and named profiles.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Read,
    Write,
    Exec,
    Messaging,
    Meta,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub category: ToolCategory,
}

/// The fixed universe of tool names the orchestrator knows about, grouped
/// by category. New tool names introduced by the embedded/CLI executor
/// that aren't in this list are still accepted by policy filtering (an
/// unknown name participates in allow/deny sets like any other), but they
/// won't be recognized by [`ToolRegistry::is_write_like`] or
/// [`ToolRegistry::is_messaging`].
const BUILTIN_TOOLS: &[ToolDescriptor] = &[
    ToolDescriptor { name: "read", category: ToolCategory::Read },
    ToolDescriptor { name: "glob", category: ToolCategory::Read },
    ToolDescriptor { name: "grep", category: ToolCategory::Read },
    ToolDescriptor { name: "codesearch", category: ToolCategory::Read },
    ToolDescriptor { name: "webfetch", category: ToolCategory::Read },
    ToolDescriptor { name: "websearch", category: ToolCategory::Read },
    ToolDescriptor { name: "write", category: ToolCategory::Write },
    ToolDescriptor { name: "edit", category: ToolCategory::Write },
    ToolDescriptor { name: "apply_patch", category: ToolCategory::Write },
    ToolDescriptor { name: "exec", category: ToolCategory::Exec },
    ToolDescriptor { name: "bash", category: ToolCategory::Exec },
    ToolDescriptor { name: "lsp", category: ToolCategory::Exec },
    ToolDescriptor { name: "batch", category: ToolCategory::Exec },
    ToolDescriptor { name: "task", category: ToolCategory::Exec },
    ToolDescriptor { name: "skill", category: ToolCategory::Exec },
    ToolDescriptor { name: "send_message", category: ToolCategory::Messaging },
    ToolDescriptor { name: "question", category: ToolCategory::Meta },
    ToolDescriptor { name: "session_status", category: ToolCategory::Meta },
    ToolDescriptor { name: "todo_write", category: ToolCategory::Meta },
];

#[derive(Clone, Default)]
pub struct ToolRegistry {
    extra: Vec<ToolDescriptor>,
}

impl ToolRegistry {
    pub fn builtin() -> Self {
        Self { extra: Vec::new() }
    }

    /// Registers an additional tool name beyond the builtin set, e.g. one
    /// contributed by a subagent profile or a sandbox-specific backend.
    pub fn register(&mut self, name: &'static str, category: ToolCategory) {
        self.extra.push(ToolDescriptor { name, category });
    }

    pub fn all(&self) -> Vec<ToolDescriptor> {
        let mut out: Vec<ToolDescriptor> = BUILTIN_TOOLS.to_vec();
        out.extend(self.extra.iter().cloned());
        out
    }

    pub fn all_names(&self) -> BTreeSet<String> {
        self.all().into_iter().map(|d| d.name.to_string()).collect()
    }

    pub fn category_of(&self, name: &str) -> Option<ToolCategory> {
        self.all().into_iter().find(|d| d.name == name).map(|d| d.category)
    }

    /// True for `write`, `edit`, and `apply_patch` — the tools the
    /// shared-memory write guard wraps (§4.3).
    pub fn is_write_like(&self, name: &str) -> bool {
        matches!(self.category_of(name), Some(ToolCategory::Write))
    }

    /// True for the send-message tool tracked by messaging-tool dedup
    /// (§4.5.2).
    pub fn is_messaging(&self, name: &str) -> bool {
        matches!(self.category_of(name), Some(ToolCategory::Messaging))
    }

    /// Named allow-set profiles referenced by §4.3 (`minimal`, `coding`).
    /// Unknown profile names resolve to `None` rather than an empty set so
    /// callers can distinguish "no such profile" from "profile allows
    /// nothing".
    pub fn profile_tools(&self, profile: &str) -> Option<BTreeSet<String>> {
        match profile {
            "minimal" => Some(BTreeSet::from(["session_status".to_string()])),
            "coding" => Some(
                ["read", "write", "edit", "exec", "glob", "grep", "apply_patch", "bash"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
            ),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_like_tools_are_recognized() {
        let registry = ToolRegistry::builtin();
        assert!(registry.is_write_like("write"));
        assert!(registry.is_write_like("edit"));
        assert!(registry.is_write_like("apply_patch"));
        assert!(!registry.is_write_like("read"));
    }

    #[test]
    fn messaging_tool_is_recognized() {
        let registry = ToolRegistry::builtin();
        assert!(registry.is_messaging("send_message"));
        assert!(!registry.is_messaging("write"));
    }

    #[test]
    fn minimal_profile_allows_only_session_status() {
        let registry = ToolRegistry::builtin();
        let allow = registry.profile_tools("minimal").unwrap();
        assert_eq!(allow, BTreeSet::from(["session_status".to_string()]));
    }

    #[test]
    fn unknown_profile_is_none() {
        let registry = ToolRegistry::builtin();
        assert!(registry.profile_tools("nonexistent").is_none());
    }

    #[test]
    fn registered_extra_tool_participates_in_all_names() {
        let mut registry = ToolRegistry::builtin();
        registry.register("custom_subagent_tool", ToolCategory::Exec);
        assert!(registry.all_names().contains("custom_subagent_tool"));
    }
}

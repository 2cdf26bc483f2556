use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// One allow/deny layer (§4.3). `allow` unset means "no restriction from
/// this layer"; same for `deny`. `profile`, when set, is resolved against
/// a tool registry's named profiles and folded in as an additional allow
/// set by the caller (this type doesn't resolve profiles itself since
/// profile resolution needs a registry).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deny: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub by_provider: BTreeMap<String, Box<ToolPolicy>>,
}

impl ToolPolicy {
    pub fn allow_only(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            allow: Some(names.into_iter().map(Into::into).collect()),
            deny: None,
            profile: None,
            by_provider: BTreeMap::new(),
        }
    }

    pub fn deny_only(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            allow: None,
            deny: Some(names.into_iter().map(Into::into).collect()),
            profile: None,
            by_provider: BTreeMap::new(),
        }
    }

    /// Keeps `name` iff `(allow unset ∨ name ∈ allow) ∧ (deny unset ∨ name ∉ deny)`
    /// — the per-layer predicate §4.3 and §8 both specify.
    pub fn permits(&self, name: &str) -> bool {
        let allow_ok = match &self.allow {
            Some(set) => set.contains(name),
            None => true,
        };
        let deny_ok = match &self.deny {
            Some(set) => !set.contains(name),
            None => true,
        };
        allow_ok && deny_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_and_deny_intersect() {
        let policy = ToolPolicy {
            allow: Some(BTreeSet::from(["read".to_string(), "write".to_string()])),
            deny: Some(BTreeSet::from(["write".to_string()])),
            profile: None,
            by_provider: BTreeMap::new(),
        };
        assert!(policy.permits("read"));
        assert!(!policy.permits("write"));
        assert!(!policy.permits("exec"));
    }

    #[test]
    fn unset_layer_permits_everything() {
        let policy = ToolPolicy::default();
        assert!(policy.permits("anything"));
    }
}

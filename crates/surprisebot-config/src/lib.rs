pub mod resolved;
pub mod store;

pub use resolved::*;
pub use store::{deep_merge, ConfigStore};

/// Resolves the store's effective layered value into a typed
/// [`ResolvedConfig`]. Fields missing from every layer fall back to their
/// `#[serde(default)]`, so an empty config file still resolves to sane
/// built-in behavior (heartbeat enabled at its default cadence, no budget
/// caps, no tool restrictions).
pub async fn resolve(store: &ConfigStore) -> anyhow::Result<ResolvedConfig> {
    let value = store.effective_value().await;
    let resolved: ResolvedConfig = serde_json::from_value(value)?;
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn resolve_applies_defaults_for_empty_config() {
        let store = ConfigStore::in_memory(json!({}));
        let resolved = resolve(&store).await.unwrap();
        assert!(resolved.heartbeat.enabled);
        assert_eq!(resolved.heartbeat.every, "15m");
        assert_eq!(resolved.budgets.global.window_hours, 24);
    }

    #[tokio::test]
    async fn resolve_picks_up_tool_policy_layers() {
        let store = ConfigStore::in_memory(json!({
            "tools": {
                "global": {"allow": ["read", "write", "exec"]},
                "by_agent": {"restricted": {"allow": ["read"], "deny": ["exec", "write"]}}
            }
        }));
        let resolved = resolve(&store).await.unwrap();
        assert!(resolved.tools.global.permits("read"));
        let restricted = &resolved.tools.by_agent["restricted"];
        assert!(restricted.permits("read"));
        assert!(!restricted.permits("exec"));
    }
}

//! Layered JSON config store, modeled on the teacher's
//! `tandem_core::config::ConfigStore`: defaults, per-agent overrides,
//! per-provider overrides, and sandbox/subagent profiles are deep-merged
//! `serde_json::Value` layers rather than separately-typed structs, which
//! keeps the on-disk config format flexible while [`crate::resolved`]
//! gives callers a fully-typed view once merging is done.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::fs;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default)]
struct Layers {
    defaults: Value,
    agent: Value,
    provider: Value,
    sandbox: Value,
    env: Value,
    runtime: Value,
}

/// Ordered the way §4.3 orders tool-policy layers: later layers override
/// earlier ones on conflicting scalar keys, and merge recursively on
/// objects. The config resolver applies this same ordering to every
/// config-shaped value (tool policy, budget caps, model allow-lists) —
/// §4.3's per-layer `filter` semantics live one level up, in
/// `surprisebot-policy`, which folds the *resolved* policy layers
/// (global/provider/agent/provider-agent/sandbox/subagent) rather than
/// config-file layers.
#[derive(Clone)]
pub struct ConfigStore {
    project_path: PathBuf,
    layers: Arc<RwLock<Layers>>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl ConfigStore {
    /// Loads the project config file (missing file = empty defaults) and
    /// seeds the `env` layer from `SURPRISEBOT_*` environment variables
    /// (§6).
    pub async fn load(project_path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let project_path = project_path.into();
        let defaults = read_json_file(&project_path).await.unwrap_or_else(|_| empty_object());
        let store = Self {
            project_path,
            layers: Arc::new(RwLock::new(Layers {
                defaults,
                agent: empty_object(),
                provider: empty_object(),
                sandbox: empty_object(),
                env: env_layer(),
                runtime: empty_object(),
            })),
        };
        Ok(store)
    }

    pub fn in_memory(defaults: Value) -> Self {
        Self {
            project_path: PathBuf::new(),
            layers: Arc::new(RwLock::new(Layers {
                defaults,
                agent: empty_object(),
                provider: empty_object(),
                sandbox: empty_object(),
                env: env_layer(),
                runtime: empty_object(),
            })),
        }
    }

    pub async fn patch_agent(&self, patch: Value) {
        let mut layers = self.layers.write().await;
        deep_merge(&mut layers.agent, &patch);
    }

    pub async fn patch_provider(&self, patch: Value) {
        let mut layers = self.layers.write().await;
        deep_merge(&mut layers.provider, &patch);
    }

    pub async fn patch_sandbox(&self, patch: Value) {
        let mut layers = self.layers.write().await;
        deep_merge(&mut layers.sandbox, &patch);
    }

    pub async fn patch_runtime(&self, patch: Value) {
        let mut layers = self.layers.write().await;
        deep_merge(&mut layers.runtime, &patch);
    }

    /// Merge order: defaults → provider → agent → sandbox → env →
    /// runtime. Runtime (hot-patched at call time, e.g. a `/model`
    /// command) always wins; env always beats file-sourced layers.
    pub async fn effective_value(&self) -> Value {
        let layers = self.layers.read().await.clone();
        let mut merged = empty_object();
        deep_merge(&mut merged, &layers.defaults);
        deep_merge(&mut merged, &layers.provider);
        deep_merge(&mut merged, &layers.agent);
        deep_merge(&mut merged, &layers.sandbox);
        deep_merge(&mut merged, &layers.env);
        deep_merge(&mut merged, &layers.runtime);
        merged
    }

    pub async fn save(&self) -> anyhow::Result<()> {
        if self.project_path.as_os_str().is_empty() {
            return Ok(());
        }
        let snapshot = self.layers.read().await.defaults.clone();
        write_json_file(&self.project_path, &snapshot).await
    }
}

async fn read_json_file(path: &Path) -> anyhow::Result<Value> {
    let raw = fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&raw)?)
}

async fn write_json_file(path: &Path, value: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let raw = serde_json::to_string_pretty(value)?;
    fs::write(path, raw).await?;
    Ok(())
}

fn env_layer() -> Value {
    let mut obj = Map::new();
    if let Ok(state_dir) = std::env::var("SURPRISEBOT_STATE_DIR") {
        obj.insert("state_dir".to_string(), Value::String(state_dir));
    }
    if let Ok(flag) = std::env::var("SURPRISEBOT_ALLOW_UNSAFE_WORKSPACE") {
        obj.insert(
            "allow_unsafe_workspace".to_string(),
            Value::Bool(flag == "1" || flag.eq_ignore_ascii_case("true")),
        );
    }
    if let Ok(roots) = std::env::var("SURPRISEBOT_SKILLS_ROOTS") {
        let list: Vec<Value> = roots
            .split(':')
            .filter(|s| !s.is_empty())
            .map(|s| Value::String(s.to_string()))
            .collect();
        obj.insert("skills_roots".to_string(), Value::Array(list));
    }
    Value::Object(obj)
}

pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value.clone();
        }
    }
}

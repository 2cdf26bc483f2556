//! Layered tool policy composition (§4.3). Each layer is applied as a set
//! intersection, so the order the layers are folded in doesn't matter —
//! only which layers are present. The runner is responsible for
//! collecting the right layers for a given run (profile, provider
//! profile, global, global-provider, agent, agent-provider, sandbox,
//! subagent) and handing them to [`resolve_tool_set`].

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use surprisebot_config::ToolsConfig;
use surprisebot_tools::ToolRegistry;
use surprisebot_types::{PolicyError, ToolPolicy};

/// Folds every present layer over the registry's full tool-name universe.
/// A tool survives iff every layer's `permits` predicate keeps it — the
/// "most restrictive wins" composition rule.
pub fn resolve_tool_set(registry: &ToolRegistry, layers: &[Option<&ToolPolicy>]) -> BTreeSet<String> {
    let mut set = registry.all_names();
    for layer in layers.iter().flatten() {
        set.retain(|name| layer.permits(name));
    }
    set
}

/// Resolves a profile name (e.g. `"minimal"`, `"coding"`, or a subagent
/// profile configured under `tools.subagent_profiles`) into an allow-only
/// [`ToolPolicy`]. Checks the registry's built-in named profiles first,
/// then the config's `subagent_profiles` map.
pub fn resolve_profile_policy(registry: &ToolRegistry, tools_config: &ToolsConfig, profile: &str) -> Option<ToolPolicy> {
    if let Some(allow) = registry.profile_tools(profile) {
        return Some(ToolPolicy::allow_only(allow));
    }
    tools_config.subagent_profiles.get(profile).cloned()
}

/// Gathers the ordered layer list for one run: profile, provider-profile
/// (profile scoped `by_provider`), global, global-provider, agent,
/// agent-provider, sandbox, subagent. Layers that don't apply (no
/// provider-specific entry, no sandbox active) are simply absent from the
/// returned vector; [`resolve_tool_set`] treats absence as "no
/// restriction from this layer".
#[allow(clippy::too_many_arguments)]
pub fn build_layer_list<'a>(
    tools_config: &'a ToolsConfig,
    profile_policy: Option<&'a ToolPolicy>,
    provider: &str,
    agent_id: &str,
    sandbox_active: bool,
    subagent_profile: Option<&'a ToolPolicy>,
) -> Vec<Option<&'a ToolPolicy>> {
    let provider_profile = profile_policy.and_then(|p| p.by_provider.get(provider).map(|b| b.as_ref()));
    let global_provider = tools_config.global.by_provider.get(provider);
    let agent_policy = tools_config.by_agent.get(agent_id);
    let agent_provider_key = format!("{agent_id}/{provider}");
    let agent_provider_policy = tools_config.by_agent_provider.get(&agent_provider_key);
    let sandbox = if sandbox_active { tools_config.sandbox.as_ref() } else { None };

    vec![
        profile_policy,
        provider_profile,
        Some(&tools_config.global),
        global_provider,
        agent_policy,
        agent_provider_policy,
        sandbox,
        subagent_profile,
    ]
}

/// The shared-memory write guard (§4.3): any write/edit/apply-patch tool
/// invocation whose resolved path equals the configured shared-memory
/// file — or that file's symlink target — is rejected unless the calling
/// agent is in the configured allow-write list.
pub fn check_shared_memory_write(
    tools_config: &ToolsConfig,
    registry: &ToolRegistry,
    agent_id: &str,
    tool_name: &str,
    resolved_path: &Path,
) -> Result<(), PolicyError> {
    if !registry.is_write_like(tool_name) {
        return Ok(());
    }
    let Some(shared_path) = tools_config.shared_memory_path.as_ref() else {
        return Ok(());
    };
    if tools_config.shared_memory_allow_write.iter().any(|a| a == agent_id) {
        return Ok(());
    }

    let shared_path = PathBuf::from(shared_path);
    let targets_shared_file = paths_equal(resolved_path, &shared_path)
        || std::fs::read_link(resolved_path)
            .map(|target| paths_equal(&target, &shared_path))
            .unwrap_or(false);

    if targets_shared_file {
        return Err(PolicyError::SharedMemoryGuard(format!(
            "agent `{agent_id}` is not permitted to write the shared-memory file"
        )));
    }
    Ok(())
}

fn paths_equal(a: &Path, b: &Path) -> bool {
    let canon_a = std::fs::canonicalize(a).unwrap_or_else(|_| a.to_path_buf());
    let canon_b = std::fs::canonicalize(b).unwrap_or_else(|_| b.to_path_buf());
    canon_a == canon_b
}

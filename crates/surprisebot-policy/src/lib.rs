pub mod budget;
pub mod tool_policy_engine;

pub use budget::{evaluate_budget, resolve_budget_caps, BudgetEvaluation, EffectiveBudgetCaps, ScopeCheck};
pub use tool_policy_engine::{build_layer_list, check_shared_memory_write, resolve_profile_policy, resolve_tool_set};

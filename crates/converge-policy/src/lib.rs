pub mod evaluator;
pub mod types;

pub use evaluator::{
    calibrate_entropy_budgets, evaluate_policy, evaluate_risk_gate, rollout_bucket, PolicyInputs,
    RiskGateInputs, ROLLOUT_BUCKET_HEX_LEN,
};
pub use types::{
    default_policy_config, default_profiles, CoherenceInput, GateMode, GateResult, PolicyConfig,
    PolicyVerdict, Profile, Profiles, QueueConfig, RiskGateConfig, RiskGateResult, SecurityCounts,
};

use std::path::Path;

use anyhow::Result;
use converge_config::{load_over_defaults, resolve_search_path, POLICY_CONFIG_SEARCH};

/// Search order: explicit path → `.converge/policy.json` → `policy.json`
/// → `policy.default.json`; partial configs merge over the built-in
/// defaults.
pub fn load_policy_config(explicit: Option<&Path>) -> Result<PolicyConfig> {
    let path = resolve_search_path(explicit, &POLICY_CONFIG_SEARCH);
    let defaults = serde_json::to_value(default_policy_config())?;
    let loaded = load_over_defaults(path.as_deref(), defaults)?;
    Ok(serde_json::from_value(loaded.config_json)?)
}

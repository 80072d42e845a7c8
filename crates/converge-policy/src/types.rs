use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityLimits {
    pub max_critical: u32,
    pub max_high: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub entropy_budget: f64,
    pub containment_min: f64,
    pub checks: Vec<String>,
    pub security: SecurityLimits,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub profiles: Profiles,
    pub queue: QueueConfig,
    pub risk: RiskGateConfig,
    #[serde(default)]
    pub origin_overrides: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profiles {
    pub low: Profile,
    pub medium: Profile,
    pub high: Profile,
    pub critical: Profile,
}

impl Profiles {
    pub fn for_level(&self, level: converge_schemas::RiskLevel) -> &Profile {
        match level {
            converge_schemas::RiskLevel::Low => &self.low,
            converge_schemas::RiskLevel::Medium => &self.medium,
            converge_schemas::RiskLevel::High => &self.high,
            converge_schemas::RiskLevel::Critical => &self.critical,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub limit: u32,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskGateConfig {
    pub risk_score_threshold: f64,
    pub damage_score_threshold: f64,
    pub propagation_score_threshold: f64,
}

/// Built-in defaults merged with the config file; conservative by design —
/// a partial override can only tighten or loosen what it names, never what
/// it omits.
pub fn default_profiles() -> Profiles {
    Profiles {
        low: Profile {
            entropy_budget: 30.0,
            containment_min: 0.5,
            checks: vec!["lint".to_string()],
            security: SecurityLimits {
                max_critical: 0,
                max_high: 5,
            },
        },
        medium: Profile {
            entropy_budget: 20.0,
            containment_min: 0.6,
            checks: vec!["lint".to_string(), "unit_tests".to_string()],
            security: SecurityLimits {
                max_critical: 0,
                max_high: 3,
            },
        },
        high: Profile {
            entropy_budget: 12.0,
            containment_min: 0.75,
            checks: vec![
                "lint".to_string(),
                "unit_tests".to_string(),
                "integration_tests".to_string(),
            ],
            security: SecurityLimits {
                max_critical: 0,
                max_high: 1,
            },
        },
        critical: Profile {
            entropy_budget: 6.0,
            containment_min: 0.9,
            checks: vec![
                "lint".to_string(),
                "unit_tests".to_string(),
                "integration_tests".to_string(),
                "security_scan".to_string(),
            ],
            security: SecurityLimits {
                max_critical: 0,
                max_high: 0,
            },
        },
    }
}

pub fn default_policy_config() -> PolicyConfig {
    PolicyConfig {
        profiles: default_profiles(),
        queue: QueueConfig {
            limit: 20,
            max_retries: 3,
        },
        risk: RiskGateConfig {
            risk_score_threshold: 70.0,
            damage_score_threshold: 70.0,
            propagation_score_threshold: 70.0,
        },
        origin_overrides: serde_json::json!({}),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateMode {
    Shadow,
    Enforce,
}

#[derive(Debug, Clone, Serialize)]
pub struct GateResult {
    pub passed: bool,
    pub name: &'static str,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PolicyVerdict {
    pub allow: bool,
    pub gates: Vec<GateResult>,
    pub blocked_gates: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskGateResult {
    pub breaches: Vec<&'static str>,
    pub would_block: bool,
    pub rollout_bucket: f64,
    pub in_enforcement_group: bool,
    pub enforced: bool,
}

#[derive(Debug, Clone)]
pub struct SecurityCounts {
    pub critical: u32,
    pub high: u32,
}

#[derive(Debug, Clone)]
pub struct CoherenceInput {
    pub score: f64,
    pub is_critical_profile: bool,
}

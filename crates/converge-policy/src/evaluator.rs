//! Gate evaluation, rollout bucketing, and calibration — generalizing the
//! threshold-gate-with-reasons shape used elsewhere in this codebase for
//! promotion decisions, applied here to merge-admission gates.

use sha2::{Digest, Sha256};

use crate::types::{
    CoherenceInput, GateResult, Profile, PolicyVerdict, RiskGateConfig, RiskGateResult,
    SecurityCounts,
};

/// Public contract (spec §9): the rollout bucket is the first 8 hex
/// characters of `SHA-256(intent_id)`, divided by `16^8`. Both the policy
/// risk gate and the intake throttle MUST use this exact function so an
/// intent in one rollout slice is in the same slice everywhere.
pub const ROLLOUT_BUCKET_HEX_LEN: usize = 8;

pub fn rollout_bucket(intent_id: &str) -> f64 {
    let mut hasher = Sha256::new();
    hasher.update(intent_id.as_bytes());
    let digest = hasher.finalize();
    let hex_str = hex::encode(digest);
    let slice = &hex_str[..ROLLOUT_BUCKET_HEX_LEN];
    let value = u64::from_str_radix(slice, 16).expect("hex slice is always valid");
    let max = 16u64.pow(ROLLOUT_BUCKET_HEX_LEN as u32);
    value as f64 / max as f64
}

pub struct PolicyInputs<'a> {
    pub checks_passed: &'a [String],
    pub containment_score: f64,
    pub entropy_delta: f64,
    pub security: Option<SecurityCounts>,
    pub coherence: Option<CoherenceInput>,
}

/// All five gates; a gate is skipped (not included, not failing) when its
/// optional input isn't supplied.
pub fn evaluate_policy(profile: &Profile, inputs: &PolicyInputs) -> PolicyVerdict {
    let mut gates = Vec::new();

    let required_satisfied = profile
        .checks
        .iter()
        .all(|c| inputs.checks_passed.iter().any(|p| p == c));
    gates.push(GateResult {
        name: "verification",
        passed: required_satisfied,
        detail: format!(
            "required={:?} passed={:?}",
            profile.checks, inputs.checks_passed
        ),
    });

    let containment_ok = inputs.containment_score >= profile.containment_min;
    gates.push(GateResult {
        name: "containment",
        passed: containment_ok,
        detail: format!(
            "containment_score={:.3} min={:.3}",
            inputs.containment_score, profile.containment_min
        ),
    });

    let entropy_ok = inputs.entropy_delta <= profile.entropy_budget;
    gates.push(GateResult {
        name: "entropy",
        passed: entropy_ok,
        detail: format!(
            "entropy_delta={:.3} budget={:.3}",
            inputs.entropy_delta, profile.entropy_budget
        ),
    });

    if let Some(sec) = &inputs.security {
        let ok = sec.critical <= profile.security.max_critical && sec.high <= profile.security.max_high;
        gates.push(GateResult {
            name: "security",
            passed: ok,
            detail: format!(
                "critical={} (max {}) high={} (max {})",
                sec.critical, profile.security.max_critical, sec.high, profile.security.max_high
            ),
        });
    }

    if let Some(coh) = &inputs.coherence {
        let pass_threshold = if coh.is_critical_profile { 80.0 } else { 75.0 };
        let ok = coh.score >= pass_threshold;
        gates.push(GateResult {
            name: "coherence",
            passed: ok,
            detail: format!("score={:.1} pass_threshold={pass_threshold:.1}", coh.score),
        });
    }

    let blocked_gates: Vec<String> = gates
        .iter()
        .filter(|g| !g.passed)
        .map(|g| g.name.to_string())
        .collect();
    let allow = blocked_gates.is_empty();

    PolicyVerdict {
        allow,
        gates,
        blocked_gates,
    }
}

pub struct RiskGateInputs {
    pub risk_score: f64,
    pub damage_score: f64,
    pub propagation_score: f64,
    pub mode: crate::types::GateMode,
    pub enforce_ratio: f64,
    pub intent_id: String,
}

pub fn evaluate_risk_gate(thresholds: &RiskGateConfig, inputs: &RiskGateInputs) -> RiskGateResult {
    let mut breaches = Vec::new();
    if inputs.risk_score > thresholds.risk_score_threshold {
        breaches.push("risk_score");
    }
    if inputs.damage_score > thresholds.damage_score_threshold {
        breaches.push("damage_score");
    }
    if inputs.propagation_score > thresholds.propagation_score_threshold {
        breaches.push("propagation_score");
    }

    let would_block = !breaches.is_empty();
    let bucket = rollout_bucket(&inputs.intent_id);
    let in_enforcement_group = bucket < inputs.enforce_ratio;
    let enforced =
        matches!(inputs.mode, crate::types::GateMode::Enforce) && would_block && in_enforcement_group;

    RiskGateResult {
        breaches,
        would_block,
        rollout_bucket: bucket,
        in_enforcement_group,
        enforced,
    }
}

/// p-th percentile via linear interpolation over sorted samples.
fn quantile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f64;
        sorted[lo] + (sorted[hi] - sorted[lo]) * frac
    }
}

/// Recomputed entropy budgets per profile from quantiles of historical
/// `entropy_score` samples: low=p75, medium=p75, high=p90, critical=p95,
/// never relaxed below the built-in conservative floor.
pub fn calibrate_entropy_budgets(samples: &[f64]) -> crate::types::Profiles {
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let floors = crate::types::default_profiles();
    let mut profiles = floors.clone();

    profiles.low.entropy_budget = quantile(&sorted, 0.75).min(floors.low.entropy_budget).max(floors.low.entropy_budget * 0.25);
    profiles.medium.entropy_budget = quantile(&sorted, 0.75).min(floors.medium.entropy_budget).max(floors.medium.entropy_budget * 0.25);
    profiles.high.entropy_budget = quantile(&sorted, 0.90).min(floors.high.entropy_budget).max(floors.high.entropy_budget * 0.25);
    profiles.critical.entropy_budget = quantile(&sorted, 0.95).min(floors.critical.entropy_budget).max(floors.critical.entropy_budget * 0.25);

    profiles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{default_policy_config, GateMode};

    #[test]
    fn rollout_bucket_is_deterministic() {
        let a = rollout_bucket("intent-abc");
        let b = rollout_bucket("intent-abc");
        assert_eq!(a, b);
        assert!((0.0..1.0).contains(&a));
    }

    #[test]
    fn shadow_mode_never_enforces() {
        let cfg = default_policy_config();
        let result = evaluate_risk_gate(
            &cfg.risk,
            &RiskGateInputs {
                risk_score: 99.0,
                damage_score: 99.0,
                propagation_score: 99.0,
                mode: GateMode::Shadow,
                enforce_ratio: 1.0,
                intent_id: "intent-x".to_string(),
            },
        );
        assert!(!result.enforced);
    }

    #[test]
    fn zero_enforce_ratio_never_enforces() {
        let cfg = default_policy_config();
        let result = evaluate_risk_gate(
            &cfg.risk,
            &RiskGateInputs {
                risk_score: 99.0,
                damage_score: 99.0,
                propagation_score: 99.0,
                mode: GateMode::Enforce,
                enforce_ratio: 0.0,
                intent_id: "intent-x".to_string(),
            },
        );
        assert!(!result.enforced);
    }

    #[test]
    fn calibration_never_drops_below_floor_fraction() {
        let low_samples = vec![0.0; 50];
        let profiles = calibrate_entropy_budgets(&low_samples);
        let floor = default_policy_config().profiles;
        assert!(profiles.critical.entropy_budget >= floor.critical.entropy_budget * 0.25);
    }

    #[test]
    fn verification_gate_requires_all_checks() {
        let profile = default_policy_config().profiles.medium;
        let inputs = PolicyInputs {
            checks_passed: &["lint".to_string()],
            containment_score: 1.0,
            entropy_delta: 0.0,
            security: None,
            coherence: None,
        };
        let verdict = evaluate_policy(&profile, &inputs);
        assert!(!verdict.allow);
        assert!(verdict.blocked_gates.contains(&"verification".to_string()));
    }
}

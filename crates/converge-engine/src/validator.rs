//! The validation pipeline: a fixed sequence of steps that either reaches
//! VALIDATED or short-circuits on the first BLOCK. Every event emitted
//! during one run shares a trace id so the run can be reconstructed from
//! the log alone.

use anyhow::{Context, Result};
use chrono::Utc;
use converge_eventlog::new_trace_id;
use converge_policy::{evaluate_policy, evaluate_risk_gate, GateMode, PolicyConfig, PolicyInputs, RiskGateInputs};
use converge_risk::{evaluate_risk, CoChange};
use converge_schemas::{EventFilter, Intent, NewEvent, SecuritySeverity};
use converge_scm::{ScmPort, Simulation};
use converge_store::Store;

use crate::checks::CheckRunner;
use crate::lifecycle;

/// Knobs that come from the caller (queue processor, webhook intake, a
/// manual re-run) rather than the pipeline itself.
pub struct ValidationConfig<'a> {
    pub policy: &'a PolicyConfig,
    pub gate_mode: GateMode,
    pub enforce_ratio: f64,
    pub skip_checks: bool,
    pub use_last_simulation: bool,
    pub harness: Option<&'a converge_coherence::HarnessConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Validated { trace_id: String },
    Blocked { trace_id: String, reason: String },
}

/// Runs the pipeline against `intent`. On success, mutates `intent.status`
/// to VALIDATED; on BLOCK, leaves `intent.status` untouched — retry
/// bookkeeping is the caller's job, since it differs between first
/// validation and queue revalidation.
#[allow(clippy::too_many_arguments)]
pub async fn validate_intent<S, Scm, C>(
    store: &S,
    scm: &Scm,
    checks: &C,
    runner: &dyn converge_coherence::CommandRunner,
    coupling: &[CoChange],
    intent: &mut Intent,
    simulation_override: Option<Simulation>,
    config: &ValidationConfig<'_>,
) -> Result<ValidationOutcome>
where
    S: Store,
    Scm: ScmPort + ?Sized,
    C: CheckRunner + ?Sized,
{
    let trace_id = new_trace_id();

    macro_rules! emit {
        ($event_type:expr, $payload:expr) => {
            emit!($event_type, $payload, serde_json::json!({}))
        };
        ($event_type:expr, $payload:expr, $evidence:expr) => {{
            let mut payload = $payload;
            if let serde_json::Value::Object(ref mut map) = payload {
                map.insert("trace_id".to_string(), serde_json::Value::String(trace_id.clone()));
            }
            store
                .append(NewEvent {
                    id: None,
                    trace_id: Some(trace_id.clone()),
                    event_type: $event_type.to_string(),
                    intent_id: Some(intent.id.clone()),
                    agent_id: None,
                    tenant_id: intent.tenant_id.clone(),
                    payload,
                    evidence: $evidence,
                })
                .await
                .context(concat!("failed to append ", $event_type))?
        }};
    }

    macro_rules! block {
        ($reason:expr) => {{
            let reason: String = $reason;
            emit!(
                "intent.blocked",
                serde_json::json!({ "reason": reason, "trace_id": trace_id })
            );
            return Ok(ValidationOutcome::Blocked { trace_id, reason });
        }};
    }

    // Step 1: resolve a simulation.
    let simulation = resolve_simulation(
        store,
        scm,
        intent,
        simulation_override,
        config.use_last_simulation,
    )
    .await?;
    emit!(
        "simulation.completed",
        serde_json::to_value(&simulation).context("serialize simulation")?
    );
    if !simulation.mergeable {
        block!(format!(
            "merge conflicts on: {}",
            simulation.conflicts.join(", ")
        ));
    }

    // Step 2: required checks.
    let profile = config.policy.profiles.for_level(intent.risk_level);
    let checks_passed: Vec<String> = if config.skip_checks {
        profile.checks.clone()
    } else {
        let mut passed = Vec::new();
        for name in &profile.checks {
            let outcome = checks
                .run_check(name)
                .with_context(|| format!("check '{name}' failed to run"))?;
            emit!(
                "check.completed",
                serde_json::json!({
                    "check": name,
                    "passed": outcome.passed,
                    "details": outcome.details,
                    "duration_ms": outcome.duration.as_millis() as u64,
                })
            );
            if !outcome.passed {
                block!(format!("required check '{name}' failed"));
            }
            passed.push(name.clone());
        }
        passed
    };

    // Step 3: risk evaluation. Never blocks.
    let risk = evaluate_risk(intent, &simulation, coupling);
    let risk_evidence = serde_json::json!({
        "risk_score": risk.risk_score,
        "damage_score": risk.damage_score,
        "signals": risk.signals,
        "bomb_types": risk.bombs.iter().map(|b| b.kind).collect::<Vec<_>>(),
        "trace_id": trace_id,
    });
    emit!(
        "risk.evaluated",
        serde_json::to_value(&risk).context("serialize risk eval")?,
        risk_evidence
    );

    // Step 4: policy gates.
    let findings = store
        .list_findings_for_intent(&intent.id)
        .await
        .context("list security findings")?;
    let security = converge_policy::SecurityCounts {
        critical: findings
            .iter()
            .filter(|f| f.severity == SecuritySeverity::Critical)
            .count() as u32,
        high: findings
            .iter()
            .filter(|f| f.severity == SecuritySeverity::High)
            .count() as u32,
    };
    let policy_inputs = PolicyInputs {
        checks_passed: &checks_passed,
        containment_score: risk.containment_score,
        entropy_delta: risk.entropy_score,
        security: Some(security),
        coherence: None,
    };
    let verdict = evaluate_policy(profile, &policy_inputs);
    emit!(
        "policy.evaluated",
        serde_json::to_value(&verdict).context("serialize policy verdict")?
    );
    if !verdict.allow {
        block!(format!("policy gates failed: {}", verdict.blocked_gates.join(", ")));
    }

    // Step 5: risk gate (shadow or enforce, with rollout).
    let gate_inputs = RiskGateInputs {
        risk_score: risk.risk_score,
        damage_score: risk.damage_score,
        propagation_score: risk.propagation_score,
        mode: config.gate_mode,
        enforce_ratio: config.enforce_ratio,
        intent_id: intent.id.clone(),
    };
    let gate_result = evaluate_risk_gate(&config.policy.risk, &gate_inputs);
    emit!(
        "risk_gate.evaluated",
        serde_json::to_value(&gate_result).context("serialize risk gate result")?
    );
    if gate_result.enforced {
        block!(format!("risk gate enforced: {:?}", gate_result.breaches));
    }

    // Step 6: coherence harness, when configured.
    if let Some(harness_config) = config.harness {
        let report = converge_coherence::evaluate_coherence(
            harness_config,
            runner,
            &std::collections::HashMap::new(),
        );
        emit!(
            "coherence.evaluated",
            serde_json::to_value(&report).context("serialize coherence report")?
        );
        match report.verdict {
            converge_coherence::Verdict::Fail => {
                block!(format!("coherence check failed: score={:.1}", report.score));
            }
            converge_coherence::Verdict::Warn => {
                let task = converge_review::create_review_task(
                    format!("review-{}", uuid::Uuid::new_v4()),
                    intent.id.clone(),
                    intent.risk_level,
                    converge_schemas::ReviewTrigger::Coherence,
                    intent.priority,
                );
                store
                    .upsert_review_task(&task)
                    .await
                    .context("create coherence review task")?;
            }
            converge_coherence::Verdict::Pass => {}
        }
    }

    // Step 7: finalize.
    lifecycle::transition_to_validated(intent)
        .context("intent was not in READY state entering validation")?;
    intent.updated_at = Utc::now();
    emit!(
        "intent.validated",
        serde_json::json!({ "trace_id": trace_id })
    );

    Ok(ValidationOutcome::Validated { trace_id })
}

async fn resolve_simulation<S, Scm>(
    store: &S,
    scm: &Scm,
    intent: &Intent,
    simulation_override: Option<Simulation>,
    use_last_simulation: bool,
) -> Result<Simulation>
where
    S: Store,
    Scm: ScmPort + ?Sized,
{
    if let Some(sim) = simulation_override {
        return Ok(sim);
    }

    if use_last_simulation {
        let events = store
            .query(&EventFilter {
                event_type: Some("simulation.completed".to_string()),
                intent_id: Some(intent.id.clone()),
                ..Default::default()
            })
            .await
            .context("query last simulation")?;
        if let Some(last) = events.last() {
            let sim: Simulation =
                serde_json::from_value(last.payload.clone()).context("decode stored simulation")?;
            return Ok(sim);
        }
    }

    scm.simulate_merge(&intent.source, &intent.target)
        .context("simulate merge")
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_coherence::CommandRunner;
    use converge_policy::default_policy_config;
    use converge_scm::InMemoryScm;
    use converge_testkit::{InMemoryStore, IntentBuilder};
    use std::time::Duration;

    struct NoopRunner;
    impl CommandRunner for NoopRunner {
        fn run(&self, _command: &str, _timeout: Duration) -> Result<String> {
            Ok(String::new())
        }
    }

    fn shadow_config(policy: &PolicyConfig) -> ValidationConfig<'_> {
        ValidationConfig {
            policy,
            gate_mode: GateMode::Shadow,
            enforce_ratio: 1.0,
            skip_checks: true,
            use_last_simulation: false,
            harness: None,
        }
    }

    #[tokio::test]
    async fn clean_merge_reaches_validated() {
        let store = InMemoryStore::new();
        let scm = InMemoryScm::new();
        scm.set_branch_files("feature/x", &["src/a.rs"]);
        let checks = crate::checks::FixedCheckRunner::new();
        let policy = default_policy_config();
        let config = shadow_config(&policy);

        let mut intent = IntentBuilder::new("org/repo:pr-1").build();
        let outcome = validate_intent(&store, &scm, &checks, &NoopRunner, &[], &mut intent, None, &config)
            .await
            .unwrap();

        assert!(matches!(outcome, ValidationOutcome::Validated { .. }));
        assert_eq!(intent.status, converge_schemas::IntentStatus::Validated);
    }

    #[tokio::test]
    async fn conflicting_merge_blocks_without_mutating_status() {
        let store = InMemoryStore::new();
        let scm = InMemoryScm::new();
        scm.set_branch_files("feature/x", &["src/shared.rs"]);
        scm.set_branch_files("main", &["src/shared.rs"]);
        let checks = crate::checks::FixedCheckRunner::new();
        let policy = default_policy_config();
        let config = shadow_config(&policy);

        let mut intent = IntentBuilder::new("org/repo:pr-2").build();
        let outcome = validate_intent(&store, &scm, &checks, &NoopRunner, &[], &mut intent, None, &config)
            .await
            .unwrap();

        assert!(matches!(outcome, ValidationOutcome::Blocked { .. }));
        assert_eq!(intent.status, converge_schemas::IntentStatus::Ready);
    }

    #[tokio::test]
    async fn failing_check_blocks_before_risk_evaluation() {
        let store = InMemoryStore::new();
        let scm = InMemoryScm::new();
        scm.set_branch_files("feature/x", &["src/a.rs"]);
        let checks = crate::checks::FixedCheckRunner::new().with("lint", false);
        let policy = default_policy_config();
        let mut config = shadow_config(&policy);
        config.skip_checks = false;

        let mut intent = IntentBuilder::new("org/repo:pr-3").build();
        let outcome = validate_intent(&store, &scm, &checks, &NoopRunner, &[], &mut intent, None, &config)
            .await
            .unwrap();

        match outcome {
            ValidationOutcome::Blocked { reason, .. } => assert!(reason.contains("lint")),
            other => panic!("expected block, got {other:?}"),
        }
    }
}

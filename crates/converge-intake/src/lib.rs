//! Adaptive intake: decides whether an intent enters the system at all,
//! using the same deterministic rollout bucket the policy risk gate uses
//! so an intent's canary slice is consistent across both decisions.

use anyhow::{Context, Result};
use converge_eventlog::new_trace_id;
use converge_policy::rollout_bucket;
use converge_schemas::{NewEvent, RiskLevel};
use converge_store::Store;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IntakeMode {
    Open,
    Throttle,
    Pause,
}

#[derive(Debug, Clone, Copy)]
pub struct IntakeThresholds {
    pub pause_below: f64,
    pub throttle_below: f64,
    pub throttle_ratio: f64,
}

impl Default for IntakeThresholds {
    fn default() -> Self {
        IntakeThresholds {
            pause_below: 30.0,
            throttle_below: 60.0,
            throttle_ratio: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntakeDecision {
    Accepted,
    Throttled,
    Rejected,
}

impl IntakeDecision {
    fn event_type(self) -> &'static str {
        match self {
            IntakeDecision::Accepted => "intake.accepted",
            IntakeDecision::Throttled => "intake.throttled",
            IntakeDecision::Rejected => "intake.rejected",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IntakeOutcome {
    pub decision: IntakeDecision,
    pub mode: IntakeMode,
    pub health_score: f64,
    pub debt_score: f64,
    pub effective_score: f64,
}

/// A tenant manual override always wins over computed health signals.
pub fn resolve_mode(
    manual_override: Option<IntakeMode>,
    health_score: f64,
    debt_score: f64,
    thresholds: IntakeThresholds,
) -> (IntakeMode, f64) {
    if let Some(mode) = manual_override {
        return (mode, health_score.min(100.0 - debt_score));
    }

    let effective_score = health_score.min(100.0 - debt_score);
    let mode = if effective_score < thresholds.pause_below {
        IntakeMode::Pause
    } else if effective_score < thresholds.throttle_below {
        IntakeMode::Throttle
    } else {
        IntakeMode::Open
    };
    (mode, effective_score)
}

/// `Decide(intent)` from spec §4.6. Always appends exactly one of
/// `intake.accepted|throttled|rejected`, plus `intake.mode_changed` when
/// a manual override forced the mode rather than the computed health
/// signals.
pub async fn decide<S: Store>(
    store: &S,
    intent_id: &str,
    risk_level: RiskLevel,
    manual_override: Option<IntakeMode>,
    health_score: f64,
    debt_score: f64,
    thresholds: IntakeThresholds,
) -> Result<IntakeOutcome> {
    let (mode, effective_score) = resolve_mode(manual_override, health_score, debt_score, thresholds);

    let decision = match mode {
        IntakeMode::Open => IntakeDecision::Accepted,
        IntakeMode::Pause => {
            if risk_level == RiskLevel::Critical {
                IntakeDecision::Accepted
            } else {
                IntakeDecision::Rejected
            }
        }
        IntakeMode::Throttle => {
            // Same 8-hex-char SHA-256 bucket the policy risk gate uses.
            if rollout_bucket(intent_id) < thresholds.throttle_ratio {
                IntakeDecision::Accepted
            } else {
                IntakeDecision::Throttled
            }
        }
    };

    let outcome = IntakeOutcome {
        decision,
        mode,
        health_score,
        debt_score,
        effective_score,
    };
    let payload = serde_json::to_value(&outcome).context("serialize intake outcome")?;

    if manual_override.is_some() {
        emit(store, intent_id, "intake.mode_changed", payload.clone()).await?;
    }
    emit(store, intent_id, decision.event_type(), payload).await?;

    Ok(outcome)
}

async fn emit<S: Store>(store: &S, intent_id: &str, event_type: &str, payload: serde_json::Value) -> Result<()> {
    store
        .append(NewEvent {
            id: None,
            trace_id: Some(new_trace_id()),
            event_type: event_type.to_string(),
            intent_id: Some(intent_id.to_string()),
            agent_id: None,
            tenant_id: None,
            payload,
            evidence: serde_json::json!({}),
        })
        .await
        .with_context(|| format!("failed to append {event_type}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_store::EventStore;
    use converge_testkit::InMemoryStore;

    #[tokio::test]
    async fn open_mode_accepts_everything() {
        let store = InMemoryStore::new();
        let outcome = decide(&store, "intent-1", RiskLevel::Low, None, 90.0, 0.0, IntakeThresholds::default())
            .await
            .unwrap();
        assert_eq!(outcome.mode, IntakeMode::Open);
        assert_eq!(outcome.decision, IntakeDecision::Accepted);

        let events = store.query(&Default::default()).await.unwrap();
        assert!(events.iter().any(|e| e.event_type == "intake.accepted"));
    }

    #[tokio::test]
    async fn pause_mode_only_accepts_critical() {
        let store = InMemoryStore::new();
        let low = decide(&store, "intent-1", RiskLevel::Low, None, 10.0, 0.0, IntakeThresholds::default())
            .await
            .unwrap();
        assert_eq!(low.decision, IntakeDecision::Rejected);

        let critical = decide(
            &store,
            "intent-2",
            RiskLevel::Critical,
            None,
            10.0,
            0.0,
            IntakeThresholds::default(),
        )
        .await
        .unwrap();
        assert_eq!(critical.decision, IntakeDecision::Accepted);

        let events = store.query(&Default::default()).await.unwrap();
        assert!(events.iter().any(|e| e.event_type == "intake.rejected"));
        assert!(events.iter().any(|e| e.event_type == "intake.accepted"));
    }

    #[tokio::test]
    async fn manual_override_emits_mode_changed() {
        let store = InMemoryStore::new();
        let outcome = decide(
            &store,
            "intent-1",
            RiskLevel::Low,
            Some(IntakeMode::Pause),
            100.0,
            0.0,
            IntakeThresholds::default(),
        )
        .await
        .unwrap();
        assert_eq!(outcome.mode, IntakeMode::Pause);

        let events = store.query(&Default::default()).await.unwrap();
        assert!(events.iter().any(|e| e.event_type == "intake.mode_changed"));
    }

    #[tokio::test]
    async fn throttle_bucket_matches_policy_rollout_bucket() {
        let store = InMemoryStore::new();
        let bucket = converge_policy::rollout_bucket("intent-x");
        let mode_throttle = IntakeThresholds {
            pause_below: 0.0,
            throttle_below: 100.0,
            throttle_ratio: if bucket < 0.5 { 1.0 } else { 0.0 },
        };
        let outcome = decide(&store, "intent-x", RiskLevel::Low, None, 50.0, 0.0, mode_throttle)
            .await
            .unwrap();
        assert_eq!(outcome.mode, IntakeMode::Throttle);
        assert_eq!(outcome.decision, IntakeDecision::Accepted);
    }
}

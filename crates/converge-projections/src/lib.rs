//! Read-side projections: repo health, verification debt, trend
//! prediction, and compliance summaries. Each takes the inputs a caller
//! already queried from the store, computes a snapshot, and appends the
//! corresponding summary event — the one piece of write-side behavior
//! a projection has.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use converge_eventlog::new_trace_id;
use converge_schemas::NewEvent;
use converge_store::Store;
use serde::Serialize;

async fn emit_snapshot<S: Store>(
    store: &S,
    tenant_id: Option<&str>,
    event_type: &str,
    payload: serde_json::Value,
) -> Result<()> {
    store
        .append(NewEvent {
            id: None,
            trace_id: Some(new_trace_id()),
            event_type: event_type.to_string(),
            intent_id: None,
            agent_id: None,
            tenant_id: tenant_id.map(str::to_string),
            payload,
            evidence: serde_json::json!({}),
        })
        .await
        .with_context(|| format!("failed to append {event_type}"))?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Green,
    Yellow,
    Red,
}

pub fn status_for_score(score: f64) -> HealthStatus {
    if score >= 70.0 {
        HealthStatus::Green
    } else if score >= 40.0 {
        HealthStatus::Yellow
    } else {
        HealthStatus::Red
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub timestamp: DateTime<Utc>,
    pub score: f64,
    pub status: HealthStatus,
}

/// `score = 100 − 30·conflict_rate − 0.5·min(avg_entropy, 50) − 1.5·min(rejected_count, 20)`
fn compute_repo_health(conflict_rate: f64, avg_entropy: f64, rejected_count: u32) -> HealthSnapshot {
    let score = (100.0
        - 30.0 * conflict_rate
        - 0.5 * avg_entropy.min(50.0)
        - 1.5 * (rejected_count as f64).min(20.0))
    .clamp(0.0, 100.0);

    HealthSnapshot {
        timestamp: Utc::now(),
        score,
        status: status_for_score(score),
    }
}

/// Computes a repo health snapshot and emits `health.snapshot`. Also
/// emits `health.change_snapshot` when `previous_status` (the prior
/// snapshot's status, as tracked by the caller) differs from this one.
pub async fn repo_health<S: Store>(
    store: &S,
    tenant_id: Option<&str>,
    previous_status: Option<HealthStatus>,
    conflict_rate: f64,
    avg_entropy: f64,
    rejected_count: u32,
) -> Result<HealthSnapshot> {
    let snapshot = compute_repo_health(conflict_rate, avg_entropy, rejected_count);
    let payload = serde_json::to_value(&snapshot).context("serialize health snapshot")?;
    emit_snapshot(store, tenant_id, "health.snapshot", payload.clone()).await?;
    if previous_status.map_or(false, |prev| prev != snapshot.status) {
        emit_snapshot(store, tenant_id, "health.change_snapshot", payload).await?;
    }
    Ok(snapshot)
}

#[derive(Debug, Clone, Default)]
pub struct VerificationDebtInputs {
    pub staleness_hours: f64,
    pub staleness_cap_hours: f64,
    pub queue_depth: u32,
    pub queue_capacity: u32,
    pub review_backlog: u32,
    pub review_backlog_cap: u32,
    pub merge_conflict_rate: f64,
    pub semantic_conflict_rate: f64,
    pub retries_total: u32,
    pub retries_cap: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationDebt {
    pub debt_score: f64,
    pub debt_adjusted: f64,
}

/// Weighted pressure from staleness (25), queue depth vs. capacity (25),
/// review backlog (20), blended conflict rate (70% merge / 30% semantic,
/// weight 20), and retries (10). Weights sum to 100.
fn compute_verification_debt(inputs: &VerificationDebtInputs) -> VerificationDebt {
    let staleness_component = if inputs.staleness_cap_hours > 0.0 {
        (inputs.staleness_hours / inputs.staleness_cap_hours).clamp(0.0, 1.0) * 25.0
    } else {
        0.0
    };

    let queue_component = if inputs.queue_capacity > 0 {
        (inputs.queue_depth as f64 / inputs.queue_capacity as f64).clamp(0.0, 1.0) * 25.0
    } else {
        0.0
    };

    let backlog_component = if inputs.review_backlog_cap > 0 {
        (inputs.review_backlog as f64 / inputs.review_backlog_cap as f64).clamp(0.0, 1.0) * 20.0
    } else {
        0.0
    };

    let blended_conflict_rate =
        0.7 * inputs.merge_conflict_rate + 0.3 * inputs.semantic_conflict_rate;
    let conflict_component = blended_conflict_rate.clamp(0.0, 1.0) * 20.0;

    let retries_component = if inputs.retries_cap > 0 {
        (inputs.retries_total as f64 / inputs.retries_cap as f64).clamp(0.0, 1.0) * 10.0
    } else {
        0.0
    };

    let debt_score = (staleness_component
        + queue_component
        + backlog_component
        + conflict_component
        + retries_component)
        .clamp(0.0, 100.0);

    VerificationDebt {
        debt_score,
        debt_adjusted: 100.0 - debt_score,
    }
}

/// Computes a verification debt snapshot and emits `verification.debt_snapshot`.
pub async fn verification_debt<S: Store>(
    store: &S,
    tenant_id: Option<&str>,
    inputs: &VerificationDebtInputs,
) -> Result<VerificationDebt> {
    let debt = compute_verification_debt(inputs);
    let payload = serde_json::to_value(&debt).context("serialize verification debt")?;
    emit_snapshot(store, tenant_id, "verification.debt_snapshot", payload).await?;
    Ok(debt)
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthPrediction {
    pub current_status: HealthStatus,
    pub projected_score: f64,
    pub projected_status: HealthStatus,
    pub recommend_gating: bool,
}

/// Fits linear velocity separately on the older and newer halves of
/// `snapshots` (ordered oldest-first), projects the newer trend forward
/// by one snapshot interval, and flags gating when the projection crosses
/// into red from a non-red present.
fn compute_health_prediction(snapshots: &[HealthSnapshot]) -> Option<HealthPrediction> {
    if snapshots.len() < 4 {
        return None;
    }

    let mid = snapshots.len() / 2;
    let recent = &snapshots[mid..];

    let velocity = linear_velocity(recent);
    let current_score = snapshots.last().unwrap().score;
    let current_status = status_for_score(current_score);

    let projected_score = (current_score + velocity).clamp(0.0, 100.0);
    let projected_status = status_for_score(projected_score);

    let recommend_gating = projected_status == HealthStatus::Red && current_status != HealthStatus::Red;

    Some(HealthPrediction {
        current_status,
        projected_score,
        projected_status,
        recommend_gating,
    })
}

/// Computes a health trend projection and, when there is enough history
/// to produce one, emits `health.prediction`.
pub async fn predict_health<S: Store>(
    store: &S,
    tenant_id: Option<&str>,
    snapshots: &[HealthSnapshot],
) -> Result<Option<HealthPrediction>> {
    let prediction = compute_health_prediction(snapshots);
    if let Some(ref prediction) = prediction {
        let payload = serde_json::to_value(prediction).context("serialize health prediction")?;
        emit_snapshot(store, tenant_id, "health.prediction", payload).await?;
    }
    Ok(prediction)
}

/// Average per-step delta across a slice of snapshots, in score units.
fn linear_velocity(snapshots: &[HealthSnapshot]) -> f64 {
    if snapshots.len() < 2 {
        return 0.0;
    }
    let first = snapshots.first().unwrap().score;
    let last = snapshots.last().unwrap().score;
    (last - first) / (snapshots.len() - 1) as f64
}

#[derive(Debug, Clone, Serialize)]
pub struct ComplianceSummary {
    pub total_intents: u32,
    pub within_thresholds: u32,
    pub compliance_rate: f64,
}

pub fn compliance_summary(total_intents: u32, violations: u32) -> ComplianceSummary {
    let within = total_intents.saturating_sub(violations);
    let rate = if total_intents == 0 {
        1.0
    } else {
        within as f64 / total_intents as f64
    };
    ComplianceSummary {
        total_intents,
        within_thresholds: within,
        compliance_rate: rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_store::EventStore;

    #[test]
    fn repo_health_boundaries() {
        assert_eq!(status_for_score(70.0), HealthStatus::Green);
        assert_eq!(status_for_score(69.9), HealthStatus::Yellow);
        assert_eq!(status_for_score(40.0), HealthStatus::Yellow);
        assert_eq!(status_for_score(39.9), HealthStatus::Red);
    }

    #[tokio::test]
    async fn verification_debt_weights_sum_behavior() {
        let store = converge_testkit::InMemoryStore::new();
        let inputs = VerificationDebtInputs {
            staleness_hours: 100.0,
            staleness_cap_hours: 100.0,
            queue_depth: 10,
            queue_capacity: 10,
            review_backlog: 5,
            review_backlog_cap: 5,
            merge_conflict_rate: 1.0,
            semantic_conflict_rate: 1.0,
            retries_total: 10,
            retries_cap: 10,
        };
        let debt = verification_debt(&store, None, &inputs).await.unwrap();
        assert_eq!(debt.debt_score, 100.0);
        assert_eq!(debt.debt_adjusted, 0.0);

        let events = store.query(&Default::default()).await.unwrap();
        assert!(events.iter().any(|e| e.event_type == "verification.debt_snapshot"));
    }

    #[tokio::test]
    async fn predict_health_recommends_gating_on_downward_trend() {
        let store = converge_testkit::InMemoryStore::new();
        let snapshots: Vec<HealthSnapshot> = (0..6)
            .map(|i| HealthSnapshot {
                timestamp: Utc::now(),
                score: 80.0 - (i as f64) * 15.0,
                status: status_for_score(80.0 - (i as f64) * 15.0),
            })
            .collect();
        let pred = predict_health(&store, None, &snapshots).await.unwrap().unwrap();
        assert!(pred.recommend_gating);

        let events = store.query(&Default::default()).await.unwrap();
        assert!(events.iter().any(|e| e.event_type == "health.prediction"));
    }

    #[tokio::test]
    async fn repo_health_emits_change_snapshot_on_status_change() {
        let store = converge_testkit::InMemoryStore::new();
        repo_health(&store, None, Some(HealthStatus::Green), 0.9, 50.0, 20).await.unwrap();

        let events = store.query(&Default::default()).await.unwrap();
        assert!(events.iter().any(|e| e.event_type == "health.snapshot"));
        assert!(events.iter().any(|e| e.event_type == "health.change_snapshot"));
    }
}

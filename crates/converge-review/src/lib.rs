//! Human-review tasks, lifecycle, and SLA tracking. The state machine
//! generalizes the idempotent-apply-by-event-id pattern used for order
//! lifecycle transitions elsewhere in this codebase: illegal transitions
//! are a hard error, repeat delivery of the same event id is a no-op.

use std::collections::HashSet;
use std::fmt;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use converge_eventlog::new_trace_id;
use converge_schemas::{NewEvent, ReviewResolution, ReviewStatus, ReviewTask, ReviewTrigger, RiskLevel};
use converge_store::Store;

#[derive(Debug, Clone)]
pub enum ReviewEvent {
    Assign { reviewer: String },
    StartReview,
    Escalate,
    Resolve { resolution: ReviewResolution },
    Cancel,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("illegal review transition: {event} from {from:?}")]
pub struct TransitionError {
    pub from: ReviewStatus,
    pub event: String,
}

impl fmt::Display for ReviewEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewEvent::Assign { .. } => write!(f, "Assign"),
            ReviewEvent::StartReview => write!(f, "StartReview"),
            ReviewEvent::Escalate => write!(f, "Escalate"),
            ReviewEvent::Resolve { resolution } => write!(f, "Resolve({resolution:?})"),
            ReviewEvent::Cancel => write!(f, "Cancel"),
        }
    }
}

pub struct ReviewTaskMachine {
    pub task: ReviewTask,
    applied: HashSet<String>,
}

impl ReviewTaskMachine {
    pub fn new(task: ReviewTask) -> Self {
        ReviewTaskMachine {
            task,
            applied: HashSet::new(),
        }
    }

    pub fn apply(&mut self, event: ReviewEvent, event_id: Option<&str>) -> Result<(), TransitionError> {
        if let Some(id) = event_id {
            if self.applied.contains(id) {
                return Ok(());
            }
        }

        self.do_transition(event)?;

        if let Some(id) = event_id {
            self.applied.insert(id.to_string());
        }
        Ok(())
    }

    fn do_transition(&mut self, event: ReviewEvent) -> Result<(), TransitionError> {
        use ReviewStatus::*;

        let now = Utc::now();
        let from = self.task.status;
        let event_name = event.to_string();

        match (from, event) {
            (Pending, ReviewEvent::Assign { reviewer }) => {
                self.task.reviewer = Some(reviewer);
                self.task.status = Assigned;
            }
            (Assigned, ReviewEvent::StartReview) => {
                self.task.status = InReview;
            }
            (Assigned, ReviewEvent::Escalate) | (InReview, ReviewEvent::Escalate) => {
                self.task.status = Escalated;
            }
            (InReview, ReviewEvent::Resolve { resolution }) | (Escalated, ReviewEvent::Resolve { resolution }) => {
                self.task.resolution = Some(resolution);
                self.task.status = Completed;
            }
            (Pending, ReviewEvent::Cancel)
            | (Assigned, ReviewEvent::Cancel)
            | (InReview, ReviewEvent::Cancel)
            | (Escalated, ReviewEvent::Cancel) => {
                self.task.status = Cancelled;
            }
            (state, ev) => {
                return Err(TransitionError {
                    from: state,
                    event: ev.to_string(),
                })
            }
        }

        self.task.updated_at = now;
        let _ = event_name;
        Ok(())
    }
}

pub fn create_review_task(
    id: String,
    intent_id: String,
    risk_level: RiskLevel,
    trigger: ReviewTrigger,
    priority: i32,
) -> ReviewTask {
    let now = Utc::now();
    let sla_hours = ReviewTask::sla_hours(risk_level);
    ReviewTask {
        id,
        intent_id,
        status: ReviewStatus::Pending,
        reviewer: None,
        priority,
        risk_level,
        trigger,
        sla_deadline: now + Duration::hours(sla_hours),
        created_at: now,
        updated_at: now,
        resolution: None,
    }
}

/// Scans open tasks (pending/assigned/in_review) for SLA breaches and
/// emits `review.sla_breached` per breach.
pub async fn check_sla_breaches<'a, S: Store>(
    store: &S,
    tasks: &'a [ReviewTask],
    now: DateTime<Utc>,
) -> Result<Vec<&'a ReviewTask>> {
    let breached: Vec<&ReviewTask> = tasks
        .iter()
        .filter(|t| {
            matches!(
                t.status,
                ReviewStatus::Pending | ReviewStatus::Assigned | ReviewStatus::InReview
            )
        })
        .filter(|t| t.sla_deadline < now)
        .collect();

    for task in &breached {
        store
            .append(NewEvent {
                id: None,
                trace_id: Some(new_trace_id()),
                event_type: "review.sla_breached".to_string(),
                intent_id: Some(task.intent_id.clone()),
                agent_id: None,
                tenant_id: None,
                payload: serde_json::json!({
                    "review_id": task.id,
                    "sla_deadline": task.sla_deadline,
                    "status": task.status,
                }),
                evidence: serde_json::json!({}),
            })
            .await
            .context("failed to append review.sla_breached")?;
    }

    Ok(breached)
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_store::EventStore;

    #[test]
    fn happy_path_assign_review_approve() {
        let task = create_review_task("r1".to_string(), "i1".to_string(), RiskLevel::High, ReviewTrigger::Policy, 5);
        let mut m = ReviewTaskMachine::new(task);
        m.apply(ReviewEvent::Assign { reviewer: "alice".to_string() }, None).unwrap();
        m.apply(ReviewEvent::StartReview, None).unwrap();
        m.apply(ReviewEvent::Resolve { resolution: ReviewResolution::Approved }, None).unwrap();
        assert_eq!(m.task.status, ReviewStatus::Completed);
        assert_eq!(m.task.resolution, Some(ReviewResolution::Approved));
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let task = create_review_task("r1".to_string(), "i1".to_string(), RiskLevel::Low, ReviewTrigger::Manual, 5);
        let mut m = ReviewTaskMachine::new(task);
        let err = m.apply(ReviewEvent::StartReview, None).unwrap_err();
        assert_eq!(err.from, ReviewStatus::Pending);
    }

    #[test]
    fn duplicate_event_id_is_idempotent() {
        let task = create_review_task("r1".to_string(), "i1".to_string(), RiskLevel::Low, ReviewTrigger::Manual, 5);
        let mut m = ReviewTaskMachine::new(task);
        m.apply(ReviewEvent::Assign { reviewer: "bob".to_string() }, Some("evt-1")).unwrap();
        m.apply(ReviewEvent::Assign { reviewer: "carol".to_string() }, Some("evt-1")).unwrap();
        assert_eq!(m.task.reviewer, Some("bob".to_string()));
    }

    #[test]
    fn sla_hours_match_risk_level() {
        assert_eq!(ReviewTask::sla_hours(RiskLevel::Low), 72);
        assert_eq!(ReviewTask::sla_hours(RiskLevel::Critical), 8);
    }

    #[tokio::test]
    async fn breached_task_emits_sla_breached_event() {
        use converge_testkit::InMemoryStore;

        let store = InMemoryStore::new();
        let mut task = create_review_task("r1".to_string(), "i1".to_string(), RiskLevel::Critical, ReviewTrigger::Policy, 5);
        task.sla_deadline = Utc::now() - Duration::hours(1);
        let tasks = vec![task];

        let breached = check_sla_breaches(&store, &tasks, Utc::now()).await.unwrap();
        assert_eq!(breached.len(), 1);

        let events = store.query(&Default::default()).await.unwrap();
        assert!(events.iter().any(|e| e.event_type == "review.sla_breached"));
    }
}

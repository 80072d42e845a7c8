//! Intent lifecycle transitions. Each operation below is named after the
//! event that drives it rather than folded into one generic `apply`: the
//! retry-count branching on block/merge-failure doesn't collapse into a
//! single state/event match the way a simpler machine would, so each
//! operation gets its own precondition check and its own typed error.

use converge_schemas::{Intent, IntentStatus};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal transition: {operation} from {from:?}")]
pub struct TransitionError {
    pub from: IntentStatus,
    pub operation: &'static str,
}

/// Result of a blocked validation or a failed merge attempt: retries are
/// bounded, so the intent either goes back to the front of the queue or
/// is rejected outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    Requeued,
    Rejected,
}

fn illegal(intent: &Intent, operation: &'static str) -> TransitionError {
    TransitionError {
        from: intent.status,
        operation,
    }
}

/// READY -> VALIDATED, on a clean run through the validation pipeline.
/// Also accepts an intent already VALIDATED, since the queue processor
/// re-runs the same pipeline against VALIDATED intents for I2
/// revalidation and a clean run there simply reaffirms the status.
pub fn transition_to_validated(intent: &mut Intent) -> Result<(), TransitionError> {
    if !matches!(intent.status, IntentStatus::Ready | IntentStatus::Validated) {
        return Err(illegal(intent, "transition_to_validated"));
    }
    intent.status = IntentStatus::Validated;
    Ok(())
}

/// VALIDATED -> READY|REJECTED, on a BLOCK verdict from the validation
/// pipeline. Bumps `retries` first, then rejects only once the bumped
/// count has reached `max_retries` (invariant I3).
pub fn block_intent(intent: &mut Intent, max_retries: u32) -> Result<BlockOutcome, TransitionError> {
    if intent.status != IntentStatus::Validated {
        return Err(illegal(intent, "block_intent"));
    }
    intent.retries += 1;
    if intent.retries >= max_retries {
        intent.status = IntentStatus::Rejected;
        Ok(BlockOutcome::Rejected)
    } else {
        intent.status = IntentStatus::Ready;
        Ok(BlockOutcome::Requeued)
    }
}

/// Pre-revalidation I3 check: an intent that has already exhausted its
/// retries is rejected before another validation run is attempted.
pub fn reject_max_retries(intent: &mut Intent) -> Result<(), TransitionError> {
    if intent.status.is_terminal() {
        return Err(illegal(intent, "reject_max_retries"));
    }
    intent.status = IntentStatus::Rejected;
    Ok(())
}

/// VALIDATED -> QUEUED, once the queue processor has accepted the intent
/// for a merge attempt.
pub fn enqueue(intent: &mut Intent) -> Result<(), TransitionError> {
    if intent.status != IntentStatus::Validated {
        return Err(illegal(intent, "enqueue"));
    }
    intent.status = IntentStatus::Queued;
    Ok(())
}

/// QUEUED|VALIDATED -> MERGED. `ConfirmMerge` may be called directly
/// against a validated intent that skipped auto-confirm queuing.
pub fn confirm_merge(intent: &mut Intent) -> Result<(), TransitionError> {
    if !matches!(intent.status, IntentStatus::Queued | IntentStatus::Validated) {
        return Err(illegal(intent, "confirm_merge"));
    }
    intent.status = IntentStatus::Merged;
    Ok(())
}

/// QUEUED -> READY|REJECTED, on a failed `ExecuteMerge` call. Same bounded
/// retry logic as `block_intent`.
pub fn merge_failed(intent: &mut Intent, max_retries: u32) -> Result<BlockOutcome, TransitionError> {
    if intent.status != IntentStatus::Queued {
        return Err(illegal(intent, "merge_failed"));
    }
    intent.retries += 1;
    if intent.retries >= max_retries {
        intent.status = IntentStatus::Rejected;
        Ok(BlockOutcome::Rejected)
    } else {
        intent.status = IntentStatus::Ready;
        Ok(BlockOutcome::Requeued)
    }
}

/// Unconditional reset to READY when the target ref advances underneath
/// an intent (a push to the target branch). Retries are left untouched;
/// this is not a validation failure.
pub fn push_reset(intent: &mut Intent, new_base_commit: &str) {
    intent.status = IntentStatus::Ready;
    if let serde_json::Value::Object(ref mut map) = intent.technical {
        map.insert(
            "initial_base_commit".to_string(),
            serde_json::Value::String(new_base_commit.to_string()),
        );
    } else {
        intent.technical = serde_json::json!({ "initial_base_commit": new_base_commit });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use converge_schemas::{OriginType, RiskLevel};

    fn sample(status: IntentStatus) -> Intent {
        let now = Utc::now();
        Intent {
            id: "org/repo:pr-1".to_string(),
            source: "feature/x".to_string(),
            target: "main".to_string(),
            status,
            created_at: now,
            created_by: "agent-1".to_string(),
            risk_level: RiskLevel::Low,
            priority: 100,
            semantic: serde_json::json!({}),
            technical: serde_json::json!({}),
            checks_required: vec![],
            dependencies: vec![],
            retries: 0,
            tenant_id: None,
            plan_id: None,
            origin_type: OriginType::Agent,
            updated_at: now,
        }
    }

    #[test]
    fn ready_to_validated() {
        let mut i = sample(IntentStatus::Ready);
        transition_to_validated(&mut i).unwrap();
        assert_eq!(i.status, IntentStatus::Validated);
    }

    #[test]
    fn transition_to_validated_rejects_wrong_state() {
        let mut i = sample(IntentStatus::Queued);
        let err = transition_to_validated(&mut i).unwrap_err();
        assert_eq!(err.from, IntentStatus::Queued);
    }

    #[test]
    fn block_intent_requeues_below_threshold() {
        let mut i = sample(IntentStatus::Validated);
        i.retries = 1;
        let outcome = block_intent(&mut i, 3).unwrap();
        assert_eq!(outcome, BlockOutcome::Requeued);
        assert_eq!(i.status, IntentStatus::Ready);
        assert_eq!(i.retries, 2);
    }

    #[test]
    fn block_intent_rejects_at_threshold() {
        let mut i = sample(IntentStatus::Validated);
        i.retries = 2;
        let outcome = block_intent(&mut i, 3).unwrap();
        assert_eq!(outcome, BlockOutcome::Rejected);
        assert_eq!(i.status, IntentStatus::Rejected);
        assert_eq!(i.retries, 3);
    }

    #[test]
    fn reject_max_retries_requires_non_terminal() {
        let mut i = sample(IntentStatus::Merged);
        assert!(reject_max_retries(&mut i).is_err());
    }

    #[test]
    fn enqueue_requires_validated() {
        let mut i = sample(IntentStatus::Ready);
        assert!(enqueue(&mut i).is_err());
        let mut i2 = sample(IntentStatus::Validated);
        enqueue(&mut i2).unwrap();
        assert_eq!(i2.status, IntentStatus::Queued);
    }

    #[test]
    fn confirm_merge_accepts_queued_or_validated() {
        let mut i = sample(IntentStatus::Queued);
        confirm_merge(&mut i).unwrap();
        assert_eq!(i.status, IntentStatus::Merged);

        let mut i2 = sample(IntentStatus::Validated);
        confirm_merge(&mut i2).unwrap();
        assert_eq!(i2.status, IntentStatus::Merged);

        let mut i3 = sample(IntentStatus::Ready);
        assert!(confirm_merge(&mut i3).is_err());
    }

    #[test]
    fn merge_failed_rejects_at_threshold() {
        let mut i = sample(IntentStatus::Queued);
        i.retries = 4;
        let outcome = merge_failed(&mut i, 5).unwrap();
        assert_eq!(outcome, BlockOutcome::Rejected);
        assert_eq!(i.status, IntentStatus::Rejected);
    }

    #[test]
    fn push_reset_is_unconditional_and_updates_base_commit() {
        let mut i = sample(IntentStatus::Merged);
        push_reset(&mut i, "abc123");
        assert_eq!(i.status, IntentStatus::Ready);
        assert_eq!(
            i.technical.get("initial_base_commit").and_then(|v| v.as_str()),
            Some("abc123")
        );
    }
}

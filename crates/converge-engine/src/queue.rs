//! The merge queue processor: acquires an advisory lock, walks VALIDATED
//! intents in priority order, and drives each through dependency gating,
//! bounded-retry revalidation, and (optionally) an immediate merge
//! attempt.

use anyhow::{Context, Result};
use chrono::Utc;
use converge_eventlog::new_trace_id;
use converge_schemas::{Intent, IntentStatus, NewEvent, ReviewResolution};
use converge_scm::ScmPort;
use converge_store::{Store, StoreError};

use crate::checks::CheckRunner;
use crate::lifecycle::{self, BlockOutcome};
use crate::validator::{self, ValidationConfig, ValidationOutcome};

pub const QUEUE_LOCK_NAME: &str = "queue_processor";
pub const QUEUE_LOCK_TTL_SECONDS: i64 = 300;

#[derive(Debug, Clone)]
pub struct ProcessQueueParams<'a> {
    pub limit: u32,
    pub target: Option<&'a str>,
    pub auto_confirm: bool,
    pub max_retries: u32,
    pub tenant_id: Option<&'a str>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct QueueCounts {
    pub considered: u32,
    pub dependency_blocked: u32,
    pub review_blocked: u32,
    pub rejected: u32,
    pub requeued: u32,
    pub queued: u32,
    pub merged: u32,
    pub merge_failed: u32,
}

/// `ProcessQueue` from spec §4.8. Acquires the advisory lock before
/// touching anything and releases it on every exit path, including an
/// error partway through the cycle.
#[allow(clippy::too_many_arguments)]
pub async fn process_queue<S, Scm, C>(
    store: &S,
    scm: &Scm,
    checks: &C,
    runner: &dyn converge_coherence::CommandRunner,
    coupling: &[converge_risk::CoChange],
    holder_pid: i64,
    validation: &ValidationConfig<'_>,
    params: &ProcessQueueParams<'_>,
) -> Result<QueueCounts>
where
    S: Store,
    Scm: ScmPort + ?Sized,
    C: CheckRunner + ?Sized,
{
    let acquired = store
        .acquire_queue_lock(QUEUE_LOCK_NAME, holder_pid, QUEUE_LOCK_TTL_SECONDS)
        .await
        .context("acquire queue lock")?;
    if !acquired {
        return Err(StoreError::LockHeld(QUEUE_LOCK_NAME.to_string()).into());
    }

    let outcome = run_cycle(store, scm, checks, runner, coupling, validation, params).await;

    store
        .release_queue_lock(QUEUE_LOCK_NAME, holder_pid)
        .await
        .context("release queue lock")?;

    outcome
}

async fn emit<S: Store>(store: &S, intent: &Intent, event_type: &str, payload: serde_json::Value) -> Result<()> {
    store
        .append(NewEvent {
            id: None,
            trace_id: Some(new_trace_id()),
            event_type: event_type.to_string(),
            intent_id: Some(intent.id.clone()),
            agent_id: None,
            tenant_id: intent.tenant_id.clone(),
            payload,
            evidence: serde_json::json!({}),
        })
        .await
        .with_context(|| format!("failed to append {event_type}"))?;
    Ok(())
}

async fn run_cycle<S, Scm, C>(
    store: &S,
    scm: &Scm,
    checks: &C,
    runner: &dyn converge_coherence::CommandRunner,
    coupling: &[converge_risk::CoChange],
    validation: &ValidationConfig<'_>,
    params: &ProcessQueueParams<'_>,
) -> Result<QueueCounts>
where
    S: Store,
    Scm: ScmPort + ?Sized,
    C: CheckRunner + ?Sized,
{
    let mut counts = QueueCounts::default();
    let candidates = store
        .list_validated_for_queue(params.limit, params.tenant_id)
        .await
        .context("list validated intents")?;

    for mut intent in candidates {
        if let Some(target) = params.target {
            if intent.target != target {
                continue;
            }
        }
        counts.considered += 1;

        if process_dependencies(store, &mut intent, &mut counts).await? {
            continue;
        }
        if process_review_gate(store, &mut intent, &mut counts).await? {
            continue;
        }
        if process_retry_ceiling(store, &mut intent, params.max_retries, &mut counts).await? {
            continue;
        }
        if process_revalidation(
            store,
            scm,
            checks,
            runner,
            coupling,
            &mut intent,
            validation,
            params.max_retries,
            &mut counts,
        )
        .await?
        {
            continue;
        }

        process_enqueue_and_merge(store, scm, &mut intent, params, &mut counts).await?;
    }

    emit_summary(store, &counts).await?;
    Ok(counts)
}

/// Returns `true` if the intent was handled (blocked) and the caller
/// should move to the next candidate.
async fn process_dependencies<S: Store>(store: &S, intent: &mut Intent, counts: &mut QueueCounts) -> Result<bool> {
    let mut unmet = Vec::new();
    for dep_id in &intent.dependencies {
        let dep = store.get_intent(dep_id).await.context("load dependency")?;
        match dep {
            Some(d) if d.status == IntentStatus::Merged => {}
            _ => unmet.push(dep_id.clone()),
        }
    }
    if unmet.is_empty() {
        return Ok(false);
    }
    emit(
        store,
        intent,
        "intent.dependency_blocked",
        serde_json::json!({ "unmet": unmet }),
    )
    .await?;
    counts.dependency_blocked += 1;
    Ok(true)
}

/// An open review blocks processing outright; a resolved-rejected review
/// rejects the intent; an approved (or absent) review lets it through.
async fn process_review_gate<S: Store>(store: &S, intent: &mut Intent, counts: &mut QueueCounts) -> Result<bool> {
    if store
        .get_open_review_for_intent(&intent.id)
        .await
        .context("check open review")?
        .is_some()
    {
        counts.review_blocked += 1;
        return Ok(true);
    }

    let latest = store
        .get_latest_review_for_intent(&intent.id)
        .await
        .context("check latest review")?;
    if let Some(task) = latest {
        if task.resolution == Some(ReviewResolution::Rejected) {
            lifecycle::reject_max_retries(intent).context("reject after review rejection")?;
            persist(store, intent).await?;
            emit(
                store,
                intent,
                "intent.rejected",
                serde_json::json!({ "reason": "review_rejected" }),
            )
            .await?;
            counts.rejected += 1;
            return Ok(true);
        }
    }
    Ok(false)
}

async fn process_retry_ceiling<S: Store>(
    store: &S,
    intent: &mut Intent,
    max_retries: u32,
    counts: &mut QueueCounts,
) -> Result<bool> {
    if intent.retries < max_retries {
        return Ok(false);
    }
    lifecycle::reject_max_retries(intent).context("reject on max retries")?;
    persist(store, intent).await?;
    emit(
        store,
        intent,
        "intent.rejected",
        serde_json::json!({ "reason": "max_retries_exceeded" }),
    )
    .await?;
    counts.rejected += 1;
    Ok(true)
}

#[allow(clippy::too_many_arguments)]
async fn process_revalidation<S, Scm, C>(
    store: &S,
    scm: &Scm,
    checks: &C,
    runner: &dyn converge_coherence::CommandRunner,
    coupling: &[converge_risk::CoChange],
    intent: &mut Intent,
    validation: &ValidationConfig<'_>,
    max_retries: u32,
    counts: &mut QueueCounts,
) -> Result<bool>
where
    S: Store,
    Scm: ScmPort + ?Sized,
    C: CheckRunner + ?Sized,
{
    let outcome = validator::validate_intent(store, scm, checks, runner, coupling, intent, None, validation)
        .await
        .context("run I2 revalidation")?;

    let reason = match outcome {
        ValidationOutcome::Validated { .. } => return Ok(false),
        ValidationOutcome::Blocked { reason, .. } => reason,
    };

    match lifecycle::block_intent(intent, max_retries).context("block after failed revalidation")? {
        BlockOutcome::Rejected => {
            persist(store, intent).await?;
            emit(store, intent, "intent.rejected", serde_json::json!({ "reason": reason })).await?;
            counts.rejected += 1;
        }
        BlockOutcome::Requeued => {
            persist(store, intent).await?;
            emit(store, intent, "intent.requeued", serde_json::json!({ "reason": reason })).await?;
            counts.requeued += 1;
        }
    }
    Ok(true)
}

async fn process_enqueue_and_merge<S, Scm>(
    store: &S,
    scm: &Scm,
    intent: &mut Intent,
    params: &ProcessQueueParams<'_>,
    counts: &mut QueueCounts,
) -> Result<()>
where
    S: Store,
    Scm: ScmPort + ?Sized,
{
    lifecycle::enqueue(intent).context("enqueue validated intent")?;
    persist(store, intent).await?;
    counts.queued += 1;

    if !params.auto_confirm {
        return Ok(());
    }

    match scm.execute_merge(&intent.source, &intent.target) {
        Ok(merged_commit) => {
            lifecycle::confirm_merge(intent).context("confirm merge")?;
            persist(store, intent).await?;
            emit(
                store,
                intent,
                "intent.merged",
                serde_json::json!({ "merged_commit": merged_commit }),
            )
            .await?;
            counts.merged += 1;
        }
        Err(err) => {
            let outcome = lifecycle::merge_failed(intent, params.max_retries).context("merge_failed transition")?;
            persist(store, intent).await?;
            emit(
                store,
                intent,
                "intent.merge_failed",
                serde_json::json!({ "error": err.to_string() }),
            )
            .await?;
            match outcome {
                BlockOutcome::Rejected => counts.rejected += 1,
                BlockOutcome::Requeued => counts.merge_failed += 1,
            }
        }
    }
    Ok(())
}

async fn persist<S: Store>(store: &S, intent: &mut Intent) -> Result<()> {
    intent.updated_at = Utc::now();
    store.upsert_intent(intent).await.context("persist intent")
}

async fn emit_summary<S: Store>(store: &S, counts: &QueueCounts) -> Result<()> {
    store
        .append(NewEvent {
            id: None,
            trace_id: Some(new_trace_id()),
            event_type: "queue.processed".to_string(),
            intent_id: None,
            agent_id: None,
            tenant_id: None,
            payload: serde_json::to_value(counts).context("serialize queue counts")?,
            evidence: serde_json::json!({}),
        })
        .await
        .context("append queue.processed")?;
    Ok(())
}

/// `ConfirmMerge(intent_id, merged_commit?)`: manual override for a
/// QUEUED (or VALIDATED) intent.
pub async fn confirm_merge<S: Store>(store: &S, intent_id: &str, merged_commit: Option<String>) -> Result<()> {
    let mut intent = store
        .get_intent(intent_id)
        .await
        .context("load intent")?
        .ok_or_else(|| StoreError::IntentNotFound(intent_id.to_string()))?;
    lifecycle::confirm_merge(&mut intent).context("confirm merge")?;
    persist(store, &mut intent).await?;
    emit(
        store,
        &intent,
        "intent.merged",
        serde_json::json!({ "merged_commit": merged_commit }),
    )
    .await
}

/// `ResetQueue(intent_id, set_status?, clear_lock?)`: zeroes retries and
/// optionally overrides status and/or force-releases the queue lock.
pub async fn reset_queue<S: Store>(
    store: &S,
    intent_id: &str,
    set_status: Option<IntentStatus>,
    clear_lock: bool,
) -> Result<()> {
    let mut intent = store
        .get_intent(intent_id)
        .await
        .context("load intent")?
        .ok_or_else(|| StoreError::IntentNotFound(intent_id.to_string()))?;
    intent.retries = 0;
    if let Some(status) = set_status {
        intent.status = status;
    }
    persist(store, &mut intent).await?;

    if clear_lock {
        store
            .force_release_queue_lock(QUEUE_LOCK_NAME)
            .await
            .context("force release queue lock")?;
    }
    Ok(())
}

/// Applies the push-on-source reset: any non-terminal intent whose
/// `technical.repo` matches `repo` and whose `source` matches the pushed
/// branch goes back to READY with `retries` left alone and
/// `technical.initial_base_commit` updated. Intents for other repos are
/// left untouched (cross-repo safety).
pub async fn apply_push_reset<S: Store>(
    store: &S,
    repo: &str,
    source_branch: &str,
    new_base_commit: &str,
) -> Result<u32> {
    let mut reset_count = 0;
    for status in [IntentStatus::Ready, IntentStatus::Validated, IntentStatus::Queued] {
        for mut intent in store
            .list_by_status(status, None)
            .await
            .with_context(|| format!("list intents in status {status:?}"))?
        {
            if intent.technical_repo() != Some(repo) || intent.source != source_branch {
                continue;
            }
            lifecycle::push_reset(&mut intent, new_base_commit);
            persist(store, &mut intent).await?;
            emit(
                store,
                &intent,
                "intent.requeued",
                serde_json::json!({ "reason": "push_reset", "new_base_commit": new_base_commit }),
            )
            .await?;
            reset_count += 1;
        }
    }
    Ok(reset_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_coherence::CommandRunner;
    use converge_policy::{default_policy_config, GateMode};
    use converge_scm::InMemoryScm;
    use converge_schemas::RiskLevel;
    use converge_store::{IntentStore, LockStore};
    use converge_testkit::{InMemoryStore, IntentBuilder};
    use std::time::Duration;

    struct NoopRunner;
    impl CommandRunner for NoopRunner {
        fn run(&self, _command: &str, _timeout: Duration) -> Result<String> {
            Ok(String::new())
        }
    }

    fn params() -> ProcessQueueParams<'static> {
        ProcessQueueParams {
            limit: 20,
            target: None,
            auto_confirm: false,
            max_retries: 3,
            tenant_id: None,
        }
    }

    #[tokio::test]
    async fn unmet_dependency_blocks_without_touching_status() {
        let store = InMemoryStore::new();
        let scm = InMemoryScm::new();
        scm.set_branch_files("feature/x", &["src/a.rs"]);
        let checks = crate::checks::FixedCheckRunner::new();
        let policy = default_policy_config();
        let validation = ValidationConfig {
            policy: &policy,
            gate_mode: GateMode::Shadow,
            enforce_ratio: 1.0,
            skip_checks: true,
            use_last_simulation: false,
            harness: None,
        };

        let intent = IntentBuilder::new("org/repo:pr-1")
            .status(IntentStatus::Validated)
            .dependencies(vec!["org/repo:pr-0".to_string()])
            .build();
        store.upsert_intent(&intent).await.unwrap();

        let counts = process_queue(&store, &scm, &checks, &NoopRunner, &[], 1, &validation, &params())
            .await
            .unwrap();

        assert_eq!(counts.dependency_blocked, 1);
        assert_eq!(counts.queued, 0);
        let reloaded = store.get_intent("org/repo:pr-1").await.unwrap().unwrap();
        assert_eq!(reloaded.status, IntentStatus::Validated);
    }

    #[tokio::test]
    async fn exhausted_retries_are_rejected_before_revalidation() {
        let store = InMemoryStore::new();
        let scm = InMemoryScm::new();
        let checks = crate::checks::FixedCheckRunner::new();
        let policy = default_policy_config();
        let validation = ValidationConfig {
            policy: &policy,
            gate_mode: GateMode::Shadow,
            enforce_ratio: 1.0,
            skip_checks: true,
            use_last_simulation: false,
            harness: None,
        };

        let intent = IntentBuilder::new("org/repo:pr-1")
            .status(IntentStatus::Validated)
            .risk_level(RiskLevel::Low)
            .build();
        let mut intent = intent;
        intent.retries = 3;
        store.upsert_intent(&intent).await.unwrap();

        let counts = process_queue(&store, &scm, &checks, &NoopRunner, &[], 1, &validation, &params())
            .await
            .unwrap();

        assert_eq!(counts.rejected, 1);
        let reloaded = store.get_intent("org/repo:pr-1").await.unwrap().unwrap();
        assert_eq!(reloaded.status, IntentStatus::Rejected);
    }

    #[tokio::test]
    async fn clean_intent_is_queued_and_auto_confirmed() {
        let store = InMemoryStore::new();
        let scm = InMemoryScm::new();
        scm.set_branch_files("feature/x", &["src/a.rs"]);
        let checks = crate::checks::FixedCheckRunner::new();
        let policy = default_policy_config();
        let validation = ValidationConfig {
            policy: &policy,
            gate_mode: GateMode::Shadow,
            enforce_ratio: 1.0,
            skip_checks: true,
            use_last_simulation: false,
            harness: None,
        };

        let intent = IntentBuilder::new("org/repo:pr-1")
            .status(IntentStatus::Validated)
            .build();
        store.upsert_intent(&intent).await.unwrap();

        let mut p = params();
        p.auto_confirm = true;
        let counts = process_queue(&store, &scm, &checks, &NoopRunner, &[], 1, &validation, &p)
            .await
            .unwrap();

        assert_eq!(counts.merged, 1);
        let reloaded = store.get_intent("org/repo:pr-1").await.unwrap().unwrap();
        assert_eq!(reloaded.status, IntentStatus::Merged);
    }

    #[tokio::test]
    async fn lock_is_not_held_after_a_cycle_completes() {
        let store = InMemoryStore::new();
        let scm = InMemoryScm::new();
        let checks = crate::checks::FixedCheckRunner::new();
        let policy = default_policy_config();
        let validation = ValidationConfig {
            policy: &policy,
            gate_mode: GateMode::Shadow,
            enforce_ratio: 1.0,
            skip_checks: true,
            use_last_simulation: false,
            harness: None,
        };

        process_queue(&store, &scm, &checks, &NoopRunner, &[], 1, &validation, &params())
            .await
            .unwrap();

        assert!(store.lock_holder(QUEUE_LOCK_NAME).await.unwrap().is_none());
    }
}

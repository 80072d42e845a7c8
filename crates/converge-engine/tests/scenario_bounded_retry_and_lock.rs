use converge_coherence::CommandRunner;
use converge_engine::checks::FixedCheckRunner;
use converge_engine::queue::{process_queue, ProcessQueueParams};
use converge_policy::{default_policy_config, GateMode};
use converge_schemas::{IntentStatus, RiskLevel};
use converge_scm::InMemoryScm;
use converge_store::{IntentStore, LockStore};
use converge_testkit::{InMemoryStore, IntentBuilder};
use std::time::Duration;

struct NoopRunner;
impl CommandRunner for NoopRunner {
    fn run(&self, _command: &str, _timeout: Duration) -> anyhow::Result<String> {
        Ok(String::new())
    }
}

fn validation(policy: &converge_policy::PolicyConfig) -> converge_engine::validator::ValidationConfig<'_> {
    converge_engine::validator::ValidationConfig {
        policy,
        gate_mode: GateMode::Shadow,
        enforce_ratio: 1.0,
        skip_checks: true,
        use_last_simulation: false,
        harness: None,
    }
}

#[tokio::test]
async fn scenario_max_retries_exhausted_is_rejected() {
    // GIVEN an intent at the retry ceiling
    let store = InMemoryStore::new();
    let scm = InMemoryScm::new();
    let checks = FixedCheckRunner::new();
    let policy = default_policy_config();

    let mut intent = IntentBuilder::new("org/repo:pr-3")
        .status(IntentStatus::Validated)
        .risk_level(RiskLevel::Low)
        .build();
    intent.retries = 3;
    store.upsert_intent(&intent).await.unwrap();

    // WHEN the queue processor runs with max_retries=3
    let params = ProcessQueueParams {
        limit: 20,
        target: None,
        auto_confirm: false,
        max_retries: 3,
        tenant_id: None,
    };
    let counts = process_queue(&store, &scm, &checks, &NoopRunner, &[], 1, &validation(&policy), &params)
        .await
        .unwrap();

    // THEN it is rejected for exceeding max retries
    assert_eq!(counts.rejected, 1);
    let reloaded = store.get_intent("org/repo:pr-3").await.unwrap().unwrap();
    assert_eq!(reloaded.status, IntentStatus::Rejected);
}

#[tokio::test]
async fn scenario_held_queue_lock_blocks_processing() {
    // GIVEN another worker already holds the queue lock
    let store = InMemoryStore::new();
    let scm = InMemoryScm::new();
    let checks = FixedCheckRunner::new();
    let policy = default_policy_config();

    let acquired = store
        .acquire_queue_lock(converge_engine::queue::QUEUE_LOCK_NAME, 99999, 300)
        .await
        .unwrap();
    assert!(acquired);

    // WHEN this worker tries to process the queue
    let params = ProcessQueueParams {
        limit: 20,
        target: None,
        auto_confirm: false,
        max_retries: 3,
        tenant_id: None,
    };
    let result = process_queue(&store, &scm, &checks, &NoopRunner, &[], 1, &validation(&policy), &params).await;

    // THEN it fails with a lock-contention error and never touches the queue
    let err = result.unwrap_err();
    assert!(err.to_string().to_lowercase().contains("lock"));
}

use converge_coherence::CommandRunner;
use converge_engine::checks::FixedCheckRunner;
use converge_engine::queue::{process_queue, ProcessQueueParams};
use converge_engine::validator::{validate_intent, ValidationConfig, ValidationOutcome};
use converge_policy::{default_policy_config, GateMode};
use converge_schemas::IntentStatus;
use converge_scm::{InMemoryScm, ScmPort};
use converge_store::IntentStore;
use converge_testkit::{InMemoryStore, IntentBuilder};
use std::time::Duration;

struct NoopRunner;
impl CommandRunner for NoopRunner {
    fn run(&self, _command: &str, _timeout: Duration) -> anyhow::Result<String> {
        Ok(String::new())
    }
}

#[tokio::test]
async fn scenario_pr_opened_validated_then_merged() {
    // GIVEN a clean PR branch with no overlapping files against main
    let store = InMemoryStore::new();
    let scm = InMemoryScm::new();
    scm.set_branch_files("feature/clean", &["src/widget.rs"]);
    scm.set_branch_files("main", &[]);

    let intent = IntentBuilder::new("org/repo:pr-1")
        .status(IntentStatus::Ready)
        .source_target("feature/clean", "main")
        .build();
    store.upsert_intent(&intent).await.unwrap();

    let checks = FixedCheckRunner::new();
    let policy = default_policy_config();
    let validation = ValidationConfig {
        policy: &policy,
        gate_mode: GateMode::Shadow,
        enforce_ratio: 1.0,
        skip_checks: true,
        use_last_simulation: false,
        harness: None,
    };

    // WHEN the intent is validated
    let mut intent = store.get_intent("org/repo:pr-1").await.unwrap().unwrap();
    let outcome = validate_intent(&store, &scm, &checks, &NoopRunner, &[], &mut intent, None, &validation)
        .await
        .unwrap();
    store.upsert_intent(&intent).await.unwrap();

    // THEN it reaches VALIDATED
    assert!(matches!(outcome, ValidationOutcome::Validated { .. }));
    assert_eq!(intent.status, IntentStatus::Validated);

    // WHEN the queue processor runs with auto-confirm
    let params = ProcessQueueParams {
        limit: 20,
        target: None,
        auto_confirm: true,
        max_retries: 3,
        tenant_id: None,
    };
    let counts = process_queue(&store, &scm, &checks, &NoopRunner, &[], 1, &validation, &params)
        .await
        .unwrap();

    // THEN it is merged and the SCM target branch advanced
    assert_eq!(counts.merged, 1);
    let reloaded = store.get_intent("org/repo:pr-1").await.unwrap().unwrap();
    assert_eq!(reloaded.status, IntentStatus::Merged);
    assert!(scm.log_entries(1).unwrap().first().is_some());
}

use converge_coherence::CommandRunner;
use converge_engine::checks::FixedCheckRunner;
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
async fn scenario_conflicting_merge_is_blocked_and_intent_stays_ready() {
    // GIVEN feature A already merged into main, touching shared.rs, and
    // feature B touching the same file
    let store = InMemoryStore::new();
    let scm = InMemoryScm::new();
    scm.set_branch_files("feature/a", &["src/shared.rs"]);
    scm.execute_merge("feature/a", "main").unwrap();
    scm.set_branch_files("feature/b", &["src/shared.rs"]);

    let intent = IntentBuilder::new("org/repo:pr-2")
        .status(IntentStatus::Ready)
        .source_target("feature/b", "main")
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

    // WHEN feature B is validated
    let mut intent = store.get_intent("org/repo:pr-2").await.unwrap().unwrap();
    let outcome = validate_intent(&store, &scm, &checks, &NoopRunner, &[], &mut intent, None, &validation)
        .await
        .unwrap();

    // THEN it is blocked with a conflict reason and never reaches VALIDATED
    match outcome {
        ValidationOutcome::Blocked { reason, .. } => assert!(reason.to_lowercase().contains("conflict")),
        other => panic!("expected Blocked, got {other:?}"),
    }
    assert_eq!(intent.status, IntentStatus::Ready);
}

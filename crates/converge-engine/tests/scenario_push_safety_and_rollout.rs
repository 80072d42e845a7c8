use converge_engine::queue::apply_push_reset;
use converge_policy::{evaluate_risk_gate, rollout_bucket, GateMode, RiskGateConfig, RiskGateInputs};
use converge_schemas::IntentStatus;
use converge_store::IntentStore;
use converge_testkit::{InMemoryStore, IntentBuilder};

#[tokio::test]
async fn scenario_push_on_another_repo_leaves_intent_untouched() {
    // GIVEN an intent for org/repo-B on feature/shared
    let store = InMemoryStore::new();
    let intent = IntentBuilder::new("org/repo-B:pr-9")
        .status(IntentStatus::Ready)
        .source_target("feature/shared", "main")
        .technical(serde_json::json!({ "repo": "org/repo-B" }))
        .build();
    store.upsert_intent(&intent).await.unwrap();

    // WHEN a push lands on org/repo-A's feature/shared branch
    let reset_count = apply_push_reset(&store, "org/repo-A", "feature/shared", "deadbeef").await.unwrap();

    // THEN nothing in repo-B was reset
    assert_eq!(reset_count, 0);
    let reloaded = store.get_intent("org/repo-B:pr-9").await.unwrap().unwrap();
    assert_eq!(reloaded.status, IntentStatus::Ready);
    assert_eq!(reloaded.retries, 0);
}

#[tokio::test]
async fn scenario_push_on_matching_repo_resets_to_ready() {
    // GIVEN a VALIDATED intent for org/repo-A on feature/shared
    let store = InMemoryStore::new();
    let mut intent = IntentBuilder::new("org/repo-A:pr-10")
        .status(IntentStatus::Validated)
        .source_target("feature/shared", "main")
        .technical(serde_json::json!({ "repo": "org/repo-A" }))
        .build();
    intent.retries = 1;
    store.upsert_intent(&intent).await.unwrap();

    // WHEN a push lands on that exact repo/branch
    let reset_count = apply_push_reset(&store, "org/repo-A", "feature/shared", "cafef00d").await.unwrap();

    // THEN it is reset to READY with the new base commit recorded
    assert_eq!(reset_count, 1);
    let reloaded = store.get_intent("org/repo-A:pr-10").await.unwrap().unwrap();
    assert_eq!(reloaded.status, IntentStatus::Ready);
    assert_eq!(
        reloaded.technical.get("initial_base_commit").and_then(|v| v.as_str()),
        Some("cafef00d")
    );
}

#[test]
fn scenario_rollout_bucket_is_deterministic_and_zero_ratio_never_enforces() {
    // GIVEN the same intent id evaluated twice
    let first = rollout_bucket("intent-abc");
    let second = rollout_bucket("intent-abc");
    assert_eq!(first, second);

    // WHEN evaluating the risk gate in enforce mode with a nonzero ratio
    let thresholds = RiskGateConfig {
        risk_score_threshold: 0.0,
        damage_score_threshold: 0.0,
        propagation_score_threshold: 0.0,
    };
    let breaching_inputs = RiskGateInputs {
        intent_id: "intent-abc".to_string(),
        risk_score: 1.0,
        damage_score: 1.0,
        propagation_score: 1.0,
        mode: GateMode::Enforce,
        enforce_ratio: 0.5,
    };
    let result = evaluate_risk_gate(&thresholds, &breaching_inputs);
    assert_eq!(result.rollout_bucket, first);

    // THEN dropping enforce_ratio to 0.0 never enforces regardless of breaches
    let zero_ratio = RiskGateInputs {
        enforce_ratio: 0.0,
        ..breaching_inputs
    };
    let result = evaluate_risk_gate(&thresholds, &zero_ratio);
    assert!(!result.enforced);
}

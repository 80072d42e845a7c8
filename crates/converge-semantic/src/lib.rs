//! Semantic conflict detection between intents: two intents targeting the
//! same branch from different plans, with high embedding similarity, are
//! probably duplicated or colliding work rather than independent changes.
//!
//! Pipeline: generate candidates (same target, different plan, active
//! status, embeddings cosine-close) → score each with a weighted heuristic
//! → emit `semantic.conflict_detected` for anything over threshold.

use std::collections::HashSet;

use anyhow::{Context, Result};
use converge_eventlog::new_trace_id;
use converge_schemas::{EventFilter, Intent, IntentStatus, NewEvent};
use converge_store::Store;
use serde::Serialize;

const ACTIVE_STATUSES: [IntentStatus; 3] = [IntentStatus::Ready, IntentStatus::Validated, IntentStatus::Queued];

/// Deterministic (hash-based) embedding providers only land near 1.0 for
/// near-exact duplicate text and near 0.0 otherwise, so they need a much
/// higher bar than an ML-based provider scoring related-but-reworded intents.
const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.70;
const DEFAULT_CONFLICT_THRESHOLD: f64 = 0.60;
const DETERMINISTIC_SIMILARITY_THRESHOLD: f64 = 0.95;
const DETERMINISTIC_CONFLICT_THRESHOLD: f64 = 0.80;

fn is_deterministic_model(model: &str) -> bool {
    model.starts_with("deterministic")
}

fn effective_similarity_threshold(model: &str, explicit: Option<f64>) -> f64 {
    explicit.unwrap_or(if is_deterministic_model(model) {
        DETERMINISTIC_SIMILARITY_THRESHOLD
    } else {
        DEFAULT_SIMILARITY_THRESHOLD
    })
}

fn effective_conflict_threshold(model: &str, explicit: Option<f64>) -> f64 {
    explicit.unwrap_or(if is_deterministic_model(model) {
        DETERMINISTIC_CONFLICT_THRESHOLD
    } else {
        DEFAULT_CONFLICT_THRESHOLD
    })
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn scope_hints(intent: &Intent) -> HashSet<String> {
    intent
        .technical
        .get("scope_hint")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).map(str::to_string).collect())
        .unwrap_or_default()
}

fn scope_overlap(a: &Intent, b: &Intent) -> f64 {
    let scope_a = scope_hints(a);
    let scope_b = scope_hints(b);
    let union: HashSet<&String> = scope_a.union(&scope_b).collect();
    if union.is_empty() {
        return 0.0;
    }
    let intersection = scope_a.intersection(&scope_b).count();
    intersection as f64 / union.len() as f64
}

fn target_overlap(a: &Intent, b: &Intent) -> f64 {
    if a.target == b.target {
        1.0
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConflictCandidate {
    pub intent_a: String,
    pub intent_b: String,
    pub similarity: f64,
    pub target: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConflictScore {
    pub intent_a: String,
    pub intent_b: String,
    pub score: f64,
    pub similarity: f64,
    pub target_overlap: f64,
    pub scope_overlap: f64,
    pub target: String,
    pub plan_a: Option<String>,
    pub plan_b: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConflictReport {
    pub conflicts: Vec<ConflictScore>,
    pub candidates_checked: usize,
    pub mode: ScanMode,
    pub threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Detect and record conflicts without blocking anything.
    Shadow,
    /// Detect, record, and make the conflict actionable (e.g. gate the queue).
    Enforce,
}

pub struct ScoreWeights {
    pub similarity: f64,
    pub target: f64,
    pub scope: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        ScoreWeights {
            similarity: 0.6,
            target: 0.2,
            scope: 0.2,
        }
    }
}

/// Loads active intents (READY/VALIDATED/QUEUED), optionally narrowed to a
/// target branch, and pairs up same-target intents from different plans
/// whose embeddings are cosine-close. Intents sharing a `plan_id` are
/// skipped: intra-plan coherence is the plan generator's responsibility,
/// not this detector's.
pub async fn generate_candidates<S: Store>(
    store: &S,
    tenant_id: Option<&str>,
    target: Option<&str>,
    model: &str,
    similarity_threshold: Option<f64>,
) -> Result<Vec<ConflictCandidate>> {
    let threshold = effective_similarity_threshold(model, similarity_threshold);

    let mut intents = Vec::new();
    for status in ACTIVE_STATUSES {
        intents.extend(store.list_by_status(status, tenant_id).await?);
    }
    if let Some(target) = target {
        intents.retain(|i| i.target == target);
    }
    if intents.len() < 2 {
        return Ok(Vec::new());
    }

    let mut by_target: std::collections::HashMap<&str, Vec<&Intent>> = std::collections::HashMap::new();
    for intent in &intents {
        by_target.entry(intent.target.as_str()).or_default().push(intent);
    }

    let mut candidates = Vec::new();
    let mut seen = HashSet::new();

    for (target, group) in by_target {
        for i in 0..group.len() {
            for j in (i + 1)..group.len() {
                let (a, b) = (group[i], group[j]);
                if let (Some(pa), Some(pb)) = (&a.plan_id, &b.plan_id) {
                    if pa == pb {
                        continue;
                    }
                }
                let pair = if a.id <= b.id { (a.id.clone(), b.id.clone()) } else { (b.id.clone(), a.id.clone()) };
                if !seen.insert(pair) {
                    continue;
                }

                let va = store.get_embedding(&a.id, model).await?;
                let vb = store.get_embedding(&b.id, model).await?;
                let (Some(va), Some(vb)) = (va, vb) else {
                    tracing::warn!(intent_a = %a.id, intent_b = %b.id, "missing embedding, skipping conflict check");
                    continue;
                };

                let similarity = cosine_similarity(&va.vector, &vb.vector);
                if similarity >= threshold {
                    candidates.push(ConflictCandidate {
                        intent_a: a.id.clone(),
                        intent_b: b.id.clone(),
                        similarity,
                        target: target.to_string(),
                    });
                }
            }
        }
    }

    candidates.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
    Ok(candidates)
}

/// Weighted composite of embedding similarity (60%), target overlap (20%),
/// and scope-hint overlap (20%) by default.
pub fn score_conflict(candidate: &ConflictCandidate, intent_a: &Intent, intent_b: &Intent, weights: &ScoreWeights) -> ConflictScore {
    let target_ov = target_overlap(intent_a, intent_b);
    let scope_ov = scope_overlap(intent_a, intent_b);
    let score = weights.similarity * candidate.similarity + weights.target * target_ov + weights.scope * scope_ov;

    ConflictScore {
        intent_a: candidate.intent_a.clone(),
        intent_b: candidate.intent_b.clone(),
        score,
        similarity: candidate.similarity,
        target_overlap: target_ov,
        scope_overlap: scope_ov,
        target: candidate.target.clone(),
        plan_a: intent_a.plan_id.clone(),
        plan_b: intent_b.plan_id.clone(),
    }
}

/// Runs the full scan: generate candidates, score each, and append
/// `semantic.conflict_detected` for everything that clears the conflict
/// threshold. `mode` only travels in the event payload — neither mode
/// blocks anything here; a caller wanting enforce-mode gating reads the
/// mode back off the emitted events.
pub async fn scan_conflicts<S: Store>(
    store: &S,
    tenant_id: Option<&str>,
    target: Option<&str>,
    model: &str,
    similarity_threshold: Option<f64>,
    conflict_threshold: Option<f64>,
    mode: ScanMode,
) -> Result<ConflictReport> {
    let threshold = effective_conflict_threshold(model, conflict_threshold);
    let candidates = generate_candidates(store, tenant_id, target, model, similarity_threshold).await?;

    let mut conflicts = Vec::new();
    for candidate in &candidates {
        let intent_a = store.get_intent(&candidate.intent_a).await?;
        let intent_b = store.get_intent(&candidate.intent_b).await?;
        let (Some(intent_a), Some(intent_b)) = (intent_a, intent_b) else {
            continue;
        };

        let scored = score_conflict(candidate, &intent_a, &intent_b, &ScoreWeights::default());
        if scored.score >= threshold {
            let payload = serde_json::json!({
                "intent_a": scored.intent_a,
                "intent_b": scored.intent_b,
                "score": scored.score,
                "similarity": scored.similarity,
                "target_overlap": scored.target_overlap,
                "scope_overlap": scored.scope_overlap,
                "target": scored.target,
                "mode": mode,
            });
            let evidence = serde_json::json!({
                "plan_a": scored.plan_a,
                "plan_b": scored.plan_b,
                "conflict_threshold": threshold,
            });
            store
                .append(NewEvent {
                    id: None,
                    trace_id: Some(new_trace_id()),
                    event_type: "semantic.conflict_detected".to_string(),
                    intent_id: Some(scored.intent_a.clone()),
                    agent_id: None,
                    tenant_id: tenant_id.map(str::to_string),
                    payload,
                    evidence,
                })
                .await
                .context("failed to append semantic.conflict_detected")?;
            conflicts.push(scored);
        }
    }

    Ok(ConflictReport {
        conflicts,
        candidates_checked: candidates.len(),
        mode,
        threshold,
    })
}

/// Marks a detected conflict pair as resolved.
pub async fn resolve_conflict<S: Store>(
    store: &S,
    intent_a: &str,
    intent_b: &str,
    resolution: &str,
    resolved_by: &str,
    tenant_id: Option<&str>,
) -> Result<()> {
    store
        .append(NewEvent {
            id: None,
            trace_id: Some(new_trace_id()),
            event_type: "semantic.conflict_resolved".to_string(),
            intent_id: Some(intent_a.to_string()),
            agent_id: None,
            tenant_id: tenant_id.map(str::to_string),
            payload: serde_json::json!({
                "intent_a": intent_a,
                "intent_b": intent_b,
                "resolution": resolution,
                "resolved_by": resolved_by,
            }),
            evidence: serde_json::json!({}),
        })
        .await
        .context("failed to append semantic.conflict_resolved")?;
    Ok(())
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Lists detected conflicts that have no matching resolved event yet.
pub async fn list_conflicts<S: Store>(store: &S, tenant_id: Option<&str>, limit: u32) -> Result<Vec<serde_json::Value>> {
    let detected = store
        .query(&EventFilter {
            event_type: Some("semantic.conflict_detected".to_string()),
            tenant_id: tenant_id.map(str::to_string),
            limit: Some(limit),
            ..Default::default()
        })
        .await?;
    let resolved = store
        .query(&EventFilter {
            event_type: Some("semantic.conflict_resolved".to_string()),
            tenant_id: tenant_id.map(str::to_string),
            limit: Some(limit * 2),
            ..Default::default()
        })
        .await?;

    let resolved_pairs: HashSet<(String, String)> = resolved
        .iter()
        .filter_map(|e| {
            let a = e.payload.get("intent_a")?.as_str()?;
            let b = e.payload.get("intent_b")?.as_str()?;
            Some(pair_key(a, b))
        })
        .collect();

    Ok(detected
        .into_iter()
        .filter(|e| {
            let Some(a) = e.payload.get("intent_a").and_then(|v| v.as_str()) else {
                return true;
            };
            let Some(b) = e.payload.get("intent_b").and_then(|v| v.as_str()) else {
                return true;
            };
            !resolved_pairs.contains(&pair_key(a, b))
        })
        .map(|e| e.payload)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use converge_schemas::{EmbeddingRecord, OriginType, RiskLevel};
    use converge_store::{EmbeddingStore, EventStore, IntentStore};
    use converge_testkit::InMemoryStore;

    fn make_intent(id: &str, target: &str, plan_id: Option<&str>, scope: &[&str]) -> Intent {
        Intent {
            id: id.to_string(),
            source: "main".to_string(),
            target: target.to_string(),
            status: IntentStatus::Ready,
            created_at: Utc::now(),
            created_by: "agent".to_string(),
            risk_level: RiskLevel::Low,
            priority: 5,
            semantic: serde_json::json!({}),
            technical: serde_json::json!({ "scope_hint": scope }),
            checks_required: Vec::new(),
            dependencies: Vec::new(),
            retries: 0,
            tenant_id: None,
            plan_id: plan_id.map(str::to_string),
            origin_type: OriginType::Agent,
            updated_at: Utc::now(),
        }
    }

    fn make_embedding(intent_id: &str, vector: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            intent_id: intent_id.to_string(),
            model: "deterministic-v1".to_string(),
            dimension: vector.len() as u32,
            checksum: "test".to_string(),
            vector,
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_similarity_orthogonal_vectors_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn scope_overlap_jaccard() {
        let a = make_intent("a", "main", None, &["auth", "billing"]);
        let b = make_intent("b", "main", None, &["billing", "search"]);
        assert!((scope_overlap(&a, &b) - (1.0 / 3.0)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn same_plan_pairs_are_excluded_from_candidates() {
        let store = InMemoryStore::new();
        let a = make_intent("a", "main", Some("plan-1"), &[]);
        let b = make_intent("b", "main", Some("plan-1"), &[]);
        store.upsert_intent(&a).await.unwrap();
        store.upsert_intent(&b).await.unwrap();
        store.upsert_embedding(&make_embedding("a", vec![1.0, 0.0])).await.unwrap();
        store.upsert_embedding(&make_embedding("b", vec![1.0, 0.0])).await.unwrap();

        let candidates = generate_candidates(&store, None, None, "deterministic-v1", None).await.unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn different_plans_high_similarity_yields_candidate() {
        let store = InMemoryStore::new();
        let a = make_intent("a", "main", Some("plan-1"), &["auth"]);
        let b = make_intent("b", "main", Some("plan-2"), &["auth"]);
        store.upsert_intent(&a).await.unwrap();
        store.upsert_intent(&b).await.unwrap();
        store.upsert_embedding(&make_embedding("a", vec![1.0, 0.0])).await.unwrap();
        store.upsert_embedding(&make_embedding("b", vec![1.0, 0.0])).await.unwrap();

        let candidates = generate_candidates(&store, None, None, "deterministic-v1", None).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert!((candidates[0].similarity - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn scan_conflicts_emits_detected_event_above_threshold() {
        let store = InMemoryStore::new();
        let a = make_intent("a", "main", Some("plan-1"), &["auth"]);
        let b = make_intent("b", "main", Some("plan-2"), &["auth"]);
        store.upsert_intent(&a).await.unwrap();
        store.upsert_intent(&b).await.unwrap();
        store.upsert_embedding(&make_embedding("a", vec![1.0, 0.0])).await.unwrap();
        store.upsert_embedding(&make_embedding("b", vec![1.0, 0.0])).await.unwrap();

        let report = scan_conflicts(&store, None, None, "deterministic-v1", None, None, ScanMode::Shadow)
            .await
            .unwrap();
        assert_eq!(report.conflicts.len(), 1);

        let events = store.query(&Default::default()).await.unwrap();
        assert!(events.iter().any(|e| e.event_type == "semantic.conflict_detected"));
    }

    #[tokio::test]
    async fn resolved_conflict_is_excluded_from_list() {
        let store = InMemoryStore::new();
        let a = make_intent("a", "main", Some("plan-1"), &["auth"]);
        let b = make_intent("b", "main", Some("plan-2"), &["auth"]);
        store.upsert_intent(&a).await.unwrap();
        store.upsert_intent(&b).await.unwrap();
        store.upsert_embedding(&make_embedding("a", vec![1.0, 0.0])).await.unwrap();
        store.upsert_embedding(&make_embedding("b", vec![1.0, 0.0])).await.unwrap();

        scan_conflicts(&store, None, None, "deterministic-v1", None, None, ScanMode::Shadow)
            .await
            .unwrap();
        let before = list_conflicts(&store, None, 50).await.unwrap();
        assert_eq!(before.len(), 1);

        resolve_conflict(&store, "a", "b", "acknowledged", "system", None).await.unwrap();
        let after = list_conflicts(&store, None, 50).await.unwrap();
        assert!(after.is_empty());
    }
}

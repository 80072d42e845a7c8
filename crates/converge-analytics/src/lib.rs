//! Git-log archaeology, calibration re-export, and decision-dataset
//! export — the three features `spec.md`'s Analytics row names without
//! fully specifying; the calculations here are kept deliberately simple
//! and deterministic, matching the signal-counting idiom the risk engine
//! itself uses.

use std::collections::HashMap;

use converge_scm::CommitLogEntry;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Hotspot {
    pub file: String,
    pub change_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct CouplingPair {
    pub file_a: String,
    pub file_b: String,
    pub co_changes: u32,
}

/// File change-frequency counts over `entries`, descending.
pub fn hotspots(entries: &[CommitLogEntry]) -> Vec<Hotspot> {
    let mut counts: HashMap<String, u32> = HashMap::new();
    for e in entries {
        for f in &e.files {
            *counts.entry(f.clone()).or_insert(0) += 1;
        }
    }
    let mut out: Vec<Hotspot> = counts
        .into_iter()
        .map(|(file, change_count)| Hotspot { file, change_count })
        .collect();
    out.sort_by(|a, b| b.change_count.cmp(&a.change_count).then(a.file.cmp(&b.file)));
    out
}

/// File pairs that changed together in the same commit, descending by
/// co-occurrence count — feeds `converge-risk`'s `co_change` edges.
pub fn coupling_pairs(entries: &[CommitLogEntry]) -> Vec<CouplingPair> {
    let mut counts: HashMap<(String, String), u32> = HashMap::new();
    for e in entries {
        let mut files = e.files.clone();
        files.sort();
        files.dedup();
        for i in 0..files.len() {
            for j in (i + 1)..files.len() {
                *counts.entry((files[i].clone(), files[j].clone())).or_insert(0) += 1;
            }
        }
    }
    let mut out: Vec<CouplingPair> = counts
        .into_iter()
        .map(|((file_a, file_b), co_changes)| CouplingPair { file_a, file_b, co_changes })
        .collect();
    out.sort_by(|a, b| b.co_changes.cmp(&a.co_changes));
    out
}

pub use converge_policy::calibrate_entropy_budgets;

/// One flattened row of the decision dataset: an intent's terminal
/// outcome alongside the risk/policy signals that led there.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionRecord {
    pub intent_id: String,
    pub outcome: String,
    pub risk_score: Option<f64>,
    pub damage_score: Option<f64>,
    pub propagation_score: Option<f64>,
    pub policy_allow: Option<bool>,
    pub blocked_gates: Vec<String>,
}

pub fn build_decision_record(
    intent_id: &str,
    outcome: &str,
    risk: Option<&converge_risk::RiskEval>,
    policy: Option<&converge_policy::PolicyVerdict>,
) -> DecisionRecord {
    DecisionRecord {
        intent_id: intent_id.to_string(),
        outcome: outcome.to_string(),
        risk_score: risk.map(|r| r.risk_score),
        damage_score: risk.map(|r| r.damage_score),
        propagation_score: risk.map(|r| r.propagation_score),
        policy_allow: policy.map(|p| p.allow),
        blocked_gates: policy.map(|p| p.blocked_gates.clone()).unwrap_or_default(),
    }
}

/// Newline-delimited JSON, one `DecisionRecord` per line.
pub fn export_jsonl(records: &[DecisionRecord]) -> String {
    records
        .iter()
        .map(|r| serde_json::to_string(r).expect("DecisionRecord serialization cannot fail"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(sha: &str, files: &[&str]) -> CommitLogEntry {
        CommitLogEntry {
            sha: sha.to_string(),
            author: "tester".to_string(),
            files: files.iter().map(|s| s.to_string()).collect(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn hotspots_counts_descending() {
        let entries = vec![
            entry("a", &["src/x.rs"]),
            entry("b", &["src/x.rs", "src/y.rs"]),
        ];
        let hs = hotspots(&entries);
        assert_eq!(hs[0].file, "src/x.rs");
        assert_eq!(hs[0].change_count, 2);
    }

    #[test]
    fn coupling_pairs_counts_co_occurrence() {
        let entries = vec![entry("a", &["src/x.rs", "src/y.rs"]), entry("b", &["src/x.rs", "src/y.rs"])];
        let pairs = coupling_pairs(&entries);
        assert_eq!(pairs[0].co_changes, 2);
    }

    #[test]
    fn export_jsonl_one_line_per_record() {
        let records = vec![
            build_decision_record("i1", "merged", None, None),
            build_decision_record("i2", "rejected", None, None),
        ];
        let out = export_jsonl(&records);
        assert_eq!(out.lines().count(), 2);
    }
}

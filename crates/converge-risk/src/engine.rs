//! The four independent signals, composite scoring, qualitative findings,
//! and bomb detection. Everything here is a pure function of
//! `(Intent, Simulation, coupling data)` — no wall-clock, no randomness.

use converge_schemas::{Intent, RiskLevel};
use converge_scm::Simulation;
use serde::Serialize;

use crate::graph::{build_graph, is_core_branch, is_core_path, CoChange, NodeKind, RiskGraph};

fn clamp100(x: f64) -> f64 {
    x.clamp(0.0, 100.0)
}

#[derive(Debug, Clone, Serialize)]
pub struct Signals {
    pub entropic_load: f64,
    pub contextual_value: f64,
    pub complexity_delta: f64,
    pub path_dependence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingSeverity {
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub severity: FindingSeverity,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BombKind {
    Cascade,
    Spiral,
    ThermalDeath,
}

#[derive(Debug, Clone, Serialize)]
pub struct Bomb {
    pub kind: BombKind,
    pub severity: &'static str,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskEval {
    pub signals: Signals,
    pub risk_score: f64,
    pub entropy_score: f64,
    pub damage_score: f64,
    pub propagation_score: f64,
    pub containment_score: f64,
    pub findings: Vec<Finding>,
    pub bombs: Vec<Bomb>,
    pub node_count: usize,
    pub edge_count: usize,
    pub component_count: usize,
}

/// Signal 1: disorder introduced by the change.
fn entropic_load(intent: &Intent, simulation: &Simulation, g: &RiskGraph) -> f64 {
    let files = simulation.files_changed.len() as f64;
    let conflicts = simulation.conflicts.len() as f64;
    let deps = intent.dependencies.len() as f64;
    let unique_directories = simulation
        .files_changed
        .iter()
        .map(|f| f.rsplit_once('/').map(|(d, _)| d.to_string()).unwrap_or_default())
        .collect::<std::collections::HashSet<_>>()
        .len() as f64;
    let components = g.component_count() as f64;

    clamp100(2.0 * files + 15.0 * conflicts + 6.0 * deps + 3.0 * unique_directories + 5.0 * (components - 1.0).max(0.0))
}

/// Signal 2: importance of touched code, via weighted PageRank.
fn contextual_value(intent: &Intent, simulation: &Simulation, g: &RiskGraph) -> f64 {
    let v = g.node_count();
    if v == 0 {
        return 0.0;
    }

    let pr = g.pagerank(0.85, 40);
    let file_nodes = g.file_nodes();
    let changed: std::collections::HashSet<&String> = simulation.files_changed.iter().collect();

    let sum_pr_changed: f64 = file_nodes
        .iter()
        .filter(|idx| changed.contains(&g.graph[**idx].label))
        .map(|idx| pr.get(idx).copied().unwrap_or(0.0))
        .sum();

    // Share of PageRank mass the changed files hold, relative to the
    // "fair share" they'd hold if importance were uniform across nodes.
    let uniform_share = simulation.files_changed.len() as f64 / v as f64;
    let importance_ratio = if uniform_share > 0.0 {
        sum_pr_changed / uniform_share
    } else {
        0.0
    };
    let base = (importance_ratio * 10.0).min(60.0);

    let core_touches = simulation
        .files_changed
        .iter()
        .filter(|f| is_core_path(f))
        .count() as f64;
    let core_path_ratio = if simulation.files_changed.is_empty() {
        0.0
    } else {
        core_touches / simulation.files_changed.len() as f64
    };

    let branch_bonus = if is_core_branch(&intent.target) { 10.0 } else { 0.0 };
    let risk_bonus = match intent.risk_level {
        RiskLevel::Low => 0.0,
        RiskLevel::Medium => 5.0,
        RiskLevel::High => 15.0,
        RiskLevel::Critical => 30.0,
    };

    clamp100(base + 20.0 * core_path_ratio + branch_bonus + risk_bonus)
}

/// Signal 3: structural complexity added to the graph.
fn complexity_delta(g: &RiskGraph) -> f64 {
    let v = g.node_count() as f64;
    let e = g.edge_count() as f64;

    let graph_density = if v > 1.0 { e / (v * (v - 1.0)) } else { 0.0 };
    let edge_node_ratio = if v > 0.0 { e / v } else { 0.0 };

    let cross_directory_edges = g
        .graph
        .edge_indices()
        .filter(|ei| {
            let (a, b) = g.graph.edge_endpoints(*ei).unwrap();
            match (g.graph[a].kind, g.graph[b].kind) {
                (NodeKind::File, NodeKind::File) => {
                    let da = g.graph[a].label.rsplit_once('/').map(|(d, _)| d);
                    let db = g.graph[b].label.rsplit_once('/').map(|(d, _)| d);
                    da != db
                }
                _ => false,
            }
        })
        .count() as f64;

    let scope_count = g.scope_node_count() as f64;

    clamp100(40.0 * graph_density + (10.0 * edge_node_ratio).min(30.0) + 3.0 * cross_directory_edges + 5.0 * scope_count)
}

/// Signal 4: sensitivity to merge order.
fn path_dependence(intent: &Intent, simulation: &Simulation, g: &RiskGraph) -> f64 {
    let conflicts = simulation.conflicts.len() as f64;
    let core_touches = simulation
        .files_changed
        .iter()
        .filter(|f| is_core_path(f))
        .count() as f64;
    let deps = intent.dependencies.len() as f64;

    let cycles = g.bounded_simple_cycles(20);
    let cycle_count = cycles.len() as f64;

    let longest_path_term = match g.longest_path_len() {
        Some(len) => 2.0 * len as f64,
        None => 0.0,
    };

    clamp100(20.0 * conflicts + 4.0 * core_touches + 8.0 * deps + 5.0 * cycle_count + longest_path_term)
}

fn findings(intent: &Intent, simulation: &Simulation) -> Vec<Finding> {
    let mut out = Vec::new();

    if simulation.files_changed.len() > 15 {
        out.push(Finding {
            severity: FindingSeverity::High,
            message: format!("large change: {} files touched", simulation.files_changed.len()),
        });
    }
    if intent.dependencies.len() > 3 {
        out.push(Finding {
            severity: FindingSeverity::Medium,
            message: format!("{} dependencies must merge first", intent.dependencies.len()),
        });
    }
    if is_core_branch(&intent.target) {
        out.push(Finding {
            severity: FindingSeverity::High,
            message: format!("target branch '{}' is a core branch", intent.target),
        });
    }
    if !simulation.conflicts.is_empty() {
        out.push(Finding {
            severity: FindingSeverity::Critical,
            message: format!("{} conflicting file(s) detected", simulation.conflicts.len()),
        });
    }

    out
}

fn detect_cascade(simulation: &Simulation, g: &RiskGraph, pr: &std::collections::HashMap<petgraph::graph::NodeIndex, f64>) -> Option<Bomb> {
    let v = g.node_count();
    if v == 0 {
        return None;
    }
    let threshold = 1.5 / v as f64;
    let changed: std::collections::HashSet<&String> = simulation.files_changed.iter().collect();

    let hot_files: Vec<_> = g
        .file_nodes()
        .into_iter()
        .filter(|idx| changed.contains(&g.graph[*idx].label))
        .filter(|idx| pr.get(idx).copied().unwrap_or(0.0) > threshold)
        .filter(|idx| g.graph.neighbors(*idx).count() >= 3)
        .collect();

    if hot_files.is_empty() {
        return None;
    }

    let mut descendants = std::collections::HashSet::new();
    for idx in &hot_files {
        descendants.extend(g.descendants(*idx));
    }

    if descendants.len() as f64 > 1.5 * simulation.files_changed.len() as f64 {
        Some(Bomb {
            kind: BombKind::Cascade,
            severity: "high",
            details: serde_json::json!({
                "hot_files": hot_files.len(),
                "descendant_count": descendants.len(),
            }),
        })
    } else {
        None
    }
}

fn detect_spiral(g: &RiskGraph) -> Option<Bomb> {
    if g.is_dag() {
        return None;
    }
    let cycles = g.bounded_simple_cycles(10);
    if cycles.len() >= 2 {
        Some(Bomb {
            kind: BombKind::Spiral,
            severity: "high",
            details: serde_json::json!({ "cycle_count": cycles.len() }),
        })
    } else {
        None
    }
}

fn detect_thermal_death(intent: &Intent, simulation: &Simulation, g: &RiskGraph) -> Option<Bomb> {
    let indicators = [
        simulation.files_changed.len() > 10,
        !simulation.conflicts.is_empty(),
        intent.dependencies.len() > 3,
        g.component_count() > 3,
        g.edge_count() > 2 * g.node_count(),
    ];
    let tally = indicators.iter().filter(|i| **i).count();

    if tally >= 3 {
        Some(Bomb {
            kind: BombKind::ThermalDeath,
            severity: "critical",
            details: serde_json::json!({ "indicators_true": tally }),
        })
    } else {
        None
    }
}

/// A pure, deterministic evaluation: same inputs, bit-identical output.
pub fn evaluate_risk(intent: &Intent, simulation: &Simulation, coupling: &[CoChange]) -> RiskEval {
    let g = build_graph(intent, simulation, coupling);

    let signals = Signals {
        entropic_load: entropic_load(intent, simulation, &g),
        contextual_value: contextual_value(intent, simulation, &g),
        complexity_delta: complexity_delta(&g),
        path_dependence: path_dependence(intent, simulation, &g),
    };

    let risk_score = 0.30 * signals.entropic_load
        + 0.25 * signals.contextual_value
        + 0.20 * signals.complexity_delta
        + 0.25 * signals.path_dependence;
    let entropy_score = signals.entropic_load;
    let damage_score = 0.5 * signals.contextual_value + 0.3 * signals.entropic_load + 0.2 * signals.path_dependence;

    let file_nodes = g.file_nodes();
    let avg_out_degree = if file_nodes.is_empty() {
        0.0
    } else {
        file_nodes
            .iter()
            .map(|idx| g.graph.neighbors(*idx).count() as f64)
            .sum::<f64>()
            / file_nodes.len() as f64
    };
    let graph_component = (10.0 * avg_out_degree).min(50.0);

    let sum_weights: f64 = g.graph.edge_weights().sum();
    let unique_targets = g
        .graph
        .edge_indices()
        .map(|ei| g.graph.edge_endpoints(ei).unwrap().1)
        .collect::<std::collections::HashSet<_>>()
        .len() as f64;
    let edge_component = (3.0 * sum_weights + 2.0 * unique_targets).min(50.0);
    let propagation_score = (graph_component + edge_component).min(100.0);

    let mut crossings: std::collections::HashSet<String> = std::collections::HashSet::new();
    for ei in g.graph.edge_indices() {
        let (_, target) = g.graph.edge_endpoints(ei).unwrap();
        crossings.insert(format!("{:?}:{}", g.graph[target].kind, g.graph[target].label));
    }
    for dep in &intent.dependencies {
        crossings.insert(format!("dep:{dep}"));
    }
    if let Some(scope) = intent.scope_hint() {
        crossings.insert(format!("scope:{scope}"));
    }
    let containment_score = if crossings.is_empty() {
        1.0
    } else {
        (1.0 - 0.05 * crossings.len() as f64 - 0.03 * (g.component_count() as f64 - 1.0).max(0.0)).max(0.0)
    };

    let pr = g.pagerank(0.85, 40);
    let mut bombs = Vec::new();
    bombs.extend(detect_cascade(simulation, &g, &pr));
    bombs.extend(detect_spiral(&g));
    bombs.extend(detect_thermal_death(intent, simulation, &g));

    RiskEval {
        signals,
        risk_score: clamp100(risk_score),
        entropy_score: clamp100(entropy_score),
        damage_score: clamp100(damage_score),
        propagation_score,
        containment_score,
        findings: findings(intent, simulation),
        bombs,
        node_count: g.node_count(),
        edge_count: g.edge_count(),
        component_count: g.component_count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_schemas::{IntentStatus, OriginType};
    use chrono::Utc;

    fn sample_intent(deps: Vec<&str>, target: &str, scope: Option<&str>) -> Intent {
        Intent {
            id: "org/repo:pr-1".to_string(),
            source: "feature/x".to_string(),
            target: target.to_string(),
            status: IntentStatus::Ready,
            created_at: Utc::now(),
            created_by: "tester".to_string(),
            risk_level: RiskLevel::Medium,
            priority: 10,
            semantic: serde_json::json!({}),
            technical: scope
                .map(|s| serde_json::json!({"scope_hint": s}))
                .unwrap_or(serde_json::json!({})),
            checks_required: vec![],
            dependencies: deps.into_iter().map(str::to_string).collect(),
            retries: 0,
            tenant_id: None,
            plan_id: None,
            origin_type: OriginType::Human,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn containment_is_exactly_one_with_no_crossings() {
        let intent = sample_intent(vec![], "feature/y", None);
        let sim = Simulation {
            mergeable: true,
            conflicts: vec![],
            files_changed: vec![],
        };
        let eval = evaluate_risk(&intent, &sim, &[]);
        assert_eq!(eval.containment_score, 1.0);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let intent = sample_intent(vec!["org/repo:pr-0"], "main", Some("auth"));
        let sim = Simulation {
            mergeable: true,
            conflicts: vec![],
            files_changed: vec!["src/auth/login.rs".to_string(), "src/auth/mod.rs".to_string()],
        };
        let e1 = evaluate_risk(&intent, &sim, &[]);
        let e2 = evaluate_risk(&intent, &sim, &[]);
        assert_eq!(e1.risk_score, e2.risk_score);
        assert_eq!(e1.containment_score, e2.containment_score);
    }

    #[test]
    fn conflicts_trigger_critical_finding() {
        let intent = sample_intent(vec![], "main", None);
        let sim = Simulation {
            mergeable: false,
            conflicts: vec!["src/shared.rs".to_string()],
            files_changed: vec!["src/shared.rs".to_string()],
        };
        let eval = evaluate_risk(&intent, &sim, &[]);
        assert!(eval
            .findings
            .iter()
            .any(|f| f.severity == FindingSeverity::Critical));
    }

    #[test]
    fn thermal_death_fires_when_three_indicators_true() {
        let intent = sample_intent(vec!["a", "b", "c", "d"], "main", None);
        let many_files: Vec<String> = (0..12).map(|i| format!("d{i}/f{i}.rs")).collect();
        let sim = Simulation {
            mergeable: false,
            conflicts: vec!["d0/f0.rs".to_string()],
            files_changed: many_files,
        };
        let eval = evaluate_risk(&intent, &sim, &[]);
        assert!(eval.bombs.iter().any(|b| b.kind == BombKind::ThermalDeath));
    }
}

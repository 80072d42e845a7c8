//! Dependency graph construction and the graph-theoretic primitives
//! (PageRank, density, bounded cycle enumeration) the signal engine needs.
//! No wall-clock or random input anywhere in this module — determinism is
//! load-bearing for the risk engine's output contract.

use std::collections::{BTreeSet, HashMap, HashSet};

use converge_schemas::Intent;
use converge_scm::Simulation;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    File,
    Directory,
    Scope,
    Intent,
    Branch,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub label: String,
}

/// A named pair of files observed to change together historically.
#[derive(Debug, Clone)]
pub struct CoChange {
    pub file_a: String,
    pub file_b: String,
    pub co_changes: u32,
}

pub struct RiskGraph {
    pub graph: DiGraph<Node, f64>,
    pub index_of: HashMap<String, NodeIndex>,
}

fn node_key(kind: NodeKind, label: &str) -> String {
    format!("{kind:?}:{label}")
}

fn parent_dir(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => String::new(),
    }
}

impl RiskGraph {
    fn new() -> Self {
        RiskGraph {
            graph: DiGraph::new(),
            index_of: HashMap::new(),
        }
    }

    fn get_or_insert(&mut self, kind: NodeKind, label: &str) -> NodeIndex {
        let key = node_key(kind, label);
        if let Some(idx) = self.index_of.get(&key) {
            return *idx;
        }
        let idx = self.graph.add_node(Node {
            kind,
            label: label.to_string(),
        });
        self.index_of.insert(key, idx);
        idx
    }

    fn add_edge(&mut self, from: NodeIndex, to: NodeIndex, weight: f64) {
        self.graph.update_edge(from, to, weight);
    }

    pub fn file_nodes(&self) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|i| matches!(self.graph[*i].kind, NodeKind::File))
            .collect()
    }

    pub fn scope_node_count(&self) -> usize {
        self.graph
            .node_indices()
            .filter(|i| matches!(self.graph[*i].kind, NodeKind::Scope))
            .count()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Weakly-connected component count.
    pub fn component_count(&self) -> usize {
        let mut visited: HashSet<NodeIndex> = HashSet::new();
        let mut components = 0usize;

        for start in self.graph.node_indices() {
            if visited.contains(&start) {
                continue;
            }
            components += 1;
            let mut stack = vec![start];
            while let Some(n) = stack.pop() {
                if !visited.insert(n) {
                    continue;
                }
                for nb in self.graph.neighbors_undirected(n) {
                    if !visited.contains(&nb) {
                        stack.push(nb);
                    }
                }
            }
        }

        components
    }

    pub fn is_dag(&self) -> bool {
        petgraph::algo::is_cyclic_directed(&self.graph).not()
    }

    /// Weighted PageRank via power iteration (damping 0.85), deterministic:
    /// nodes are iterated in index order, not hash order.
    pub fn pagerank(&self, damping: f64, iterations: usize) -> HashMap<NodeIndex, f64> {
        let n = self.graph.node_count();
        if n == 0 {
            return HashMap::new();
        }

        let indices: Vec<NodeIndex> = self.graph.node_indices().collect();
        let mut rank: HashMap<NodeIndex, f64> =
            indices.iter().map(|i| (*i, 1.0 / n as f64)).collect();

        // Precompute outgoing weight sums for weighted redistribution.
        let out_weight_sum: HashMap<NodeIndex, f64> = indices
            .iter()
            .map(|i| {
                let sum: f64 = self
                    .graph
                    .edges_directed(*i, Direction::Outgoing)
                    .map(|e| *e.weight())
                    .sum();
                (*i, sum)
            })
            .collect();

        for _ in 0..iterations {
            let mut next: HashMap<NodeIndex, f64> = indices
                .iter()
                .map(|i| (*i, (1.0 - damping) / n as f64))
                .collect();

            let mut dangling_mass = 0.0;
            for i in &indices {
                let out_sum = out_weight_sum[i];
                if out_sum <= 0.0 {
                    dangling_mass += rank[i];
                    continue;
                }
                for e in self.graph.edges_directed(*i, Direction::Outgoing) {
                    let share = rank[i] * (*e.weight() / out_sum);
                    *next.get_mut(&e.target()).unwrap() += damping * share;
                }
            }

            if dangling_mass > 0.0 {
                let per_node = damping * dangling_mass / n as f64;
                for i in &indices {
                    *next.get_mut(i).unwrap() += per_node;
                }
            }

            rank = next;
        }

        rank
    }

    /// Descendant closure of `start` (excluding `start`).
    pub fn descendants(&self, start: NodeIndex) -> HashSet<NodeIndex> {
        let mut seen = HashSet::new();
        let mut stack = vec![start];
        while let Some(n) = stack.pop() {
            for nb in self.graph.neighbors_directed(n, Direction::Outgoing) {
                if seen.insert(nb) {
                    stack.push(nb);
                }
            }
        }
        seen
    }

    /// Bounded simple-cycle enumeration, Johnson's-algorithm-style: an
    /// external counter stops the search the moment `max_cycles` is hit
    /// rather than materializing the full cycle space up front.
    pub fn bounded_simple_cycles(&self, max_cycles: usize) -> Vec<Vec<NodeIndex>> {
        let mut found = Vec::new();
        if max_cycles == 0 {
            return found;
        }

        let mut indices: Vec<NodeIndex> = self.graph.node_indices().collect();
        indices.sort_by_key(|i| i.index());

        for &start in &indices {
            if found.len() >= max_cycles {
                break;
            }
            let mut path = vec![start];
            let mut on_path: HashSet<NodeIndex> = HashSet::from([start]);
            self.dfs_cycles(start, start, &mut path, &mut on_path, &mut found, max_cycles);
        }

        found
    }

    #[allow(clippy::too_many_arguments)]
    fn dfs_cycles(
        &self,
        start: NodeIndex,
        current: NodeIndex,
        path: &mut Vec<NodeIndex>,
        on_path: &mut HashSet<NodeIndex>,
        found: &mut Vec<Vec<NodeIndex>>,
        max_cycles: usize,
    ) {
        if found.len() >= max_cycles {
            return;
        }
        let mut neighbors: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(current, Direction::Outgoing)
            .collect();
        neighbors.sort_by_key(|i| i.index());

        for nb in neighbors {
            if found.len() >= max_cycles {
                return;
            }
            if nb == start && path.len() >= 2 {
                found.push(path.clone());
                continue;
            }
            // Only allow closing back to the lexicographically-smallest
            // node (`start`) to avoid reporting the same cycle rotated.
            if nb.index() < start.index() || on_path.contains(&nb) {
                continue;
            }
            path.push(nb);
            on_path.insert(nb);
            self.dfs_cycles(start, nb, path, on_path, found, max_cycles);
            path.pop();
            on_path.remove(&nb);
        }
    }

    /// Longest path length in a DAG (edge count), via DP over a topological
    /// order. Undefined (returns `None`) when the graph has a cycle.
    pub fn longest_path_len(&self) -> Option<usize> {
        let order = petgraph::algo::toposort(&self.graph, None).ok()?;
        let mut dist: HashMap<NodeIndex, usize> = HashMap::new();
        for n in order.iter().rev() {
            let best = self
                .graph
                .neighbors_directed(*n, Direction::Outgoing)
                .map(|nb| 1 + dist.get(&nb).copied().unwrap_or(0))
                .max()
                .unwrap_or(0);
            dist.insert(*n, best);
        }
        dist.values().copied().max().or(Some(0))
    }
}

trait BoolNot {
    fn not(self) -> bool;
}
impl BoolNot for bool {
    fn not(self) -> bool {
        !self
    }
}

pub const CORE_PATH_PREFIXES: [&str; 6] = ["src/", "lib/", "core/", "pkg/", "internal/", "app/"];
pub const CORE_BRANCHES: [&str; 5] = ["main", "master", "release", "production", "prod"];

pub fn is_core_path(path: &str) -> bool {
    CORE_PATH_PREFIXES.iter().any(|p| path.starts_with(p))
}

pub fn is_core_branch(branch: &str) -> bool {
    CORE_BRANCHES.contains(&branch)
}

/// Builds the dependency graph for one intent's validation pass.
pub fn build_graph(intent: &Intent, simulation: &Simulation, coupling: &[CoChange]) -> RiskGraph {
    let mut g = RiskGraph::new();

    let mut file_idx: HashMap<String, NodeIndex> = HashMap::new();
    for f in &simulation.files_changed {
        let idx = g.get_or_insert(NodeKind::File, f);
        file_idx.insert(f.clone(), idx);
        let dir = parent_dir(f);
        if !dir.is_empty() {
            let dir_idx = g.get_or_insert(NodeKind::Directory, &dir);
            g.add_edge(idx, dir_idx, 0.3);
        }
    }

    // co_located: bidirectional edges between files sharing a parent directory.
    let mut by_dir: HashMap<String, Vec<String>> = HashMap::new();
    for f in &simulation.files_changed {
        by_dir.entry(parent_dir(f)).or_default().push(f.clone());
    }
    for files in by_dir.values() {
        for i in 0..files.len() {
            for j in (i + 1)..files.len() {
                let a = file_idx[&files[i]];
                let b = file_idx[&files[j]];
                g.add_edge(a, b, 0.2);
                g.add_edge(b, a, 0.2);
            }
        }
    }

    if let Some(scope) = intent.scope_hint() {
        let scope_idx = g.get_or_insert(NodeKind::Scope, scope);
        let scope_lower = scope.to_lowercase();
        for f in &simulation.files_changed {
            let weight = if f.to_lowercase().contains(&scope_lower) {
                0.5
            } else {
                0.2
            };
            g.add_edge(scope_idx, file_idx[f], weight);
        }
    }

    let intent_idx = g.get_or_insert(NodeKind::Intent, &intent.id);
    for dep in &intent.dependencies {
        let dep_idx = g.get_or_insert(NodeKind::Intent, dep);
        g.add_edge(intent_idx, dep_idx, 0.8);
    }
    let target_idx = g.get_or_insert(NodeKind::Branch, &intent.target);
    g.add_edge(intent_idx, target_idx, 1.0);

    let changed: BTreeSet<&String> = simulation.files_changed.iter().collect();
    for cc in coupling {
        if !changed.contains(&cc.file_a) && !changed.contains(&cc.file_b) {
            continue;
        }
        let a = g.get_or_insert(NodeKind::File, &cc.file_a);
        let b = g.get_or_insert(NodeKind::File, &cc.file_b);
        let weight = (cc.co_changes as f64 * 0.1).min(1.0);
        g.add_edge(a, b, weight);
        g.add_edge(b, a, weight);
    }

    g
}

pub mod engine;
pub mod graph;

pub use engine::{evaluate_risk, Bomb, BombKind, Finding, FindingSeverity, RiskEval, Signals};
pub use graph::{build_graph, CoChange, Node, NodeKind, RiskGraph};

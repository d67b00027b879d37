//! Transparency: auditable views of emitted decisions.

pub mod explanation_graph;

pub use explanation_graph::{EdgeKind, ExplanationEdge, ExplanationGraph, ExplanationNode};

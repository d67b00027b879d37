//! Decision policy collaborators: thresholds and the label dependency graph.

pub mod dependency;
pub mod thresholds;

pub use dependency::{DependencyEdge, DependencyGraph, build_dependency_graph};
pub use thresholds::{TableThresholds, Threshold, ThresholdPolicy, ThresholdSource};

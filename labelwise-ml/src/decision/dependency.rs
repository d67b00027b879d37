//! Label dependency graph over the labels a record predicts.
//!
//! Edges come from a configured list of directed co-occurrence priors and are
//! weighted by the mean probability of their endpoints. The emitted graph is
//! always acyclic: while a cycle exists the lowest-weight edge is dropped, with
//! ties broken by `(source, target)`.

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::contract::validate::round_to;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub source: String,
    pub target: String,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyGraph {
    pub nodes: Vec<String>,
    pub edges: Vec<DependencyEdge>,
    pub is_acyclic: bool,
    /// Edges removed to break cycles, in removal order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dropped: Vec<DependencyEdge>,
}

fn has_cycle(nodes: &[String], edges: &[DependencyEdge]) -> bool {
    let mut graph: DiGraph<&str, f64> = DiGraph::new();
    let index: HashMap<&str, NodeIndex> = nodes
        .iter()
        .map(|n| (n.as_str(), graph.add_node(n.as_str())))
        .collect();
    for e in edges {
        if let (Some(&a), Some(&b)) = (index.get(e.source.as_str()), index.get(e.target.as_str())) {
            graph.add_edge(a, b, e.weight);
        }
    }
    is_cyclic_directed(&graph)
}

/// Build the graph for `active` labels given every label's probability.
pub fn build_dependency_graph(
    active: &[String],
    probabilities: &BTreeMap<String, f64>,
    priors: &[(String, String)],
) -> DependencyGraph {
    let mut nodes: Vec<String> = active.to_vec();
    nodes.sort();
    nodes.dedup();

    let p = |label: &str| probabilities.get(label).copied().unwrap_or(0.0);
    let mut edges: Vec<DependencyEdge> = Vec::new();
    for (u, v) in priors {
        let present = nodes.contains(u) && nodes.contains(v) && u != v;
        let duplicate = edges.iter().any(|e| &e.source == u && &e.target == v);
        if present && !duplicate {
            edges.push(DependencyEdge {
                source: u.clone(),
                target: v.clone(),
                weight: round_to((p(u) + p(v)) / 2.0, 4),
            });
        }
    }

    let mut dropped = Vec::new();
    while has_cycle(&nodes, &edges) {
        let Some(weakest) = edges
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.weight
                    .total_cmp(&b.weight)
                    .then_with(|| a.source.cmp(&b.source))
                    .then_with(|| a.target.cmp(&b.target))
            })
            .map(|(i, _)| i)
        else {
            break;
        };
        let edge = edges.remove(weakest);
        debug!(source = %edge.source, target = %edge.target, weight = edge.weight, "dropped edge to break cycle");
        dropped.push(edge);
    }

    DependencyGraph {
        is_acyclic: !has_cycle(&nodes, &edges),
        nodes,
        edges,
        dropped,
    }
}

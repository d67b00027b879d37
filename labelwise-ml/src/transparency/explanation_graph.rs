//! Typed audit graph of one decision record.
//!
//! Rule nodes (calibration, threshold sources) govern label nodes, span nodes
//! support them, and faithfulness nodes verify them.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::contract::schema::DecisionRecord;
use crate::eval::faithfulness::FaithfulnessStatus;

pub const EXPLANATION_GRAPH_VERSION: &str = "explanation_graph_v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExplanationNode {
    Rule {
        id: String,
        method: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<f64>,
    },
    Label {
        id: String,
        name: String,
        calibrated_probability: f64,
        threshold: f64,
        predicted: bool,
    },
    Span {
        id: String,
        start: usize,
        end: usize,
        snippet: String,
        score: f64,
    },
    Faithfulness {
        id: String,
        status: FaithfulnessStatus,
        passes: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        union_delta: Option<f64>,
    },
}

impl ExplanationNode {
    pub fn id(&self) -> &str {
        match self {
            Self::Rule { id, .. }
            | Self::Label { id, .. }
            | Self::Span { id, .. }
            | Self::Faithfulness { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Governs,
    Supports,
    Verifies,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationEdge {
    pub src: String,
    pub dst: String,
    pub kind: EdgeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationGraph {
    pub version: String,
    pub example_id: String,
    pub nodes: Vec<ExplanationNode>,
    pub edges: Vec<ExplanationEdge>,
}

fn span_id(label: &str, start: usize, end: usize) -> String {
    let digest = format!("{:x}", Sha256::digest(format!("{label}:{start}:{end}").as_bytes()));
    format!("span:{}", &digest[..8])
}

impl ExplanationGraph {
    pub fn from_record(record: &DecisionRecord) -> Self {
        let mut nodes = vec![ExplanationNode::Rule {
            id: "rule:calibration".into(),
            method: record.calibration.method.clone(),
            value: record.calibration.temperature,
        }];
        let mut edges = Vec::new();

        for label in &record.labels {
            let label_id = format!("label:{}", label.name);
            let rule_id = format!("rule:threshold:{}", label.threshold_source);
            if !nodes.iter().any(|n| n.id() == rule_id) {
                nodes.push(ExplanationNode::Rule {
                    id: rule_id.clone(),
                    method: "thresholding".into(),
                    value: None,
                });
            }
            nodes.push(ExplanationNode::Label {
                id: label_id.clone(),
                name: label.name.clone(),
                calibrated_probability: label.calibrated_probability,
                threshold: label.threshold,
                predicted: label.predicted,
            });
            for rule in ["rule:calibration".to_string(), rule_id] {
                edges.push(ExplanationEdge {
                    src: rule,
                    dst: label_id.clone(),
                    kind: EdgeKind::Governs,
                    weight: None,
                });
            }

            for span in &label.evidence {
                let id = span_id(&label.name, span.start, span.end);
                nodes.push(ExplanationNode::Span {
                    id: id.clone(),
                    start: span.start,
                    end: span.end,
                    snippet: span.snippet.clone(),
                    score: span.score,
                });
                edges.push(ExplanationEdge {
                    src: id,
                    dst: label_id.clone(),
                    kind: EdgeKind::Supports,
                    weight: Some(span.score),
                });
            }

            if let Some(f) = &label.faithfulness {
                let id = format!("faith:{}", label.name);
                nodes.push(ExplanationNode::Faithfulness {
                    id: id.clone(),
                    status: f.status,
                    passes: f.passes,
                    union_delta: f.union_delta,
                });
                edges.push(ExplanationEdge {
                    src: id,
                    dst: label_id,
                    kind: EdgeKind::Verifies,
                    weight: None,
                });
            }
        }

        Self {
            version: EXPLANATION_GRAPH_VERSION.into(),
            example_id: record.example_id.clone(),
            nodes,
            edges,
        }
    }
}

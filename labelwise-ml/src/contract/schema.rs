//! Decision contract v1.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::decision::dependency::DependencyGraph;
use crate::decision::thresholds::ThresholdSource;
use crate::eval::faithfulness::LabelFaithfulness;
use crate::inference::backbone::ModelInfo;
use crate::inference::calibration::CalibrationInfo;
use crate::interpretability::attribution::EvidenceMethod;
use crate::safety::abstain::AbstainReason;
use crate::safety::sanitize::SanitizationRecord;

pub const SCHEMA_VERSION: &str = "v1";

/// Deterministic id for inputs that arrive without one.
pub fn example_id_for(raw_text: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(raw_text.as_bytes()));
    format!("gen_{}", &digest[..12])
}

/// One emitted evidence span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceEntry {
    pub start: usize,
    pub end: usize,
    pub score: f64,
    pub snippet: String,
}

/// Per-label decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelEntry {
    pub name: String,
    /// Raw classifier probability.
    pub probability: f64,
    pub calibrated_probability: f64,
    pub threshold: f64,
    pub threshold_source: ThresholdSource,
    pub predicted: bool,
    pub evidence: Vec<EvidenceEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub faithfulness: Option<LabelFaithfulness>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Abstain {
    pub is_abstain: bool,
    /// Priority order; non-empty iff `is_abstain`.
    pub reasons: Vec<AbstainReason>,
}

impl Abstain {
    pub fn from_reasons(reasons: Vec<AbstainReason>) -> Self {
        Self {
            is_abstain: !reasons.is_empty(),
            reasons,
        }
    }

    pub fn none() -> Self {
        Self::from_reasons(Vec::new())
    }

    /// The reason that decided the abstention.
    pub fn primary(&self) -> Option<AbstainReason> {
        self.reasons.first().copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub evidence_method: EvidenceMethod,
    pub sanitization: SanitizationRecord,
    pub model_info: ModelInfo,
    /// Length of the sanitized text in chars; the upper bound for span offsets.
    pub input_chars: usize,
}

/// One immutable decision per input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub version: String,
    pub example_id: String,
    pub labels: Vec<LabelEntry>,
    pub abstain: Abstain,
    pub metadata: RecordMetadata,
    pub calibration: CalibrationInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_graph: Option<DependencyGraph>,
}

impl DecisionRecord {
    pub fn predicted_labels(&self) -> impl Iterator<Item = &LabelEntry> {
        self.labels.iter().filter(|l| l.predicted)
    }

    pub fn max_calibrated(&self) -> Option<f64> {
        self.labels
            .iter()
            .map(|l| l.calibrated_probability)
            .fold(None, |acc, p| Some(acc.map_or(p, |a: f64| a.max(p))))
    }

    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

//! Record fixtures shared by the contract tests.

use std::collections::BTreeMap;

use crate::decision::thresholds::ThresholdSource;
use crate::eval::faithfulness::{FaithfulnessStatus, LabelFaithfulness};
use crate::inference::backbone::ModelInfo;
use crate::inference::calibration::CalibrationInfo;
use crate::interpretability::attribution::EvidenceMethod;
use crate::safety::sanitize::SanitizationRecord;

use super::schema::{Abstain, DecisionRecord, EvidenceEntry, LabelEntry, RecordMetadata};

pub(crate) fn sample_record() -> DecisionRecord {
    DecisionRecord {
        version: "v1".into(),
        example_id: "ex-1".into(),
        labels: vec![
            LabelEntry {
                name: "adhd".into(),
                probability: 0.9,
                calibrated_probability: 0.9,
                threshold: 0.45,
                threshold_source: ThresholdSource::PerLabel,
                predicted: true,
                evidence: vec![EvidenceEntry {
                    start: 0,
                    end: 8,
                    score: 0.5,
                    snippet: "restless".into(),
                }],
                faithfulness: Some(LabelFaithfulness {
                    status: FaithfulnessStatus::Passed,
                    passes: true,
                    suspicious: false,
                    span_deltas: vec![Some(0.3)],
                    union_delta: Some(0.3),
                }),
            },
            LabelEntry {
                name: "anxiety".into(),
                probability: 0.2,
                calibrated_probability: 0.2,
                threshold: 0.5,
                threshold_source: ThresholdSource::Default,
                predicted: false,
                evidence: vec![],
                faithfulness: None,
            },
        ],
        abstain: Abstain::none(),
        metadata: RecordMetadata {
            evidence_method: EvidenceMethod::GradXInput,
            sanitization: SanitizationRecord {
                version: "v1".into(),
                rules_applied: vec![],
                hash: "abc123".into(),
            },
            model_info: ModelInfo {
                model_name: "test-model".into(),
                checkpoint: None,
                max_len: 512,
                num_labels: 2,
                extra: BTreeMap::new(),
            },
            input_chars: 20,
        },
        calibration: CalibrationInfo {
            method: "temperature_scaling".into(),
            temperature: Some(1.0),
        },
        dependency_graph: None,
    }
}

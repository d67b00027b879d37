//! Decision contract builder.
//!
//! `Assembling -> Validating -> (Repairing) -> FinalOk | FinalAbstain`. The
//! builder only reads upstream outputs; every expected condition ends in a
//! record, never an error.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{DecisionConfig, LabelwiseConfig};
use crate::decision::dependency::DependencyGraph;
use crate::decision::thresholds::Threshold;
use crate::eval::faithfulness::LabelFaithfulness;
use crate::inference::backbone::ModelInfo;
use crate::inference::calibration::CalibrationInfo;
use crate::interpretability::attribution::EvidenceMethod;
use crate::interpretability::spans::{EvidenceSpan, snippet};
use crate::safety::abstain::{AbstainSignals, decide_abstain};
use crate::safety::sanitize::SanitizedText;

use super::repair::repair_record;
use super::schema::{
    Abstain, DecisionRecord, EvidenceEntry, LabelEntry, RecordMetadata, SCHEMA_VERSION,
};
use super::validate::{ValidationLimits, round_to, validate_record};

/// Builder states, in the order a record passes through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractState {
    Assembling,
    Validating,
    Repairing,
    FinalOk,
    FinalAbstain,
}

/// Upstream results for one label.
#[derive(Debug, Clone)]
pub struct LabelDraft {
    pub name: String,
    pub probability: f64,
    pub calibrated_probability: f64,
    pub threshold: Threshold,
    pub predicted: bool,
    pub spans: Vec<EvidenceSpan>,
    pub faithfulness: Option<LabelFaithfulness>,
}

/// Everything the builder needs for one example.
#[derive(Debug, Clone)]
pub struct Assembly {
    pub example_id: String,
    pub sanitized: SanitizedText,
    pub labels: Vec<LabelDraft>,
    pub evidence_method: EvidenceMethod,
    pub model_info: ModelInfo,
    pub calibration: CalibrationInfo,
    pub dependency_graph: Option<DependencyGraph>,
}

/// The emitted record plus how it got there.
#[derive(Debug, Clone)]
pub struct ContractOutcome {
    pub record: DecisionRecord,
    pub states: Vec<ContractState>,
    pub repairs: Vec<String>,
    /// Violations left after repair; non-empty only for `schema_invalid`.
    pub violations: Vec<String>,
}

impl ContractOutcome {
    pub fn final_state(&self) -> ContractState {
        self.states
            .last()
            .copied()
            .unwrap_or(ContractState::Assembling)
    }
}

#[derive(Debug, Clone)]
pub struct ContractBuilder {
    limits: ValidationLimits,
    policy: DecisionConfig,
}

impl ContractBuilder {
    pub fn new(limits: ValidationLimits, policy: DecisionConfig) -> Self {
        Self { limits, policy }
    }

    pub fn from_config(config: &LabelwiseConfig) -> Self {
        Self::new(ValidationLimits::from(config), config.decision.clone())
    }

    pub fn limits(&self) -> &ValidationLimits {
        &self.limits
    }

    fn assemble(&self, assembly: &Assembly) -> DecisionRecord {
        let d = self.limits.probability_decimals;
        let text = &assembly.sanitized.text;
        let labels = assembly
            .labels
            .iter()
            .map(|draft| LabelEntry {
                name: draft.name.clone(),
                probability: round_to(draft.probability, d),
                calibrated_probability: round_to(draft.calibrated_probability, d),
                threshold: draft.threshold.value,
                threshold_source: draft.threshold.source,
                predicted: draft.predicted,
                evidence: draft
                    .spans
                    .iter()
                    .map(|s| EvidenceEntry {
                        start: s.start,
                        end: s.end,
                        score: round_to(s.score, d),
                        snippet: snippet(text, s.start, s.end, self.limits.snippet_max_chars),
                    })
                    .collect(),
                faithfulness: draft.faithfulness.clone().map(|mut f| {
                    for delta in f.span_deltas.iter_mut().flatten().chain(f.union_delta.iter_mut()) {
                        *delta = round_to(*delta, d);
                    }
                    f
                }),
            })
            .collect();

        DecisionRecord {
            version: SCHEMA_VERSION.to_string(),
            example_id: assembly.example_id.clone(),
            labels,
            abstain: Abstain::none(),
            metadata: RecordMetadata {
                evidence_method: assembly.evidence_method,
                sanitization: assembly.sanitized.record.clone(),
                model_info: assembly.model_info.clone(),
                input_chars: text.chars().count(),
            },
            calibration: assembly.calibration.clone(),
            dependency_graph: assembly.dependency_graph.clone(),
        }
    }

    /// Run the state machine to a final record.
    pub fn build(&self, assembly: &Assembly) -> ContractOutcome {
        let mut states = vec![ContractState::Assembling];
        let mut record = self.assemble(assembly);
        let mut repairs = Vec::new();
        let mut violations = Vec::new();

        states.push(ContractState::Validating);
        if let Err(first) = validate_record(&record, &self.limits) {
            debug!(example_id = %record.example_id, violations = ?first.violations, "record failed validation");
            states.push(ContractState::Repairing);
            let outcome = repair_record(&record, &self.limits);
            record = outcome.record;
            repairs = outcome.actions;
            states.push(ContractState::Validating);
            if let Err(still) = validate_record(&record, &self.limits) {
                warn!(
                    example_id = %record.example_id,
                    violations = ?still.violations,
                    "record unrepairable; abstaining as schema_invalid"
                );
                violations = still.violations;
            }
        }

        let signals = AbstainSignals {
            schema_invalid: !violations.is_empty(),
            sanitized_text: assembly.sanitized.text.clone(),
            calibrated: record
                .labels
                .iter()
                .map(|l| l.calibrated_probability)
                .collect(),
            residual_leakage: assembly.sanitized.residual_leakage(),
        };
        record.abstain = Abstain::from_reasons(decide_abstain(&signals, &self.policy));
        states.push(if record.abstain.is_abstain {
            ContractState::FinalAbstain
        } else {
            ContractState::FinalOk
        });
        debug!(
            example_id = %record.example_id,
            abstain = record.abstain.is_abstain,
            reasons = ?record.abstain.reasons,
            "decision record final"
        );

        ContractOutcome {
            record,
            states,
            repairs,
            violations,
        }
    }
}

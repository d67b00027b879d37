//! Decision engine: one input from sanitization to a final decision record.
//!
//! One call to [`DecisionEngine::infer`] yields exactly one [`DecisionRecord`]
//! for any input the collaborators can process. Batches run on the scoped
//! worker pool; per-example failures are counted as skipped, infrastructure
//! failures abort the batch.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::LabelwiseConfig;
use crate::contract::builder::{Assembly, ContractBuilder, ContractState, LabelDraft};
use crate::contract::schema::{DecisionRecord, EvidenceEntry, example_id_for};
use crate::contract::validate::round_to;
use crate::decision::dependency::build_dependency_graph;
use crate::decision::thresholds::{TableThresholds, ThresholdPolicy};
use crate::error::{ConfigError, LabelwiseError};
use crate::eval::baselines::{BaselineGenerator, BaselineKind, BaselineSample};
use crate::eval::faithfulness::{
    FaithfulnessStatus, FaithfulnessVerifier, LabelFaithfulness, LabelVerification,
};
use crate::eval::stats::PairedComparison;
use crate::inference::backbone::Classifier;
use crate::inference::backends::BagOfEmbeddingsClassifier;
use crate::inference::calibration::{Calibrator, TemperatureScaling};
use crate::inference::tokenizer::{Encoding, Tokenizer};
use crate::interpretability::attribution::{AttributionEngine, EvidenceMethod};
use crate::interpretability::spans::{EvidenceSpan, SpanBuilder, snippet};
use crate::runtime::parallel_map;
use crate::safety::sanitize::{RegexSanitizer, SanitizedText, Sanitizer};

/// One input. Without an id, the record id is derived from the raw text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputExample {
    #[serde(default, alias = "example_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub text: String,
}

impl InputExample {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: None,
            text: text.into(),
        }
    }

    pub fn with_id(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            text: text.into(),
        }
    }

    pub fn example_id(&self) -> String {
        self.id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| example_id_for(&self.text))
    }
}

/// Per-example state shared by inference and audit.
struct ExampleContext {
    example_id: String,
    sanitized: SanitizedText,
    encoding: Encoding,
    text_len: usize,
    raw: Vec<f64>,
    calibrated: Vec<f64>,
}

/// Evidence and its deletion test for one label.
#[derive(Debug, Clone)]
pub struct LabelEvidence {
    pub label: usize,
    pub spans: Vec<EvidenceSpan>,
    pub verification: Option<LabelVerification>,
    pub faithfulness: LabelFaithfulness,
}

/// A record together with the intermediate results behind it.
#[derive(Debug, Clone)]
pub struct ExampleOutcome {
    pub record: DecisionRecord,
    pub states: Vec<ContractState>,
    pub repairs: Vec<String>,
    pub evidence: Vec<LabelEvidence>,
}

/// An example that produced no record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedExample {
    pub index: usize,
    pub example_id: String,
    pub error: String,
}

/// Records in input order plus the examples that were skipped.
#[derive(Debug, Clone, Default)]
pub struct BatchOutput {
    pub records: Vec<DecisionRecord>,
    pub skipped: Vec<SkippedExample>,
}

/// Evidence JSONL row: one per audited (example, label).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRow {
    pub example_id: String,
    pub label: String,
    pub calibrated_probability: f64,
    pub metadata: EvidenceRowMetadata,
    pub evidence: Vec<EvidenceEntry>,
    pub faithfulness: LabelFaithfulness,
    pub baselines: Vec<BaselineSample>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRowMetadata {
    pub evidence_method: EvidenceMethod,
}

/// Everything a baseline audit produced, before aggregation.
#[derive(Debug, Clone, Default)]
pub struct AuditRun {
    pub examples: usize,
    pub rows: Vec<EvidenceRow>,
    pub comparisons: Vec<PairedComparison>,
    pub skipped: Vec<SkippedExample>,
}

struct ExampleAudit {
    rows: Vec<EvidenceRow>,
    comparisons: Vec<PairedComparison>,
}

/// The evidence & decision layer over a set of collaborators.
pub struct DecisionEngine {
    classifier: Arc<dyn Classifier>,
    tokenizer: Arc<dyn Tokenizer>,
    calibrator: Arc<dyn Calibrator>,
    thresholds: Arc<dyn ThresholdPolicy>,
    sanitizer: Arc<dyn Sanitizer>,
    config: LabelwiseConfig,
    attribution: AttributionEngine,
    span_builder: SpanBuilder,
    contract: ContractBuilder,
}

impl DecisionEngine {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        tokenizer: Arc<dyn Tokenizer>,
        calibrator: Arc<dyn Calibrator>,
        thresholds: Arc<dyn ThresholdPolicy>,
        sanitizer: Arc<dyn Sanitizer>,
        config: LabelwiseConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            attribution: AttributionEngine::from_config(&config.evidence),
            span_builder: SpanBuilder::from_config(&config.evidence),
            contract: ContractBuilder::from_config(&config),
            classifier,
            tokenizer,
            calibrator,
            thresholds,
            sanitizer,
            config,
        })
    }

    /// Reference collaborators built from configuration alone.
    pub fn from_config(config: LabelwiseConfig) -> Result<Self, ConfigError> {
        let path = config
            .model
            .weights_path
            .clone()
            .ok_or_else(|| ConfigError::invalid("model.weights_path", "required"))?;
        let (classifier, tokenizer) =
            BagOfEmbeddingsClassifier::from_json_file(&path, config.model.max_len)?;
        info!(
            weights = %path.display(),
            labels = classifier.num_labels(),
            "loaded reference classifier"
        );
        Self::new(
            Arc::new(classifier),
            Arc::new(tokenizer),
            Arc::new(TemperatureScaling::new(config.calibration.temperature)),
            Arc::new(TableThresholds::from(&config.thresholds)),
            Arc::new(RegexSanitizer::new(&config.sanitization)?),
            config,
        )
    }

    pub fn config(&self) -> &LabelwiseConfig {
        &self.config
    }

    pub fn labels(&self) -> &[String] {
        self.classifier.labels()
    }

    fn context(&self, example: &InputExample) -> Result<ExampleContext, LabelwiseError> {
        let example_id = example.example_id();
        let sanitized = self.sanitizer.sanitize(&example.text);
        let encoding = self.tokenizer.encode(&sanitized.text);
        let raw = self.classifier.predict_proba(&encoding)?;
        let calibrated = self.calibrator.calibrate_all(&raw);
        Ok(ExampleContext {
            example_id,
            text_len: sanitized.text.chars().count(),
            sanitized,
            encoding,
            raw,
            calibrated,
        })
    }

    fn verifier(&self) -> FaithfulnessVerifier<'_> {
        FaithfulnessVerifier::new(
            self.classifier.as_ref(),
            self.tokenizer.as_ref(),
            self.calibrator.as_ref(),
            &self.config.faithfulness,
        )
        .with_precision(self.config.decision.probability_decimals)
    }

    /// Attribution, spans and deletion test for one label. Failures degrade to
    /// an empty or not-computed result.
    fn explain_label(
        &self,
        ctx: &ExampleContext,
        verifier: &FaithfulnessVerifier<'_>,
        label: usize,
    ) -> LabelEvidence {
        let attributions = match self.attribution.attribute(
            self.classifier.as_ref(),
            &ctx.encoding,
            label,
            self.tokenizer.pad_token_id(),
        ) {
            Ok(a) => a,
            Err(e) => {
                warn!(example_id = %ctx.example_id, label, error = %e, "attribution failed; evidence skipped");
                return LabelEvidence {
                    label,
                    spans: Vec::new(),
                    verification: None,
                    faithfulness: LabelFaithfulness::skipped(FaithfulnessStatus::NotComputed),
                };
            }
        };
        let spans = self.span_builder.build(&attributions, ctx.text_len);
        match verifier.verify_label(&ctx.sanitized.text, &ctx.encoding, &spans, label) {
            Ok(v) => LabelEvidence {
                label,
                faithfulness: v.summary(),
                spans,
                verification: Some(v),
            },
            Err(e) => {
                warn!(example_id = %ctx.example_id, label, error = %e, "faithfulness not computed");
                LabelEvidence {
                    label,
                    faithfulness: LabelFaithfulness {
                        span_deltas: vec![None; spans.len()],
                        ..LabelFaithfulness::skipped(FaithfulnessStatus::NotComputed)
                    },
                    spans,
                    verification: None,
                }
            }
        }
    }

    /// Labels to explain: predicted ones, plus the `explain_top_k` most probable.
    fn labels_to_explain(&self, calibrated: &[f64], predicted: &[bool]) -> Vec<usize> {
        let mut ranked: Vec<usize> = (0..calibrated.len()).collect();
        ranked.sort_by(|a, b| calibrated[*b].total_cmp(&calibrated[*a]).then(a.cmp(b)));
        let mut chosen: Vec<usize> = ranked
            .iter()
            .copied()
            .take(self.config.evidence.explain_top_k)
            .collect();
        chosen.extend((0..predicted.len()).filter(|i| predicted[*i]));
        chosen.sort_unstable();
        chosen.dedup();
        chosen
    }

    /// Full decision for one input, with intermediate results.
    pub fn infer_detailed(&self, example: &InputExample) -> Result<ExampleOutcome, LabelwiseError> {
        let ctx = self.context(example)?;
        let decimals = self.config.decision.probability_decimals;
        let names = self.classifier.labels();

        let mut drafts: Vec<LabelDraft> = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let calibrated = round_to(ctx.calibrated.get(i).copied().unwrap_or(f64::NAN), decimals);
                let (threshold, predicted) = self.thresholds.decide(name, calibrated);
                LabelDraft {
                    name: name.clone(),
                    probability: ctx.raw.get(i).copied().unwrap_or(f64::NAN),
                    calibrated_probability: calibrated,
                    threshold,
                    predicted,
                    spans: Vec::new(),
                    faithfulness: None,
                }
            })
            .collect();

        let predicted: Vec<bool> = drafts.iter().map(|d| d.predicted).collect();
        let calibrated: Vec<f64> = drafts.iter().map(|d| d.calibrated_probability).collect();
        let verifier = self.verifier();
        let mut evidence = Vec::new();
        for label in self.labels_to_explain(&calibrated, &predicted) {
            let draft = &mut drafts[label];
            let p = draft.calibrated_probability;
            if p.is_nan() || p < self.config.evidence.min_probability {
                draft.faithfulness = Some(LabelFaithfulness::skipped(FaithfulnessStatus::SkippedLowProb));
                continue;
            }
            let explained = self.explain_label(&ctx, &verifier, label);
            draft.spans = explained.spans.clone();
            draft.faithfulness = Some(explained.faithfulness.clone());
            evidence.push(explained);
        }

        let dependency_graph = self.config.runtime.include_dependency_graph.then(|| {
            let active: Vec<String> = drafts
                .iter()
                .filter(|d| d.predicted)
                .map(|d| d.name.clone())
                .collect();
            let probabilities: BTreeMap<String, f64> = drafts
                .iter()
                .map(|d| (d.name.clone(), d.calibrated_probability))
                .collect();
            build_dependency_graph(&active, &probabilities, &self.config.runtime.dependency_edges)
        });

        let outcome = self.contract.build(&Assembly {
            example_id: ctx.example_id.clone(),
            sanitized: ctx.sanitized.clone(),
            labels: drafts,
            evidence_method: self.attribution.method(),
            model_info: self.classifier.model_info(),
            calibration: self.calibrator.describe(),
            dependency_graph,
        });
        debug!(example_id = %ctx.example_id, explained = evidence.len(), "inference complete");
        Ok(ExampleOutcome {
            record: outcome.record,
            states: outcome.states,
            repairs: outcome.repairs,
            evidence,
        })
    }

    /// One decision record for one input.
    pub fn infer(&self, example: &InputExample) -> Result<DecisionRecord, LabelwiseError> {
        self.infer_detailed(example).map(|o| o.record)
    }

    /// Records for every processable input, in input order.
    ///
    /// Returns an error only for infrastructure failures; the first one (by
    /// input position) is reported.
    pub fn run_batch(&self, examples: &[InputExample]) -> Result<BatchOutput, LabelwiseError> {
        let results = parallel_map(
            examples,
            self.config.runtime.workers,
            |_, example| self.infer(example),
            |r| r.as_ref().is_err_and(LabelwiseError::is_fatal),
        );
        let mut output = BatchOutput::default();
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Some(Ok(record)) => output.records.push(record),
                Some(Err(e)) if e.is_fatal() => return Err(e),
                Some(Err(e)) => {
                    let example_id = examples[index].example_id();
                    warn!(index, example_id = %example_id, error = %e, "example skipped");
                    output.skipped.push(SkippedExample {
                        index,
                        example_id,
                        error: e.to_string(),
                    });
                }
                None => {}
            }
        }
        info!(
            records = output.records.len(),
            skipped = output.skipped.len(),
            "batch complete"
        );
        Ok(output)
    }

    fn audit_example(&self, example: &InputExample) -> Result<ExampleAudit, LabelwiseError> {
        let ctx = self.context(example)?;
        let verifier = self.verifier();
        let generator = BaselineGenerator::new(
            self.classifier.as_ref(),
            &self.attribution,
            &self.span_builder,
            &verifier,
            self.tokenizer.pad_token_id(),
            self.config.baselines.seed,
        );
        let names = self.classifier.labels();

        let mut ranked: Vec<usize> = (0..ctx.calibrated.len()).collect();
        ranked.sort_by(|a, b| ctx.calibrated[*b].total_cmp(&ctx.calibrated[*a]).then(a.cmp(b)));
        let decimals = self.config.decision.probability_decimals;
        let mut audit = ExampleAudit {
            rows: Vec::new(),
            comparisons: Vec::new(),
        };

        for label in ranked.into_iter().take(self.config.baselines.audit_top_labels) {
            let Some(name) = names.get(label) else { continue };
            let p = ctx.calibrated[label];
            if p.is_nan() || p < self.config.evidence.min_probability {
                continue;
            }
            let explained = self.explain_label(&ctx, &verifier, label);
            let mut baselines = Vec::new();
            if !explained.spans.is_empty() {
                baselines.extend(generator.random_span(
                    &ctx.example_id,
                    &ctx.sanitized.text,
                    &ctx.encoding,
                    &explained.spans,
                    label,
                ));
            }
            baselines.extend(generator.label_shuffle(
                &ctx.example_id,
                &ctx.sanitized.text,
                &ctx.encoding,
                label,
            ));

            if let Some(v) = &explained.verification
                && let Some(ev_delta) = v.union_delta
            {
                for kind in BaselineKind::ALL {
                    let Some(b) = baselines.iter().find(|b| b.kind == kind) else {
                        continue;
                    };
                    if let Some(b_delta) = b.delta {
                        audit.comparisons.push(PairedComparison::new(
                            &ctx.example_id,
                            name,
                            kind,
                            (ev_delta, v.passes),
                            (b_delta, b.passes),
                        ));
                    }
                }
            }

            let mut faithfulness = explained.faithfulness.clone();
            for d in faithfulness
                .span_deltas
                .iter_mut()
                .flatten()
                .chain(faithfulness.union_delta.iter_mut())
            {
                *d = round_to(*d, decimals);
            }
            audit.rows.push(EvidenceRow {
                example_id: ctx.example_id.clone(),
                label: name.clone(),
                calibrated_probability: round_to(p, decimals),
                metadata: EvidenceRowMetadata {
                    evidence_method: self.attribution.method(),
                },
                evidence: explained
                    .spans
                    .iter()
                    .map(|s| EvidenceEntry {
                        start: s.start,
                        end: s.end,
                        score: round_to(s.score, decimals),
                        snippet: snippet(
                            &ctx.sanitized.text,
                            s.start,
                            s.end,
                            self.config.evidence.snippet_max_chars,
                        ),
                    })
                    .collect(),
                faithfulness,
                baselines,
            });
        }
        Ok(audit)
    }

    /// Evidence, baselines and paired comparisons for every input.
    pub fn audit_batch(&self, examples: &[InputExample]) -> Result<AuditRun, LabelwiseError> {
        let results = parallel_map(
            examples,
            self.config.runtime.workers,
            |_, example| self.audit_example(example),
            |r| r.as_ref().is_err_and(LabelwiseError::is_fatal),
        );
        let mut run = AuditRun {
            examples: examples.len(),
            ..AuditRun::default()
        };
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Some(Ok(audit)) => {
                    run.rows.extend(audit.rows);
                    run.comparisons.extend(audit.comparisons);
                }
                Some(Err(e)) if e.is_fatal() => return Err(e),
                Some(Err(e)) => {
                    let example_id = examples[index].example_id();
                    warn!(index, example_id = %example_id, error = %e, "example skipped in audit");
                    run.skipped.push(SkippedExample {
                        index,
                        example_id,
                        error: e.to_string(),
                    });
                }
                None => {}
            }
        }
        info!(
            rows = run.rows.len(),
            comparisons = run.comparisons.len(),
            skipped = run.skipped.len(),
            "audit complete"
        );
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::backends::BagOfEmbeddingsWeights;
    use crate::safety::abstain::AbstainReason;

    fn engine(config: LabelwiseConfig) -> DecisionEngine {
        let weights = BagOfEmbeddingsWeights::from_lexicon(
            "pipeline-test",
            &["adhd", "anxiety"],
            &[("restless", "adhd", 3.0), ("worry", "anxiety", 3.0)],
            6.0,
            -2.0,
        );
        let (clf, tok) = BagOfEmbeddingsClassifier::from_weights(weights, 128).unwrap();
        DecisionEngine::new(
            Arc::new(clf),
            Arc::new(tok),
            Arc::new(TemperatureScaling::new(config.calibration.temperature)),
            Arc::new(TableThresholds::from(&config.thresholds)),
            Arc::new(RegexSanitizer::new(&config.sanitization).unwrap()),
            config,
        )
        .unwrap()
    }

    #[test]
    fn test_predicted_label_gets_evidence() {
        let e = engine(LabelwiseConfig::default());
        let outcome = e
            .infer_detailed(&InputExample::new("so restless all day"))
            .unwrap();
        let adhd = &outcome.record.labels[0];
        assert!(adhd.predicted);
        assert_eq!(adhd.evidence.len(), 1);
        assert_eq!(adhd.evidence[0].snippet, "restless");
        assert!(adhd.faithfulness.as_ref().unwrap().passes);
        let anxiety = &outcome.record.labels[1];
        assert!(!anxiety.predicted);
        assert!(anxiety.evidence.is_empty());
        assert!(!outcome.record.abstain.is_abstain);
    }

    #[test]
    fn test_example_id_defaults_to_hash() {
        let e = engine(LabelwiseConfig::default());
        let record = e.infer(&InputExample::new("so restless all day")).unwrap();
        assert_eq!(record.example_id, example_id_for("so restless all day"));
        let record = e
            .infer(&InputExample::with_id("row-7", "so restless all day"))
            .unwrap();
        assert_eq!(record.example_id, "row-7");
    }

    #[test]
    fn test_empty_input_abstains() {
        let e = engine(LabelwiseConfig::default());
        let record = e.infer(&InputExample::new("")).unwrap();
        assert!(record.abstain.is_abstain);
        assert!(record.abstain.reasons.contains(&AbstainReason::InputTooShort));
    }

    #[test]
    fn test_explain_top_k_adds_unpredicted_label() {
        let mut config = LabelwiseConfig::default();
        config.evidence.explain_top_k = 2;
        let e = engine(config);
        let record = e.infer(&InputExample::new("so restless today")).unwrap();
        let anxiety = &record.labels[1];
        assert!(!anxiety.predicted);
        assert!(anxiety.faithfulness.is_some());

        let record = engine(LabelwiseConfig::default())
            .infer(&InputExample::new("so restless today"))
            .unwrap();
        assert!(record.labels[1].faithfulness.is_none());
    }

    #[test]
    fn test_dependency_graph_is_optional() {
        let e = engine(LabelwiseConfig::default());
        let record = e.infer(&InputExample::new("so restless all day")).unwrap();
        assert!(record.dependency_graph.is_none());

        let mut config = LabelwiseConfig::default();
        config.runtime.include_dependency_graph = true;
        let record = engine(config)
            .infer(&InputExample::new("restless and worry"))
            .unwrap();
        let graph = record.dependency_graph.unwrap();
        assert!(graph.is_acyclic);
    }

    #[test]
    fn test_audit_produces_rows_and_pairs() {
        let e = engine(LabelwiseConfig::default());
        let run = e
            .audit_batch(&[
                InputExample::new("restless and tired today"),
                InputExample::new("constant worry at night"),
            ])
            .unwrap();
        assert_eq!(run.examples, 2);
        assert!(!run.rows.is_empty());
        assert!(run.comparisons.iter().all(|c| c.dominant == (c.evidence_delta > c.baseline_delta)));
        assert!(run.skipped.is_empty());
    }

    #[test]
    fn test_from_config_requires_weights() {
        assert!(matches!(
            DecisionEngine::from_config(LabelwiseConfig::default()),
            Err(ConfigError::Invalid { .. })
        ));
    }
}

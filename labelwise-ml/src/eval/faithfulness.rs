//! Faithfulness verifier: deletion test over evidence spans.
//!
//! Masking a span and re-running classifier + calibrator gives
//! `delta = p(original) - p(masked)`. A label passes when any one span drops
//! its probability by at least `any_span_min_delta`, or when every computed
//! span drops it by at least `all_span_min_delta`. Negative deltas mark the
//! evidence as suspicious and never count toward passing. With a precision
//! set, deltas are rounded before any of these rules are applied, so the
//! decision matches the values written to the record.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::FaithfulnessConfig;
use crate::contract::validate::round_to;
use crate::error::FaithfulnessComputationError;
use crate::inference::backbone::Classifier;
use crate::inference::calibration::Calibrator;
use crate::inference::tokenizer::{Encoding, Tokenizer};
use crate::interpretability::spans::EvidenceSpan;

/// How masked text is neutralized before re-inference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskStrategy {
    /// Replace covered token ids with the tokenizer's mask id; offsets stay put.
    #[default]
    MaskToken,
    /// Blank the covered characters and re-tokenize.
    Whitespace,
}

/// Deletion test outcome for one span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaithfulnessResult {
    pub start: usize,
    pub end: usize,
    /// Calibrated probability of the unmodified input.
    pub p_full: f64,
    /// Calibrated probability with the span masked.
    pub p_masked: f64,
    pub delta: f64,
    /// Span-level: `delta >= all_span_min_delta` and not suspicious.
    pub passes: bool,
    pub suspicious: bool,
}

/// Label-level outcome category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaithfulnessStatus {
    Passed,
    FailedLowDelta,
    SuspiciousNegativeDelta,
    SkippedNoSpans,
    SkippedLowProb,
    NotComputed,
}

impl FaithfulnessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::FailedLowDelta => "failed_low_delta",
            Self::SuspiciousNegativeDelta => "suspicious_negative_delta",
            Self::SkippedNoSpans => "skipped_no_spans",
            Self::SkippedLowProb => "skipped_low_prob",
            Self::NotComputed => "not_computed",
        }
    }
}

/// Faithfulness block carried by each explained label of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelFaithfulness {
    pub status: FaithfulnessStatus,
    pub passes: bool,
    pub suspicious: bool,
    /// One entry per evidence span, in evidence order; `None` = not computed.
    pub span_deltas: Vec<Option<f64>>,
    /// Delta with every span masked together.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub union_delta: Option<f64>,
}

impl LabelFaithfulness {
    pub fn skipped(status: FaithfulnessStatus) -> Self {
        Self {
            status,
            passes: false,
            suspicious: false,
            span_deltas: Vec::new(),
            union_delta: None,
        }
    }
}

/// Full deletion-test result for one (example, label).
#[derive(Debug, Clone)]
pub struct LabelVerification {
    pub label: usize,
    pub p_full: f64,
    pub spans: Vec<Result<FaithfulnessResult, FaithfulnessComputationError>>,
    pub union_delta: Option<f64>,
    pub passes: bool,
    pub suspicious: bool,
    pub status: FaithfulnessStatus,
}

impl LabelVerification {
    pub fn computed_deltas(&self) -> Vec<f64> {
        self.spans
            .iter()
            .filter_map(|r| r.as_ref().ok().map(|f| f.delta))
            .collect()
    }

    pub fn summary(&self) -> LabelFaithfulness {
        LabelFaithfulness {
            status: self.status,
            passes: self.passes,
            suspicious: self.suspicious,
            span_deltas: self
                .spans
                .iter()
                .map(|r| r.as_ref().ok().map(|f| f.delta))
                .collect(),
            union_delta: self.union_delta,
        }
    }
}

/// Label-level pass rule over the deltas that were actually computed.
///
/// No computed deltas means no demonstrated effect, so the label fails.
pub fn label_passes(deltas: &[f64], config: &FaithfulnessConfig) -> bool {
    if deltas.is_empty() {
        return false;
    }
    let any_high = deltas.iter().any(|d| *d >= config.any_span_min_delta);
    let all_moderate = deltas.iter().all(|d| *d >= config.all_span_min_delta);
    any_high || all_moderate
}

/// Status for a label given its span outcomes.
pub fn label_status(
    span_count: usize,
    deltas: &[f64],
    passes: bool,
) -> FaithfulnessStatus {
    if span_count == 0 {
        FaithfulnessStatus::SkippedNoSpans
    } else if deltas.is_empty() {
        FaithfulnessStatus::NotComputed
    } else if passes {
        FaithfulnessStatus::Passed
    } else if deltas.iter().any(|d| *d < 0.0) {
        FaithfulnessStatus::SuspiciousNegativeDelta
    } else {
        FaithfulnessStatus::FailedLowDelta
    }
}

/// Runs deletion tests against shared, read-only collaborators.
pub struct FaithfulnessVerifier<'a> {
    classifier: &'a dyn Classifier,
    tokenizer: &'a dyn Tokenizer,
    calibrator: &'a dyn Calibrator,
    config: &'a FaithfulnessConfig,
    decimals: Option<u32>,
}

impl<'a> FaithfulnessVerifier<'a> {
    pub fn new(
        classifier: &'a dyn Classifier,
        tokenizer: &'a dyn Tokenizer,
        calibrator: &'a dyn Calibrator,
        config: &'a FaithfulnessConfig,
    ) -> Self {
        Self {
            classifier,
            tokenizer,
            calibrator,
            config,
            decimals: None,
        }
    }

    /// Round deltas to `decimals` places before judging them.
    pub fn with_precision(mut self, decimals: u32) -> Self {
        self.decimals = Some(decimals);
        self
    }

    pub fn config(&self) -> &FaithfulnessConfig {
        self.config
    }

    /// Calibrated probability of `label` for an encoded input.
    pub fn probability(
        &self,
        encoding: &Encoding,
        label: usize,
    ) -> Result<f64, FaithfulnessComputationError> {
        let raw = self
            .classifier
            .predict_proba(encoding)
            .map_err(|e| FaithfulnessComputationError::new(label, e.to_string()))?;
        let p = raw.get(label).copied().ok_or_else(|| {
            FaithfulnessComputationError::new(label, format!("no probability for label {label}"))
        })?;
        let p = self.calibrator.calibrate(p);
        if p.is_finite() {
            Ok(p)
        } else {
            Err(FaithfulnessComputationError::new(
                label,
                "non-finite calibrated probability",
            ))
        }
    }

    /// `encoding` (of `text`) with every character range in `ranges` neutralized.
    pub fn mask(
        &self,
        text: &str,
        encoding: &Encoding,
        ranges: &[(usize, usize)],
        label: usize,
    ) -> Result<Encoding, FaithfulnessComputationError> {
        match self.config.mask_strategy {
            MaskStrategy::MaskToken => {
                let mut indices: Vec<usize> = ranges
                    .iter()
                    .flat_map(|(s, e)| encoding.tokens_in_range(*s, *e))
                    .collect();
                indices.sort_unstable();
                indices.dedup();
                if indices.is_empty() {
                    return Err(FaithfulnessComputationError::new(
                        label,
                        "span covers no tokens",
                    ));
                }
                Ok(encoding.with_masked(&indices, self.tokenizer.mask_token_id()))
            }
            MaskStrategy::Whitespace => {
                let blanked: String = text
                    .chars()
                    .enumerate()
                    .map(|(i, c)| {
                        if ranges.iter().any(|(s, e)| i >= *s && i < *e) {
                            ' '
                        } else {
                            c
                        }
                    })
                    .collect();
                Ok(self.tokenizer.encode(&blanked))
            }
        }
    }

    fn deletion(
        &self,
        text: &str,
        encoding: &Encoding,
        ranges: &[(usize, usize)],
        label: usize,
        p_full: f64,
    ) -> Result<(f64, f64), FaithfulnessComputationError> {
        let masked = self.mask(text, encoding, ranges, label)?;
        let p_masked = self.probability(&masked, label)?;
        let delta = p_full - p_masked;
        Ok((p_masked, self.decimals.map_or(delta, |d| round_to(delta, d))))
    }

    /// Deletion test for a single span.
    pub fn verify_span(
        &self,
        text: &str,
        encoding: &Encoding,
        span: &EvidenceSpan,
        label: usize,
        p_full: f64,
    ) -> Result<FaithfulnessResult, FaithfulnessComputationError> {
        let (p_masked, delta) =
            self.deletion(text, encoding, &[(span.start, span.end)], label, p_full)?;
        let suspicious = delta < 0.0;
        Ok(FaithfulnessResult {
            start: span.start,
            end: span.end,
            p_full,
            p_masked,
            delta,
            passes: !suspicious && delta >= self.config.all_span_min_delta,
            suspicious,
        })
    }

    /// Deletion tests for every span of one label, plus the union deletion.
    ///
    /// An error means the unmodified probability itself could not be computed.
    pub fn verify_label(
        &self,
        text: &str,
        encoding: &Encoding,
        spans: &[EvidenceSpan],
        label: usize,
    ) -> Result<LabelVerification, FaithfulnessComputationError> {
        let p_full = self.probability(encoding, label)?;
        let results: Vec<_> = spans
            .iter()
            .map(|span| {
                let r = self.verify_span(text, encoding, span, label, p_full);
                if let Err(e) = &r {
                    warn!(label, start = span.start, end = span.end, error = %e, "span deletion not computed");
                }
                r
            })
            .collect();

        let union_delta = if spans.is_empty() {
            None
        } else {
            let ranges: Vec<(usize, usize)> = spans.iter().map(|s| (s.start, s.end)).collect();
            match self.deletion(text, encoding, &ranges, label, p_full) {
                Ok((_, delta)) => Some(delta),
                Err(e) => {
                    warn!(label, error = %e, "union deletion not computed");
                    None
                }
            }
        };

        let mut verification = LabelVerification {
            label,
            p_full,
            spans: results,
            union_delta,
            passes: false,
            suspicious: false,
            status: FaithfulnessStatus::NotComputed,
        };
        let deltas = verification.computed_deltas();
        verification.passes = label_passes(&deltas, self.config);
        verification.suspicious = deltas.iter().any(|d| *d < 0.0);
        verification.status = label_status(spans.len(), &deltas, verification.passes);
        debug!(
            label,
            p_full,
            union_delta = ?verification.union_delta,
            status = verification.status.as_str(),
            "verified label evidence"
        );
        Ok(verification)
    }
}

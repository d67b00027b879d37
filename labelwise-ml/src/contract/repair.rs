//! Bounded, deterministic repair of invalid records.
//!
//! Repair never invents data: it rounds, clamps, truncates and drops. Anything
//! it cannot fix (non-finite probabilities, empty ids, duplicate names) is left
//! for re-validation to report.

use tracing::warn;

use crate::interpretability::spans::truncate_snippet;

use super::schema::{DecisionRecord, EvidenceEntry, LabelEntry, SCHEMA_VERSION};
use super::validate::{ValidationLimits, round_to};

/// A repaired copy plus what was changed.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairOutcome {
    pub record: DecisionRecord,
    pub actions: Vec<String>,
}

impl RepairOutcome {
    pub fn changed(&self) -> bool {
        !self.actions.is_empty()
    }
}

fn fix_probability(value: &mut f64, decimals: u32) -> bool {
    if !value.is_finite() {
        return false;
    }
    let fixed = round_to(value.clamp(0.0, 1.0), decimals);
    let changed = fixed != *value;
    *value = fixed;
    changed
}

fn repair_label(label: &mut LabelEntry, text_len: usize, limits: &ValidationLimits) -> Vec<String> {
    let mut actions = Vec::new();
    let name = label.name.clone();
    let d = limits.probability_decimals;

    if fix_probability(&mut label.probability, d) {
        actions.push(format!("{name}: rounded/clamped probability"));
    }
    if fix_probability(&mut label.calibrated_probability, d) {
        actions.push(format!("{name}: rounded/clamped calibrated_probability"));
    }
    if label.threshold.is_finite() && !(0.0..=1.0).contains(&label.threshold) {
        label.threshold = label.threshold.clamp(0.0, 1.0);
        actions.push(format!("{name}: clamped threshold"));
    }
    if label.calibrated_probability.is_finite() {
        let predicted = label.calibrated_probability >= label.threshold;
        if predicted != label.predicted {
            label.predicted = predicted;
            actions.push(format!("{name}: recomputed predicted"));
        }
    }

    // Evidence and its per-span deltas are filtered together to stay aligned.
    let deltas = label
        .faithfulness
        .as_ref()
        .filter(|f| f.span_deltas.len() == label.evidence.len())
        .map(|f| f.span_deltas.clone());
    let mut kept: Vec<EvidenceEntry> = Vec::new();
    let mut kept_deltas = Vec::new();
    for (i, mut span) in std::mem::take(&mut label.evidence).into_iter().enumerate() {
        if span.end > text_len {
            span.end = text_len;
            actions.push(format!("{name}: clamped span end to {text_len}"));
        }
        let overlaps = kept
            .iter()
            .any(|k| span.start < k.end && k.start < span.end);
        if span.start >= span.end || !span.score.is_finite() || overlaps {
            actions.push(format!("{name}: dropped span [{}, {})", span.start, span.end));
            continue;
        }
        if kept.len() == limits.max_spans {
            actions.push(format!("{name}: dropped span beyond budget"));
            continue;
        }
        if span.snippet.chars().count() > limits.snippet_max_chars {
            span.snippet = truncate_snippet(&span.snippet, limits.snippet_max_chars);
            actions.push(format!("{name}: truncated snippet"));
        }
        span.score = round_to(span.score, d);
        kept.push(span);
        if let Some(ds) = &deltas {
            kept_deltas.push(ds[i]);
        }
    }
    label.evidence = kept;

    if let Some(f) = label.faithfulness.as_mut() {
        if deltas.is_some() {
            f.span_deltas = kept_deltas;
        } else if !f.span_deltas.is_empty() {
            f.span_deltas.clear();
            actions.push(format!("{name}: dropped misaligned span deltas"));
        }
        for delta in f.span_deltas.iter_mut().flatten().chain(f.union_delta.iter_mut()) {
            if delta.is_finite() {
                *delta = round_to(delta.clamp(-1.0, 1.0), d);
            }
        }
    }
    actions
}

/// Apply every bounded fix to a copy of `record`.
pub fn repair_record(record: &DecisionRecord, limits: &ValidationLimits) -> RepairOutcome {
    let mut fixed = record.clone();
    let mut actions = Vec::new();

    if fixed.version != SCHEMA_VERSION {
        fixed.version = SCHEMA_VERSION.to_string();
        actions.push("reset version".to_string());
    }
    let text_len = fixed.metadata.input_chars;
    for label in &mut fixed.labels {
        actions.extend(repair_label(label, text_len, limits));
    }
    let should_abstain = !fixed.abstain.reasons.is_empty();
    if fixed.abstain.is_abstain != should_abstain {
        fixed.abstain.is_abstain = should_abstain;
        actions.push("realigned abstain flag with reasons".to_string());
    }

    if !actions.is_empty() {
        warn!(example_id = %fixed.example_id, actions = actions.len(), "repaired decision record");
    }
    RepairOutcome {
        record: fixed,
        actions,
    }
}

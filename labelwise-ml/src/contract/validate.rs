//! Contract validation, for typed records and for raw JSON.

use serde_json::Value;
use std::collections::HashSet;

use crate::config::LabelwiseConfig;
use crate::error::SchemaValidationError;
use crate::safety::abstain::AbstainReason;

use super::schema::{DecisionRecord, SCHEMA_VERSION};

/// Declared limits a valid record respects.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationLimits {
    pub max_spans: usize,
    pub snippet_max_chars: usize,
    pub probability_decimals: u32,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self::from(&LabelwiseConfig::default())
    }
}

impl From<&LabelwiseConfig> for ValidationLimits {
    fn from(config: &LabelwiseConfig) -> Self {
        Self {
            max_spans: config.evidence.max_spans,
            snippet_max_chars: config.evidence.snippet_max_chars,
            probability_decimals: config.decision.probability_decimals,
        }
    }
}

/// `value` rounded half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let scale = 10f64.powi(decimals as i32);
    (value * scale).round() / scale
}

fn check_probability(violations: &mut Vec<String>, field: &str, value: f64, decimals: Option<u32>) {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        violations.push(format!("{field} must be a finite value in [0, 1], got {value}"));
    } else if let Some(d) = decimals
        && round_to(value, d) != value
    {
        violations.push(format!("{field} has more than {d} decimal places: {value}"));
    }
}

/// Check a typed record against the v1 contract.
pub fn validate_record(
    record: &DecisionRecord,
    limits: &ValidationLimits,
) -> Result<(), SchemaValidationError> {
    let mut v = Vec::new();
    let decimals = Some(limits.probability_decimals);

    if record.version != SCHEMA_VERSION {
        v.push(format!("version must be \"{SCHEMA_VERSION}\", got \"{}\"", record.version));
    }
    if record.example_id.trim().is_empty() {
        v.push("example_id must not be empty".into());
    }

    let mut names = HashSet::new();
    let text_len = record.metadata.input_chars;
    for (i, label) in record.labels.iter().enumerate() {
        let at = format!("labels[{i}]");
        if label.name.trim().is_empty() {
            v.push(format!("{at}.name must not be empty"));
        } else if !names.insert(label.name.as_str()) {
            v.push(format!("{at}.name duplicates \"{}\"", label.name));
        }
        check_probability(&mut v, &format!("{at}.probability"), label.probability, decimals);
        check_probability(
            &mut v,
            &format!("{at}.calibrated_probability"),
            label.calibrated_probability,
            decimals,
        );
        check_probability(&mut v, &format!("{at}.threshold"), label.threshold, None);
        if label.calibrated_probability.is_finite()
            && label.predicted != (label.calibrated_probability >= label.threshold)
        {
            v.push(format!("{at}.predicted disagrees with calibrated_probability >= threshold"));
        }

        if label.evidence.len() > limits.max_spans {
            v.push(format!(
                "{at}.evidence has {} spans, limit is {}",
                label.evidence.len(),
                limits.max_spans
            ));
        }
        for (j, span) in label.evidence.iter().enumerate() {
            let at = format!("{at}.evidence[{j}]");
            if span.start >= span.end || span.end > text_len {
                v.push(format!(
                    "{at} [{}, {}) outside input of {text_len} chars",
                    span.start, span.end
                ));
            }
            if !span.score.is_finite() {
                v.push(format!("{at}.score must be finite"));
            }
            let snippet_len = span.snippet.chars().count();
            if snippet_len > limits.snippet_max_chars {
                v.push(format!(
                    "{at}.snippet has {snippet_len} chars, limit is {}",
                    limits.snippet_max_chars
                ));
            }
        }
        let mut sorted: Vec<_> = label.evidence.iter().collect();
        sorted.sort_by_key(|s| s.start);
        if sorted.windows(2).any(|w| w[0].end > w[1].start) {
            v.push(format!("{at}.evidence spans overlap"));
        }

        if let Some(f) = &label.faithfulness {
            if !f.span_deltas.is_empty() && f.span_deltas.len() != label.evidence.len() {
                v.push(format!(
                    "{at}.faithfulness.span_deltas has {} entries for {} spans",
                    f.span_deltas.len(),
                    label.evidence.len()
                ));
            }
            let mut deltas = f.span_deltas.iter().flatten().chain(f.union_delta.iter());
            if deltas.any(|d| !d.is_finite() || d.abs() > 1.0) {
                v.push(format!("{at}.faithfulness deltas must be finite values in [-1, 1]"));
            }
        }
    }

    if record.abstain.is_abstain == record.abstain.reasons.is_empty() {
        v.push("abstain.is_abstain must be true exactly when reasons is non-empty".into());
    }
    let s = &record.metadata.sanitization;
    if s.version.trim().is_empty() || s.hash.trim().is_empty() {
        v.push("metadata.sanitization requires version and hash".into());
    }
    if record.metadata.model_info.model_name.trim().is_empty() {
        v.push("metadata.model_info.model_name must not be empty".into());
    }

    if v.is_empty() {
        Ok(())
    } else {
        Err(SchemaValidationError { violations: v })
    }
}

const REQUIRED_KEYS: [&str; 6] = [
    "version",
    "example_id",
    "labels",
    "abstain",
    "metadata",
    "calibration",
];

/// Check an arbitrary JSON value against the v1 contract.
///
/// Structural problems are reported key by key; a structurally sound value is
/// then decoded and held to the same rules as a typed record.
pub fn validate_value(
    value: &Value,
    limits: &ValidationLimits,
) -> Result<(), SchemaValidationError> {
    let fail = |violations: Vec<String>| Err(SchemaValidationError { violations });
    let Some(obj) = value.as_object() else {
        return fail(vec!["record must be a JSON object".into()]);
    };

    let mut v: Vec<String> = REQUIRED_KEYS
        .iter()
        .filter(|k| !obj.contains_key(**k))
        .map(|k| format!("missing top-level key `{k}`"))
        .collect();
    if !v.is_empty() {
        return fail(v);
    }

    if !obj["labels"].is_array() {
        v.push("labels must be an array".into());
    }
    for key in ["abstain", "metadata", "calibration"] {
        if !obj[key].is_object() {
            v.push(format!("{key} must be an object"));
        }
    }
    if let Some(abstain) = obj["abstain"].as_object() {
        if !abstain.get("is_abstain").is_some_and(Value::is_boolean) {
            v.push("abstain.is_abstain must be a boolean".into());
        }
        match abstain.get("reasons").and_then(Value::as_array) {
            None => v.push("abstain.reasons must be an array".into()),
            Some(reasons) => {
                for r in reasons {
                    if r.as_str().and_then(AbstainReason::parse).is_none() {
                        v.push(format!("abstain.reasons contains unknown code {r}"));
                    }
                }
            }
        }
    }
    if let Some(labels) = obj["labels"].as_array() {
        for (i, label) in labels.iter().enumerate() {
            match label.as_object() {
                None => v.push(format!("labels[{i}] must be an object")),
                Some(l) => {
                    if !l.get("predicted").is_some_and(Value::is_boolean) {
                        v.push(format!("labels[{i}].predicted must be a boolean"));
                    }
                    if !l.get("evidence").is_some_and(Value::is_array) {
                        v.push(format!("labels[{i}].evidence must be an array"));
                    }
                }
            }
        }
    }
    if !v.is_empty() {
        return fail(v);
    }

    match serde_json::from_value::<DecisionRecord>(value.clone()) {
        Ok(record) => validate_record(&record, limits),
        Err(e) => fail(vec![format!("record does not decode as v1: {e}")]),
    }
}

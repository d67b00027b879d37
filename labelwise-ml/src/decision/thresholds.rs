//! Threshold policy collaborator: probability to boolean, with provenance.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::ThresholdConfig;

/// Built-in fallback when neither a per-label nor a global threshold is set.
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// Where a threshold came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThresholdSource {
    #[serde(rename = "per_label")]
    PerLabel,
    #[serde(rename = "global")]
    Global,
    #[serde(rename = "default_0.5")]
    Default,
}

impl ThresholdSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PerLabel => "per_label",
            Self::Global => "global",
            Self::Default => "default_0.5",
        }
    }
}

impl std::fmt::Display for ThresholdSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Threshold {
    pub value: f64,
    pub source: ThresholdSource,
}

/// Maps calibrated probabilities to predictions.
pub trait ThresholdPolicy: Send + Sync {
    fn threshold_for(&self, label: &str) -> Threshold;

    /// A label is predicted when its calibrated probability reaches the threshold.
    fn decide(&self, label: &str, calibrated: f64) -> (Threshold, bool) {
        let t = self.threshold_for(label);
        (t, calibrated >= t.value)
    }
}

/// Per-label table with a global fallback.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableThresholds {
    per_label: BTreeMap<String, f64>,
    global: Option<f64>,
}

impl TableThresholds {
    pub fn new(per_label: BTreeMap<String, f64>, global: Option<f64>) -> Self {
        Self { per_label, global }
    }

    pub fn global(value: f64) -> Self {
        Self::new(BTreeMap::new(), Some(value))
    }

    pub fn with_label(mut self, label: &str, value: f64) -> Self {
        self.per_label.insert(label.to_string(), value);
        self
    }
}

impl From<&ThresholdConfig> for TableThresholds {
    fn from(config: &ThresholdConfig) -> Self {
        Self::new(config.per_label.clone(), config.global)
    }
}

impl ThresholdPolicy for TableThresholds {
    fn threshold_for(&self, label: &str) -> Threshold {
        if let Some(&value) = self.per_label.get(label) {
            Threshold {
                value,
                source: ThresholdSource::PerLabel,
            }
        } else if let Some(value) = self.global {
            Threshold {
                value,
                source: ThresholdSource::Global,
            }
        } else {
            Threshold {
                value: DEFAULT_THRESHOLD,
                source: ThresholdSource::Default,
            }
        }
    }
}

//! Abstention policy.
//!
//! Reasons are evaluated in a fixed priority order. Every applicable reason is
//! recorded, so the first entry is the one that wins and the rest are audit
//! context.

use serde::{Deserialize, Serialize};

use crate::config::DecisionConfig;

/// Why a record abstains. Variant order is priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbstainReason {
    /// The record failed validation and the repair pass could not fix it.
    SchemaInvalid,
    /// Empty, whitespace-only, or shorter than the configured minimum.
    InputTooShort,
    /// No label reaches the confidence floor.
    LowConfidence,
    /// The sanitizer reports residual shortcut signals.
    LeakageDetected,
}

impl AbstainReason {
    pub const ALL: [AbstainReason; 4] = [
        Self::SchemaInvalid,
        Self::InputTooShort,
        Self::LowConfidence,
        Self::LeakageDetected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SchemaInvalid => "schema_invalid",
            Self::InputTooShort => "input_too_short",
            Self::LowConfidence => "low_confidence",
            Self::LeakageDetected => "leakage_detected",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == code)
    }
}

impl std::fmt::Display for AbstainReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Facts about one example the policy decides on.
#[derive(Debug, Clone, PartialEq)]
pub struct AbstainSignals {
    pub schema_invalid: bool,
    /// Sanitized input text.
    pub sanitized_text: String,
    /// Calibrated probability per label.
    pub calibrated: Vec<f64>,
    pub residual_leakage: bool,
}

/// Evaluate every abstention check and return the applicable reasons in priority order.
pub fn decide_abstain(signals: &AbstainSignals, policy: &DecisionConfig) -> Vec<AbstainReason> {
    let mut reasons = Vec::new();
    if signals.schema_invalid {
        reasons.push(AbstainReason::SchemaInvalid);
    }
    if signals.sanitized_text.trim().chars().count() < policy.min_input_chars.max(1) {
        reasons.push(AbstainReason::InputTooShort);
    }
    let max_p = signals
        .calibrated
        .iter()
        .copied()
        .filter(|p| !p.is_nan())
        .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |a| a.max(p))));
    if max_p.is_none_or(|p| p < policy.confidence_floor) {
        reasons.push(AbstainReason::LowConfidence);
    }
    if signals.residual_leakage {
        reasons.push(AbstainReason::LeakageDetected);
    }
    reasons
}

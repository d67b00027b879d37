//! Probability calibration collaborator.

use serde::{Deserialize, Serialize};

use crate::inference::backbone::{logit, sigmoid};

/// Description of the calibration applied, embedded in every record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationInfo {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

/// Maps raw probabilities to calibrated probabilities.
pub trait Calibrator: Send + Sync {
    fn calibrate(&self, raw: f64) -> f64;

    fn describe(&self) -> CalibrationInfo;

    fn calibrate_all(&self, raw: &[f64]) -> Vec<f64> {
        raw.iter().map(|&p| self.calibrate(p)).collect()
    }
}

/// Temperature scaling: `sigmoid(logit(p) / T)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureScaling {
    temperature: f64,
}

impl TemperatureScaling {
    pub fn new(temperature: f64) -> Self {
        Self { temperature }
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }
}

impl Default for TemperatureScaling {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl Calibrator for TemperatureScaling {
    fn calibrate(&self, raw: f64) -> f64 {
        if (self.temperature - 1.0).abs() < f64::EPSILON {
            return raw;
        }
        sigmoid(logit(raw) / self.temperature)
    }

    fn describe(&self) -> CalibrationInfo {
        CalibrationInfo {
            method: "temperature_scaling".into(),
            temperature: Some(self.temperature),
        }
    }
}

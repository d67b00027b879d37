//! Backbone-agnostic classifier capability.
//!
//! The attribution engine needs exactly two things from a model: the input
//! embeddings for a token sequence, and a forward pass that accepts those
//! embeddings directly (optionally returning the gradient of one label's logit
//! with respect to them). Everything model-family specific stays behind
//! [`EmbeddingBackbone`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ClassifierError;
use crate::inference::tokenizer::Encoding;

/// Row-major `[tokens, dim]` matrix of embedding vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct Embeddings {
    rows: usize,
    dim: usize,
    data: Vec<f32>,
}

impl Embeddings {
    pub fn new(rows: usize, dim: usize, data: Vec<f32>) -> Result<Self, ClassifierError> {
        if data.len() != rows * dim {
            return Err(ClassifierError::invalid_input(format!(
                "embedding buffer of {} values cannot form a {rows}x{dim} matrix",
                data.len()
            )));
        }
        Ok(Self { rows, dim, data })
    }

    pub fn zeros(rows: usize, dim: usize) -> Self {
        Self {
            rows,
            dim,
            data: vec![0.0; rows * dim],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.dim)
    }

    pub fn row(&self, index: usize) -> &[f32] {
        &self.data[index * self.dim..(index + 1) * self.dim]
    }

    pub fn row_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.data[index * self.dim..(index + 1) * self.dim]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// `baseline + alpha * (self - baseline)`, element-wise.
    pub fn interpolate_from(&self, baseline: &Embeddings, alpha: f32) -> Embeddings {
        let data = self
            .data
            .iter()
            .zip(baseline.data.iter())
            .map(|(x, b)| b + alpha * (x - b))
            .collect();
        Embeddings {
            rows: self.rows,
            dim: self.dim,
            data,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }
}

/// Whether a forward pass should also backpropagate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradMode {
    /// Inference only.
    Disabled,
    /// Backpropagate from this label's logit to the input embeddings.
    Target(usize),
}

/// Output of [`EmbeddingBackbone::forward_from_embeddings`].
#[derive(Debug, Clone)]
pub struct ForwardOutput {
    /// One logit per label.
    pub logits: Vec<f64>,
    /// d(logit[target]) / d(embeddings), present only for [`GradMode::Target`].
    pub input_grad: Option<Embeddings>,
}

/// Identity of the model behind a decision record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_name: String,
    #[serde(default)]
    pub checkpoint: Option<String>,
    pub max_len: usize,
    pub num_labels: usize,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// The two capabilities attribution depends on.
///
/// Implementations must not mutate weights; a backbone is shared read-only
/// across worker threads.
pub trait EmbeddingBackbone: Send + Sync {
    /// Embedding vectors for a token id sequence.
    fn get_input_embeddings(&self, ids: &[u32]) -> Result<Embeddings, ClassifierError>;

    /// Forward pass from embeddings, optionally with input gradients.
    fn forward_from_embeddings(
        &self,
        embeddings: &Embeddings,
        attention_mask: &[bool],
        grad: GradMode,
    ) -> Result<ForwardOutput, ClassifierError>;
}

/// A multi-label classifier exposing its embedding path.
pub trait Classifier: EmbeddingBackbone {
    /// Label names in logit order.
    fn labels(&self) -> &[String];

    /// Model identity for record metadata.
    fn model_info(&self) -> ModelInfo;

    fn num_labels(&self) -> usize {
        self.labels().len()
    }

    /// Raw (uncalibrated) per-label probabilities for a tokenized input.
    fn predict_proba(&self, encoding: &Encoding) -> Result<Vec<f64>, ClassifierError> {
        let embeddings = self.get_input_embeddings(&encoding.ids())?;
        let out =
            self.forward_from_embeddings(&embeddings, &encoding.attention_mask(), GradMode::Disabled)?;
        if out.logits.len() != self.num_labels() {
            return Err(ClassifierError::numerical(format!(
                "expected {} logits, got {}",
                self.num_labels(),
                out.logits.len()
            )));
        }
        if out.logits.iter().any(|l| l.is_nan()) {
            return Err(ClassifierError::numerical("NaN logit"));
        }
        Ok(out.logits.iter().map(|&l| sigmoid(l)).collect())
    }
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Inverse of [`sigmoid`], clamped away from the poles.
pub fn logit(p: f64) -> f64 {
    let p = p.clamp(1e-12, 1.0 - 1e-12);
    (p / (1.0 - p)).ln()
}

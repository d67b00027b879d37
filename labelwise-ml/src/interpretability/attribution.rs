//! Attribution engine: per-token saliency for one label.
//!
//! Both strategies depend only on [`EmbeddingBackbone`]: fetch input
//! embeddings, run a forward pass from them with a gradient target, and score
//! each token by reducing `gradient ⊙ (input - baseline)` over the embedding
//! dimension.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EvidenceConfig;
use crate::error::AttributionError;
use crate::inference::backbone::{EmbeddingBackbone, Embeddings, GradMode};
use crate::inference::tokenizer::Encoding;
use crate::interpretability::integrated_gradients;

/// Attribution strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceMethod {
    /// One backward pass; the production default.
    #[default]
    GradXInput,
    /// Path-averaged gradients; `steps` backward passes, meant for offline analysis.
    IntegratedGradients,
}

impl EvidenceMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GradXInput => "grad_x_input",
            Self::IntegratedGradients => "integrated_gradients",
        }
    }
}

impl std::fmt::Display for EvidenceMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EvidenceMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "grad_x_input" => Ok(Self::GradXInput),
            "integrated_gradients" => Ok(Self::IntegratedGradients),
            other => Err(format!("unknown evidence method `{other}`")),
        }
    }
}

/// Origin of the integrated-gradients path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgBaseline {
    /// Embedding of the padding token at every position.
    #[default]
    Pad,
    /// The all-zero embedding.
    Zero,
}

/// How a per-dimension attribution vector becomes one token score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    /// Signed sum over dimensions.
    #[default]
    Sum,
    /// Euclidean norm; unsigned.
    L2Norm,
}

impl Reduction {
    pub fn apply(self, values: impl Iterator<Item = f64>) -> f64 {
        match self {
            Self::Sum => values.sum(),
            Self::L2Norm => values.map(|v| v * v).sum::<f64>().sqrt(),
        }
    }
}

/// Saliency of one token for one label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenAttribution {
    pub token_index: usize,
    pub start: usize,
    pub end: usize,
    pub score: f64,
    pub label: usize,
    /// Special and padding tokens are scored but never become evidence.
    pub special: bool,
}

/// Configured attribution strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttributionEngine {
    method: EvidenceMethod,
    ig_steps: usize,
    ig_baseline: IgBaseline,
    reduction: Reduction,
}

impl AttributionEngine {
    pub fn new(method: EvidenceMethod) -> Self {
        let defaults = EvidenceConfig::default();
        Self {
            method,
            ig_steps: defaults.ig_steps,
            ig_baseline: defaults.ig_baseline,
            reduction: defaults.reduction,
        }
    }

    pub fn from_config(config: &EvidenceConfig) -> Self {
        Self {
            method: config.method,
            ig_steps: config.ig_steps.max(2),
            ig_baseline: config.ig_baseline,
            reduction: config.reduction,
        }
    }

    pub fn with_steps(mut self, steps: usize) -> Self {
        self.ig_steps = steps.max(2);
        self
    }

    pub fn with_reduction(mut self, reduction: Reduction) -> Self {
        self.reduction = reduction;
        self
    }

    pub fn method(&self) -> EvidenceMethod {
        self.method
    }

    /// Score every token of `encoding` for `label`, in token order.
    ///
    /// Tokens outside the attention mask score zero.
    pub fn attribute<B: EmbeddingBackbone + ?Sized>(
        &self,
        backbone: &B,
        encoding: &Encoding,
        label: usize,
        pad_id: u32,
    ) -> Result<Vec<TokenAttribution>, AttributionError> {
        let ids = encoding.ids();
        let mask = encoding.attention_mask();
        let input = backbone
            .get_input_embeddings(&ids)
            .map_err(|source| AttributionError::Backbone { label, source })?;
        if input.rows() != encoding.len() {
            return Err(AttributionError::ShapeMismatch {
                expected: (encoding.len(), input.dim()),
                actual: input.shape(),
            });
        }

        let scores = match self.method {
            EvidenceMethod::GradXInput => {
                let grad = input_gradient(backbone, &input, &mask, label)?;
                reduce_rows(&grad, &input, None, self.reduction)
            }
            EvidenceMethod::IntegratedGradients => {
                let baseline = match self.ig_baseline {
                    IgBaseline::Pad => backbone
                        .get_input_embeddings(&vec![pad_id; ids.len()])
                        .map_err(|source| AttributionError::Backbone { label, source })?,
                    IgBaseline::Zero => Embeddings::zeros(input.rows(), input.dim()),
                };
                let avg_grad = integrated_gradients::average_path_gradient(
                    backbone,
                    &input,
                    &baseline,
                    &mask,
                    label,
                    self.ig_steps,
                )?;
                reduce_rows(&avg_grad, &input, Some(&baseline), self.reduction)
            }
        };

        let mut out = Vec::with_capacity(encoding.len());
        for (index, (token, score)) in encoding.tokens.iter().zip(scores).enumerate() {
            let score = if mask[index] { score } else { 0.0 };
            if !score.is_finite() {
                return Err(AttributionError::NonFinite {
                    label,
                    token_index: index,
                });
            }
            out.push(TokenAttribution {
                token_index: index,
                start: token.start,
                end: token.end,
                score,
                label,
                special: token.special,
            });
        }
        debug!(
            label,
            method = %self.method,
            tokens = out.len(),
            "computed token attributions"
        );
        Ok(out)
    }
}

/// Gradient of `label`'s logit with respect to `embeddings`, shape-checked.
pub(crate) fn input_gradient<B: EmbeddingBackbone + ?Sized>(
    backbone: &B,
    embeddings: &Embeddings,
    mask: &[bool],
    label: usize,
) -> Result<Embeddings, AttributionError> {
    let out = backbone
        .forward_from_embeddings(embeddings, mask, GradMode::Target(label))
        .map_err(|source| AttributionError::Backbone { label, source })?;
    if label >= out.logits.len() {
        return Err(AttributionError::LabelOutOfRange {
            label,
            num_labels: out.logits.len(),
        });
    }
    let grad = out
        .input_grad
        .ok_or(AttributionError::MissingGradient { label })?;
    if grad.shape() != embeddings.shape() {
        return Err(AttributionError::ShapeMismatch {
            expected: embeddings.shape(),
            actual: grad.shape(),
        });
    }
    Ok(grad)
}

/// Per token: `reduction(grad ⊙ (input - baseline))`.
fn reduce_rows(
    grad: &Embeddings,
    input: &Embeddings,
    baseline: Option<&Embeddings>,
    reduction: Reduction,
) -> Vec<f64> {
    (0..input.rows())
        .map(|t| {
            let g = grad.row(t);
            let x = input.row(t);
            match baseline {
                None => reduction.apply(g.iter().zip(x).map(|(g, x)| *g as f64 * *x as f64)),
                Some(b) => reduction.apply(
                    g.iter()
                        .zip(x)
                        .zip(b.row(t))
                        .map(|((g, x), b)| *g as f64 * (*x as f64 - *b as f64)),
                ),
            }
        })
        .collect()
}

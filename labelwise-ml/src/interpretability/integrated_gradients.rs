//! Integrated gradients path integral.

use tracing::trace;

use crate::error::AttributionError;
use crate::inference::backbone::{EmbeddingBackbone, Embeddings};
use crate::interpretability::attribution::input_gradient;

/// `steps` evenly spaced interpolation coefficients over `[0, 1]`, endpoints included.
pub fn path_alphas(steps: usize) -> Vec<f32> {
    match steps {
        0 => Vec::new(),
        1 => vec![1.0],
        n => (0..n).map(|i| i as f32 / (n - 1) as f32).collect(),
    }
}

/// Mean gradient of `label`'s logit along the straight path from `baseline`
/// to `input`. Multiply by `input - baseline` to get attributions.
pub fn average_path_gradient<B: EmbeddingBackbone + ?Sized>(
    backbone: &B,
    input: &Embeddings,
    baseline: &Embeddings,
    mask: &[bool],
    label: usize,
    steps: usize,
) -> Result<Embeddings, AttributionError> {
    if baseline.shape() != input.shape() {
        return Err(AttributionError::ShapeMismatch {
            expected: input.shape(),
            actual: baseline.shape(),
        });
    }
    let alphas = path_alphas(steps);
    let (rows, dim) = input.shape();
    let mut total = vec![0.0f64; rows * dim];
    for alpha in &alphas {
        let point = input.interpolate_from(baseline, *alpha);
        let grad = input_gradient(backbone, &point, mask, label)?;
        for (acc, g) in total.iter_mut().zip(grad.as_slice()) {
            *acc += *g as f64;
        }
        trace!(label, alpha, "integrated gradients step");
    }
    let n = alphas.len().max(1) as f64;
    let mut avg = Embeddings::zeros(rows, dim);
    for t in 0..rows {
        for (d, slot) in avg.row_mut(t).iter_mut().enumerate() {
            *slot = (total[t * dim + d] / n) as f32;
        }
    }
    Ok(avg)
}

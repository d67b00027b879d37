//! Bag-of-embeddings reference classifier.
//!
//! `logits = W · tanh(mean_t(e_t)) + b`, mean taken over attending tokens.
//! Small enough to ship as JSON, differentiable in closed form, and exercises
//! exactly the capability surface a transformer backbone would expose.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ClassifierError, ConfigError};
use crate::inference::backbone::{
    Classifier, EmbeddingBackbone, Embeddings, ForwardOutput, GradMode, ModelInfo,
};
use crate::inference::tokenizer::{SPECIAL_TOKENS, WordTokenizer};

/// Serialized weights. `embeddings` has one row per special token followed by
/// one row per `vocab` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BagOfEmbeddingsWeights {
    pub name: String,
    #[serde(default)]
    pub checkpoint: Option<String>,
    pub labels: Vec<String>,
    pub vocab: Vec<String>,
    pub embeddings: Vec<Vec<f32>>,
    /// `[labels][dim]` output projection.
    pub weights: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
}

impl BagOfEmbeddingsWeights {
    /// Lexicon-seeded weights: each `(word, label, strength)` entry pushes the
    /// word's embedding along that label's axis. Words not in the lexicon embed
    /// to zero. `gain` scales the output head and `bias` is shared by all labels.
    pub fn from_lexicon(
        name: &str,
        labels: &[&str],
        lexicon: &[(&str, &str, f32)],
        gain: f32,
        bias: f32,
    ) -> Self {
        let dim = labels.len();
        let mut vocab: Vec<String> = Vec::new();
        for (word, _, _) in lexicon {
            let word = word.to_lowercase();
            if !vocab.contains(&word) {
                vocab.push(word);
            }
        }
        let mut embeddings = vec![vec![0.0f32; dim]; SPECIAL_TOKENS.len() + vocab.len()];
        for (word, label, strength) in lexicon {
            let word = word.to_lowercase();
            let row = SPECIAL_TOKENS.len()
                + vocab.iter().position(|w| *w == word).unwrap_or_default();
            if let Some(axis) = labels.iter().position(|l| l == label) {
                embeddings[row][axis] += strength;
            }
        }
        let weights = (0..dim)
            .map(|l| (0..dim).map(|d| if d == l { gain } else { 0.0 }).collect())
            .collect();
        Self {
            name: name.to_string(),
            checkpoint: None,
            labels: labels.iter().map(|l| l.to_string()).collect(),
            vocab,
            embeddings,
            weights,
            bias: vec![bias; dim],
        }
    }
}

/// Reference classifier over [`BagOfEmbeddingsWeights`].
#[derive(Debug, Clone)]
pub struct BagOfEmbeddingsClassifier {
    name: String,
    checkpoint: Option<String>,
    labels: Vec<String>,
    dim: usize,
    max_len: usize,
    table: Embeddings,
    weights: Vec<Vec<f32>>,
    bias: Vec<f32>,
}

impl BagOfEmbeddingsClassifier {
    /// Validate shapes and build the classifier with its matching tokenizer.
    pub fn from_weights(
        weights: BagOfEmbeddingsWeights,
        max_len: usize,
    ) -> Result<(Self, WordTokenizer), ConfigError> {
        let invalid = |reason: String| ConfigError::Weights {
            path: weights.name.clone(),
            reason,
        };
        let num_labels = weights.labels.len();
        if num_labels == 0 {
            return Err(invalid("no labels".into()));
        }
        let dim = weights.embeddings.first().map(Vec::len).unwrap_or_default();
        if dim == 0 {
            return Err(invalid("empty embedding table".into()));
        }
        if weights.embeddings.iter().any(|r| r.len() != dim) {
            return Err(invalid("ragged embedding table".into()));
        }
        if weights.weights.len() != num_labels || weights.weights.iter().any(|r| r.len() != dim) {
            return Err(invalid(format!(
                "output projection must be {num_labels}x{dim}"
            )));
        }
        if weights.bias.len() != num_labels {
            return Err(invalid(format!("bias must have {num_labels} entries")));
        }

        let tokenizer = WordTokenizer::new(weights.vocab.iter().cloned(), max_len);
        if tokenizer.vocab_size() != weights.embeddings.len() {
            return Err(invalid(format!(
                "tokenizer has {} ids but embedding table has {} rows",
                tokenizer.vocab_size(),
                weights.embeddings.len()
            )));
        }

        let rows = weights.embeddings.len();
        let flat: Vec<f32> = weights.embeddings.iter().flatten().copied().collect();
        let table = Embeddings::new(rows, dim, flat).map_err(|e| invalid(e.to_string()))?;

        Ok((
            Self {
                name: weights.name,
                checkpoint: weights.checkpoint,
                labels: weights.labels,
                dim,
                max_len,
                table,
                weights: weights.weights,
                bias: weights.bias,
            },
            tokenizer,
        ))
    }

    /// Load weights from a JSON file.
    pub fn from_json_file(
        path: &Path,
        max_len: usize,
    ) -> Result<(Self, WordTokenizer), ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Weights {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let mut weights: BagOfEmbeddingsWeights =
            serde_json::from_str(&raw).map_err(|e| ConfigError::Weights {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        if weights.checkpoint.is_none() {
            weights.checkpoint = Some(path.display().to_string());
        }
        Self::from_weights(weights, max_len)
    }

    fn pooled(&self, embeddings: &Embeddings, mask: &[bool]) -> Result<(Vec<f64>, f64), ClassifierError> {
        let count = mask.iter().filter(|m| **m).count();
        if count == 0 {
            return Err(ClassifierError::invalid_input("attention mask selects no tokens"));
        }
        let mut pooled = vec![0.0f64; self.dim];
        for (t, _) in mask.iter().enumerate().filter(|(_, m)| **m) {
            for (acc, v) in pooled.iter_mut().zip(embeddings.row(t)) {
                *acc += *v as f64;
            }
        }
        let n = count as f64;
        Ok((pooled.into_iter().map(|v| (v / n).tanh()).collect(), n))
    }
}

impl EmbeddingBackbone for BagOfEmbeddingsClassifier {
    fn get_input_embeddings(&self, ids: &[u32]) -> Result<Embeddings, ClassifierError> {
        let mut out = Embeddings::zeros(ids.len(), self.dim);
        for (t, &id) in ids.iter().enumerate() {
            let id = id as usize;
            if id >= self.table.rows() {
                return Err(ClassifierError::invalid_input(format!(
                    "token id {id} outside vocabulary of {}",
                    self.table.rows()
                )));
            }
            out.row_mut(t).copy_from_slice(self.table.row(id));
        }
        Ok(out)
    }

    fn forward_from_embeddings(
        &self,
        embeddings: &Embeddings,
        attention_mask: &[bool],
        grad: GradMode,
    ) -> Result<ForwardOutput, ClassifierError> {
        if embeddings.dim() != self.dim || embeddings.rows() != attention_mask.len() {
            return Err(ClassifierError::invalid_input(format!(
                "embeddings {:?} incompatible with dim {} and mask of {}",
                embeddings.shape(),
                self.dim,
                attention_mask.len()
            )));
        }
        let (hidden, n) = self.pooled(embeddings, attention_mask)?;
        let logits: Vec<f64> = self
            .weights
            .iter()
            .zip(&self.bias)
            .map(|(w, b)| {
                w.iter()
                    .zip(&hidden)
                    .map(|(w, h)| *w as f64 * h)
                    .sum::<f64>()
                    + *b as f64
            })
            .collect();

        let input_grad = match grad {
            GradMode::Disabled => None,
            GradMode::Target(label) => {
                let w = self.weights.get(label).ok_or_else(|| {
                    ClassifierError::invalid_input(format!("label {label} out of range"))
                })?;
                // d logit / d e_t = W[label] * (1 - h^2) / n for attending tokens.
                let per_dim: Vec<f32> = w
                    .iter()
                    .zip(&hidden)
                    .map(|(w, h)| (*w as f64 * (1.0 - h * h) / n) as f32)
                    .collect();
                let mut g = Embeddings::zeros(embeddings.rows(), self.dim);
                for (t, _) in attention_mask.iter().enumerate().filter(|(_, m)| **m) {
                    g.row_mut(t).copy_from_slice(&per_dim);
                }
                Some(g)
            }
        };

        Ok(ForwardOutput { logits, input_grad })
    }
}

impl Classifier for BagOfEmbeddingsClassifier {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn model_info(&self) -> ModelInfo {
        let mut extra = std::collections::BTreeMap::new();
        extra.insert("architecture".to_string(), serde_json::json!("bag_of_embeddings"));
        extra.insert("embedding_dim".to_string(), serde_json::json!(self.dim));
        ModelInfo {
            model_name: self.name.clone(),
            checkpoint: self.checkpoint.clone(),
            max_len: self.max_len,
            num_labels: self.labels.len(),
            extra,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::tokenizer::Tokenizer;

    fn model() -> (BagOfEmbeddingsClassifier, WordTokenizer) {
        let weights = BagOfEmbeddingsWeights::from_lexicon(
            "lexicon-test",
            &["adhd", "anxiety"],
            &[("restless", "adhd", 3.0), ("worry", "anxiety", 3.0)],
            6.0,
            -2.0,
        );
        BagOfEmbeddingsClassifier::from_weights(weights, 64).unwrap()
    }

    #[test]
    fn test_lexicon_word_raises_its_label() {
        let (clf, tok) = model();
        let probs = clf.predict_proba(&tok.encode("so restless today")).unwrap();
        assert!(probs[0] > 0.5, "adhd prob {}", probs[0]);
        assert!(probs[1] < 0.5, "anxiety prob {}", probs[1]);
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let (clf, tok) = model();
        let enc = tok.encode("restless worry");
        let mask = enc.attention_mask();
        let emb = clf.get_input_embeddings(&enc.ids()).unwrap();
        let out = clf
            .forward_from_embeddings(&emb, &mask, GradMode::Target(0))
            .unwrap();
        let grad = out.input_grad.unwrap();

        let eps = 1e-3f32;
        let mut bumped = emb.clone();
        bumped.row_mut(1)[0] += eps;
        let up = clf
            .forward_from_embeddings(&bumped, &mask, GradMode::Disabled)
            .unwrap();
        let numeric = (up.logits[0] - out.logits[0]) / eps as f64;
        assert!((numeric - grad.row(1)[0] as f64).abs() < 1e-2);
    }

    #[test]
    fn test_rejects_ragged_weights() {
        let mut weights = BagOfEmbeddingsWeights::from_lexicon(
            "bad",
            &["a"],
            &[("x", "a", 1.0)],
            1.0,
            0.0,
        );
        weights.bias.push(0.0);
        assert!(BagOfEmbeddingsClassifier::from_weights(weights, 16).is_err());
    }

    #[test]
    fn test_out_of_vocab_id_is_invalid_input() {
        let (clf, _) = model();
        let err = clf.get_input_embeddings(&[999]).unwrap_err();
        assert!(!err.is_fatal());
    }
}

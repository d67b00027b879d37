//! Baseline generator: comparison spans for contextualizing evidence deltas.
//!
//! Every sample draws from its own RNG seeded by `(seed, example_id, label,
//! kind)`, so baselines are reproducible and independent of processing order.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::inference::backbone::Classifier;
use crate::inference::tokenizer::Encoding;
use crate::interpretability::attribution::AttributionEngine;
use crate::interpretability::spans::{EvidenceSpan, SpanBuilder};

use super::faithfulness::{FaithfulnessStatus, FaithfulnessVerifier, LabelVerification};

/// Baseline family. Statistics are never pooled across kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineKind {
    /// Spans of the same token lengths at uniformly random positions.
    RandomSpan,
    /// Evidence computed for a different random label, scored against the original one.
    LabelShuffle,
}

impl BaselineKind {
    pub const ALL: [BaselineKind; 2] = [Self::RandomSpan, Self::LabelShuffle];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RandomSpan => "random_span",
            Self::LabelShuffle => "label_shuffle",
        }
    }
}

impl std::fmt::Display for BaselineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One baseline draw, already passed through the deletion test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineSample {
    pub kind: BaselineKind,
    pub label: usize,
    /// Label the spans were computed for (label shuffle only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_label: Option<usize>,
    pub spans: Vec<(usize, usize)>,
    pub span_deltas: Vec<Option<f64>>,
    /// Union deletion delta; `None` when it could not be computed.
    pub delta: Option<f64>,
    pub passes: bool,
    pub status: FaithfulnessStatus,
}

impl BaselineSample {
    fn from_verification(
        kind: BaselineKind,
        source_label: Option<usize>,
        spans: &[EvidenceSpan],
        v: &LabelVerification,
    ) -> Self {
        let summary = v.summary();
        Self {
            kind,
            label: v.label,
            source_label,
            spans: spans.iter().map(|s| (s.start, s.end)).collect(),
            span_deltas: summary.span_deltas,
            // No spans deletes nothing: a zero delta that cannot pass.
            delta: if spans.is_empty() {
                Some(0.0)
            } else {
                v.union_delta
            },
            passes: v.passes && !spans.is_empty(),
            status: v.status,
        }
    }
}

/// Deterministic seed for one `(seed, parts...)` combination.
pub fn derive_seed(seed: u64, parts: &[&str]) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_le_bytes());
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

pub fn sample_rng(seed: u64, example_id: &str, label: usize, kind: BaselineKind) -> StdRng {
    StdRng::seed_from_u64(derive_seed(
        seed,
        &[example_id, &label.to_string(), kind.as_str()],
    ))
}

/// Random spans matching each evidence span's token length.
///
/// Positions are drawn uniformly over runs of consecutive non-special tokens;
/// a span longer than the input is capped at the input length.
pub fn random_spans(
    encoding: &Encoding,
    evidence: &[EvidenceSpan],
    label: usize,
    rng: &mut StdRng,
) -> Vec<EvidenceSpan> {
    let content: Vec<usize> = encoding
        .tokens
        .iter()
        .enumerate()
        .filter(|(_, t)| !t.special && t.start < t.end)
        .map(|(i, _)| i)
        .collect();
    if content.is_empty() {
        return Vec::new();
    }
    evidence
        .iter()
        .map(|span| {
            let want = span
                .token_indices
                .len()
                .max(encoding.tokens_in_range(span.start, span.end).len())
                .clamp(1, content.len());
            let first = rng.gen_range(0..=content.len() - want);
            let indices = content[first..first + want].to_vec();
            EvidenceSpan {
                start: encoding.tokens[indices[0]].start,
                end: encoding.tokens[indices[want - 1]].end,
                token_indices: indices,
                score: 0.0,
                label,
            }
        })
        .collect()
}

/// A label other than `label`, or `None` with fewer than two labels.
pub fn shuffled_label(num_labels: usize, label: usize, rng: &mut StdRng) -> Option<usize> {
    if num_labels < 2 {
        return None;
    }
    let pick = rng.gen_range(0..num_labels - 1);
    Some(if pick >= label { pick + 1 } else { pick })
}

/// Produces both baseline kinds for one (example, label).
pub struct BaselineGenerator<'a> {
    classifier: &'a dyn Classifier,
    engine: &'a AttributionEngine,
    span_builder: &'a SpanBuilder,
    verifier: &'a FaithfulnessVerifier<'a>,
    pad_id: u32,
    seed: u64,
}

impl<'a> BaselineGenerator<'a> {
    pub fn new(
        classifier: &'a dyn Classifier,
        engine: &'a AttributionEngine,
        span_builder: &'a SpanBuilder,
        verifier: &'a FaithfulnessVerifier<'a>,
        pad_id: u32,
        seed: u64,
    ) -> Self {
        Self {
            classifier,
            engine,
            span_builder,
            verifier,
            pad_id,
            seed,
        }
    }

    pub fn random_span(
        &self,
        example_id: &str,
        text: &str,
        encoding: &Encoding,
        evidence: &[EvidenceSpan],
        label: usize,
    ) -> Option<BaselineSample> {
        let mut rng = sample_rng(self.seed, example_id, label, BaselineKind::RandomSpan);
        let spans = random_spans(encoding, evidence, label, &mut rng);
        self.evaluate(BaselineKind::RandomSpan, None, text, encoding, &spans, label)
    }

    pub fn label_shuffle(
        &self,
        example_id: &str,
        text: &str,
        encoding: &Encoding,
        label: usize,
    ) -> Option<BaselineSample> {
        let mut rng = sample_rng(self.seed, example_id, label, BaselineKind::LabelShuffle);
        let other = shuffled_label(self.classifier.num_labels(), label, &mut rng)?;
        let attributions = match self
            .engine
            .attribute(self.classifier, encoding, other, self.pad_id)
        {
            Ok(a) => a,
            Err(e) => {
                warn!(example_id, label, source_label = other, error = %e, "label-shuffle attribution failed");
                return None;
            }
        };
        let spans = self
            .span_builder
            .build(&attributions, text.chars().count());
        self.evaluate(BaselineKind::LabelShuffle, Some(other), text, encoding, &spans, label)
    }

    fn evaluate(
        &self,
        kind: BaselineKind,
        source_label: Option<usize>,
        text: &str,
        encoding: &Encoding,
        spans: &[EvidenceSpan],
        label: usize,
    ) -> Option<BaselineSample> {
        match self.verifier.verify_label(text, encoding, spans, label) {
            Ok(v) => {
                let sample = BaselineSample::from_verification(kind, source_label, spans, &v);
                debug!(kind = kind.as_str(), label, delta = ?sample.delta, "baseline evaluated");
                Some(sample)
            }
            Err(e) => {
                warn!(kind = kind.as_str(), label, error = %e, "baseline not computed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::tokenizer::{Tokenizer, WordTokenizer};

    fn evidence(token_indices: Vec<usize>) -> EvidenceSpan {
        EvidenceSpan {
            start: 0,
            end: 1,
            token_indices,
            score: 1.0,
            label: 0,
        }
    }

    #[test]
    fn test_same_seed_same_spans() {
        let tok = WordTokenizer::new(Vec::<String>::new(), 64);
        let enc = tok.encode("one two three four five six seven");
        let ev = vec![evidence(vec![1, 2])];
        let a = random_spans(&enc, &ev, 0, &mut sample_rng(7, "ex", 0, BaselineKind::RandomSpan));
        let b = random_spans(&enc, &ev, 0, &mut sample_rng(7, "ex", 0, BaselineKind::RandomSpan));
        assert_eq!(a, b);
        assert_eq!(a[0].token_indices.len(), 2);
        assert!(a[0].start < a[0].end);
    }

    #[test]
    fn test_random_spans_cover_consecutive_content_tokens() {
        let tok = WordTokenizer::new(Vec::<String>::new(), 64);
        let text = "alpha beta gamma delta";
        let enc = tok.encode(text);
        for seed in 0..20 {
            let spans = random_spans(
                &enc,
                &[evidence(vec![1, 2, 3])],
                0,
                &mut sample_rng(seed, "x", 0, BaselineKind::RandomSpan),
            );
            let s = &spans[0];
            assert!(s.end <= text.chars().count());
            assert!(s.token_indices.windows(2).all(|w| w[1] == w[0] + 1));
            assert!(s.token_indices.iter().all(|i| !enc.tokens[*i].special));
        }
    }

    #[test]
    fn test_oversized_span_is_capped() {
        let tok = WordTokenizer::new(Vec::<String>::new(), 64);
        let enc = tok.encode("just two");
        let spans = random_spans(
            &enc,
            &[evidence(vec![1, 2, 3, 4, 5])],
            0,
            &mut sample_rng(1, "x", 0, BaselineKind::RandomSpan),
        );
        assert_eq!(spans[0].token_indices, vec![1, 2]);
        assert_eq!((spans[0].start, spans[0].end), (0, 8));
    }

    #[test]
    fn test_empty_input_yields_no_spans() {
        let tok = WordTokenizer::new(Vec::<String>::new(), 64);
        let enc = tok.encode("");
        let spans = random_spans(
            &enc,
            &[evidence(vec![1])],
            0,
            &mut sample_rng(1, "x", 0, BaselineKind::RandomSpan),
        );
        assert!(spans.is_empty());
    }

    #[test]
    fn test_shuffled_label_differs() {
        let mut rng = sample_rng(3, "x", 0, BaselineKind::LabelShuffle);
        for label in 0..4 {
            for _ in 0..10 {
                let other = shuffled_label(4, label, &mut rng).unwrap();
                assert_ne!(other, label);
                assert!(other < 4);
            }
        }
        assert_eq!(shuffled_label(1, 0, &mut rng), None);
    }

    #[test]
    fn test_derive_seed_separates_parts() {
        assert_ne!(derive_seed(1, &["ab", "c"]), derive_seed(1, &["a", "bc"]));
        assert_ne!(derive_seed(1, &["a"]), derive_seed(2, &["a"]));
        assert_eq!(derive_seed(9, &["x", "y"]), derive_seed(9, &["x", "y"]));
    }
}

//! Property-based tests for spans, the contract and the statistics.

mod common;

use proptest::prelude::*;

use labelwise_ml::config::FaithfulnessConfig;
use labelwise_ml::contract::validate_record;
use labelwise_ml::eval::faithfulness::label_passes;
use labelwise_ml::eval::stats::dominance_rate;
use labelwise_ml::eval::{BaselineKind, PairedComparison};
use labelwise_ml::interpretability::{SpanBuilder, TokenAttribution, TokenSelection};
use labelwise_ml::{InputExample, LabelwiseConfig, ValidationLimits};

use common::lexicon_engine;

/// Attributions over tokens laid out left to right, separated by one space.
fn layout(widths: &[usize], scores: &[f64]) -> (Vec<TokenAttribution>, usize) {
    let mut cursor = 0;
    let attributions = widths
        .iter()
        .zip(scores)
        .enumerate()
        .map(|(i, (w, s))| {
            let a = TokenAttribution {
                token_index: i + 1,
                start: cursor,
                end: cursor + w,
                score: *s,
                label: 0,
                special: false,
            };
            cursor += w + 1;
            a
        })
        .collect();
    (attributions, cursor.saturating_sub(1))
}

fn text_strategy() -> impl Strategy<Value = String> {
    let words = vec![
        "restless", "distracted", "fidget", "worry", "panic", "hopeless", "empty", "the",
        "and", "today", "I", "feel", ",", "!", "really",
    ];
    prop::collection::vec(prop::sample::select(words), 0..14).prop_map(|w| w.join(" "))
}

// --- Span builder properties ---

proptest! {
    #[test]
    fn spans_stay_in_bounds_within_budget_and_disjoint(
        tokens in prop::collection::vec((1usize..6, -4.0f64..4.0), 1..30),
        top_k in 1usize..12,
        max_spans in 1usize..5,
        gap_tolerance in 0usize..3,
        positive in any::<bool>(),
    ) {
        let widths: Vec<usize> = tokens.iter().map(|(w, _)| *w).collect();
        let scores: Vec<f64> = tokens.iter().map(|(_, s)| *s).collect();
        let (attributions, text_len) = layout(&widths, &scores);
        let builder = SpanBuilder {
            top_k,
            max_spans,
            gap_tolerance,
            selection: if positive { TokenSelection::Positive } else { TokenSelection::Absolute },
        };
        let spans = builder.build(&attributions, text_len);

        prop_assert!(spans.len() <= max_spans);
        for span in &spans {
            prop_assert!(span.start < span.end);
            prop_assert!(span.end <= text_len);
            prop_assert!(!span.token_indices.is_empty());
        }
        for (i, a) in spans.iter().enumerate() {
            for b in &spans[i + 1..] {
                prop_assert!(!a.overlaps(b), "{:?} overlaps {:?}", a, b);
            }
        }
    }

    #[test]
    fn spans_are_deterministic(
        tokens in prop::collection::vec((1usize..6, -4.0f64..4.0), 1..20),
    ) {
        let widths: Vec<usize> = tokens.iter().map(|(w, _)| *w).collect();
        let scores: Vec<f64> = tokens.iter().map(|(_, s)| *s).collect();
        let (attributions, text_len) = layout(&widths, &scores);
        let builder = SpanBuilder::default();
        prop_assert_eq!(builder.build(&attributions, text_len), builder.build(&attributions, text_len));
    }
}

// --- Faithfulness and statistics properties ---

proptest! {
    #[test]
    fn label_pass_rule_matches_definition(
        deltas in prop::collection::vec(-0.5f64..1.0, 0..8),
        any_min in 0.0f64..0.5,
        all_min in 0.0f64..0.5,
    ) {
        let config = FaithfulnessConfig {
            any_span_min_delta: any_min,
            all_span_min_delta: all_min,
            ..FaithfulnessConfig::default()
        };
        let expected = !deltas.is_empty()
            && (deltas.iter().any(|d| *d >= any_min) || deltas.iter().all(|d| *d >= all_min));
        prop_assert_eq!(label_passes(&deltas, &config), expected);
    }

    #[test]
    fn dominance_rate_is_a_fraction(
        pairs in prop::collection::vec((-1.0f64..1.0, -1.0f64..1.0), 0..60),
    ) {
        let comparisons: Vec<PairedComparison> = pairs
            .iter()
            .enumerate()
            .map(|(i, (e, b))| {
                PairedComparison::new(format!("ex{i}"), "adhd", BaselineKind::LabelShuffle, (*e, false), (*b, false))
            })
            .collect();
        let rate = dominance_rate(&comparisons);
        prop_assert!((0.0..=1.0).contains(&rate));
        let wins = pairs.iter().filter(|(e, b)| e > b).count();
        if !pairs.is_empty() {
            prop_assert!((rate - wins as f64 / pairs.len() as f64).abs() < 1e-12);
        }
    }
}

// --- End-to-end record properties ---

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn every_record_is_valid_and_abstain_matches_reasons(text in text_strategy()) {
        let config = LabelwiseConfig::default();
        let limits = ValidationLimits::from(&config);
        let engine = lexicon_engine(config);
        let record = engine.infer(&InputExample::new(text)).unwrap();

        prop_assert!(validate_record(&record, &limits).is_ok());
        prop_assert_eq!(record.abstain.is_abstain, !record.abstain.reasons.is_empty());
        for label in &record.labels {
            prop_assert!(label.evidence.len() <= limits.max_spans);
            prop_assert_eq!(label.predicted, label.calibrated_probability >= label.threshold);
            for e in &label.evidence {
                prop_assert!(e.start < e.end && e.end <= record.metadata.input_chars);
            }
            if let Some(f) = &label.faithfulness {
                prop_assert_eq!(f.span_deltas.len(), label.evidence.len());
            }
        }
    }
}

mod common;

use std::sync::Arc;

use labelwise_ml::eval::{AuditReport, BaselineKind};
use labelwise_ml::{InputExample, LabelwiseConfig, LabelwiseError};
use pretty_assertions::assert_eq;

use common::*;

fn corpus() -> Vec<InputExample> {
    [
        "so restless and distracted at work",
        "constant worry, panic at night",
        "everything feels hopeless and empty",
        "hi",
        "I fidget all day and worry about it",
        "",
        "restless restless restless",
        "nothing in particular",
    ]
    .iter()
    .enumerate()
    .map(|(i, t)| InputExample::with_id(format!("ex{i}"), *t))
    .collect()
}

fn json_lines(records: &[labelwise_ml::DecisionRecord]) -> Vec<String> {
    records.iter().map(|r| r.to_json_line().unwrap()).collect()
}

#[test]
fn batch_output_is_independent_of_worker_count() {
    let mut single = LabelwiseConfig::default();
    single.runtime.workers = 1;
    let mut many = LabelwiseConfig::default();
    many.runtime.workers = 4;

    let a = lexicon_engine(single).run_batch(&corpus()).unwrap();
    let b = lexicon_engine(many).run_batch(&corpus()).unwrap();
    assert_eq!(json_lines(&a.records), json_lines(&b.records));
}

#[test]
fn batch_preserves_input_order() {
    let output = lexicon_engine(LabelwiseConfig::default())
        .run_batch(&corpus())
        .unwrap();
    let ids: Vec<_> = output.records.iter().map(|r| r.example_id.clone()).collect();
    let expected: Vec<_> = (0..8).map(|i| format!("ex{i}")).collect();
    assert_eq!(ids, expected);
    assert!(output.skipped.is_empty());
}

#[test]
fn repeated_inference_is_byte_identical() {
    let engine = lexicon_engine(LabelwiseConfig::default());
    let example = InputExample::new("so restless and distracted at work");
    let first = engine.infer(&example).unwrap().to_json_line().unwrap();
    let second = engine.infer(&example).unwrap().to_json_line().unwrap();
    assert_eq!(first, second);
}

#[test]
fn per_example_failure_is_skipped_not_fatal() {
    let engine = scripted_engine(
        &[("adhd", 0.9, 0.6), ("anxiety", 0.1, 0.1)],
        LabelwiseConfig::default(),
    );
    let examples = vec![
        InputExample::with_id("a", "first trigger example"),
        InputExample::with_id("b", "a poison pill"),
        InputExample::with_id("c", "another trigger example"),
    ];
    let output = engine.run_batch(&examples).unwrap();
    assert_eq!(output.records.len(), 2);
    assert_eq!(output.skipped.len(), 1);
    assert_eq!(output.skipped[0].index, 1);
    assert_eq!(output.skipped[0].example_id, "b");
    assert_eq!(output.records[1].example_id, "c");
}

#[test]
fn unavailable_backend_aborts_the_batch() {
    let tok = scripted_tokenizer();
    let clf = ScriptedClassifier::new(&tok, &[("adhd", 0.9, 0.6)]).unavailable();
    let engine = engine_with(Arc::new(clf), Arc::new(tok), LabelwiseConfig::default());
    let err = engine.run_batch(&corpus()).unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, LabelwiseError::Classifier(_)));
    assert!(engine.infer(&InputExample::new("some text")).is_err());
}

#[test]
fn audit_is_deterministic_for_a_fixed_seed() {
    let engine = lexicon_engine(LabelwiseConfig::default());
    let first = engine.audit_batch(&corpus()).unwrap();
    let second = engine.audit_batch(&corpus()).unwrap();
    assert_eq!(first.rows, second.rows);
    assert_eq!(first.comparisons, second.comparisons);

    let config = engine.config();
    let a = AuditReport::from_run(&first, config.evidence.method, &config.baselines);
    let b = AuditReport::from_run(&second, config.evidence.method, &config.baselines);
    assert_eq!(a.baselines, b.baselines);
    assert_ne!(a.run_id, b.run_id);
}

#[test]
fn audit_rows_carry_method_and_baselines() {
    let engine = lexicon_engine(LabelwiseConfig::default());
    let run = engine.audit_batch(&corpus()).unwrap();
    assert_eq!(run.examples, 8);
    assert!(!run.rows.is_empty());
    for row in &run.rows {
        assert_eq!(row.metadata.evidence_method, engine.config().evidence.method);
        assert_eq!(row.faithfulness.span_deltas.len(), row.evidence.len());
        assert!(row.baselines.len() <= 2);
        for e in &row.evidence {
            assert!(e.start < e.end);
        }
    }
    let json = serde_json::to_value(&run.rows[0]).unwrap();
    assert!(json["metadata"]["evidence_method"].is_string());
}

#[test]
fn audit_skips_examples_that_fail() {
    let engine = scripted_engine(
        &[("adhd", 0.9, 0.6), ("anxiety", 0.4, 0.4)],
        LabelwiseConfig::default(),
    );
    let run = engine
        .audit_batch(&[
            InputExample::with_id("a", "trigger then some more words"),
            InputExample::with_id("b", "poison"),
        ])
        .unwrap();
    assert_eq!(run.skipped.len(), 1);
    assert_eq!(run.skipped[0].example_id, "b");
    assert!(run.rows.iter().all(|r| r.example_id == "a"));
}

#[test]
fn audit_keeps_label_shuffle_pair_when_shuffled_label_is_silent() {
    // "anxiety" carries no weight on any token, so its spans are empty.
    let engine = scripted_engine(
        &[("adhd", 0.90, 0.60), ("anxiety", 0.10, 0.10)],
        LabelwiseConfig::default(),
    );
    let run = engine
        .audit_batch(&[InputExample::with_id("a", "I feel trigger all the time")])
        .unwrap();

    let count = |kind| run.comparisons.iter().filter(|c| c.kind == kind).count();
    assert_eq!(count(BaselineKind::LabelShuffle), 1);
    assert_eq!(count(BaselineKind::LabelShuffle), count(BaselineKind::RandomSpan));

    let shuffled = run
        .comparisons
        .iter()
        .find(|c| c.kind == BaselineKind::LabelShuffle)
        .unwrap();
    assert_eq!(shuffled.label, "adhd");
    assert_eq!(shuffled.baseline_delta, 0.0);
    assert!(!shuffled.baseline_passes);
    assert!(shuffled.dominant);
}

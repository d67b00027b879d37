#![allow(dead_code)]

use std::sync::Arc;

use labelwise_ml::decision::TableThresholds;
use labelwise_ml::error::ClassifierError;
use labelwise_ml::inference::backbone::logit;
use labelwise_ml::inference::{
    BagOfEmbeddingsClassifier, BagOfEmbeddingsWeights, CalibrationInfo, Calibrator, Classifier,
    EmbeddingBackbone, Embeddings, ForwardOutput, GradMode, ModelInfo, TemperatureScaling,
    Tokenizer, WordTokenizer,
};
use labelwise_ml::safety::RegexSanitizer;
use labelwise_ml::{DecisionEngine, LabelwiseConfig};

pub const LABELS: [&str; 3] = ["adhd", "anxiety", "depression"];

pub fn lexicon_model() -> (BagOfEmbeddingsClassifier, WordTokenizer) {
    let weights = BagOfEmbeddingsWeights::from_lexicon(
        "lexicon-fixture",
        &LABELS,
        &[
            ("restless", "adhd", 3.0),
            ("distracted", "adhd", 2.5),
            ("fidget", "adhd", 2.0),
            ("worry", "anxiety", 3.0),
            ("panic", "anxiety", 2.5),
            ("hopeless", "depression", 3.0),
            ("empty", "depression", 2.0),
        ],
        6.0,
        -2.0,
    );
    BagOfEmbeddingsClassifier::from_weights(weights, 128).expect("fixture weights are valid")
}

/// Engine over the lexicon model with reference collaborators.
pub fn lexicon_engine(config: LabelwiseConfig) -> DecisionEngine {
    let (clf, tok) = lexicon_model();
    engine_with(Arc::new(clf), Arc::new(tok), config)
}

pub fn engine_with(
    classifier: Arc<dyn Classifier>,
    tokenizer: Arc<dyn Tokenizer>,
    config: LabelwiseConfig,
) -> DecisionEngine {
    let calibrator = Arc::new(TemperatureScaling::new(config.calibration.temperature));
    engine_with_calibrator(classifier, tokenizer, calibrator, config)
}

pub fn engine_with_calibrator(
    classifier: Arc<dyn Classifier>,
    tokenizer: Arc<dyn Tokenizer>,
    calibrator: Arc<dyn Calibrator>,
    config: LabelwiseConfig,
) -> DecisionEngine {
    DecisionEngine::new(
        classifier,
        tokenizer,
        calibrator,
        Arc::new(TableThresholds::from(&config.thresholds)),
        Arc::new(RegexSanitizer::new(&config.sanitization).expect("sanitizer config")),
        config,
    )
    .expect("engine config")
}

/// Classifier whose probabilities are scripted per label.
///
/// Every token embeds to a single scalar: 1.0 for the trigger word, 0.0 for
/// everything else (including `[MASK]`). Label `l` has logit
/// `base[l] + weight[l] * sum(trigger)`, so masking the trigger moves the
/// probability from `with_trigger[l]` to `without_trigger[l]`.
#[derive(Debug, Clone)]
pub struct ScriptedClassifier {
    labels: Vec<String>,
    base: Vec<f64>,
    weight: Vec<f64>,
    trigger_id: u32,
    poison_id: Option<u32>,
    unavailable: bool,
}

pub const TRIGGER: &str = "trigger";
pub const POISON: &str = "poison";

impl ScriptedClassifier {
    /// `(label, p with trigger present once, p with trigger masked)`.
    pub fn new(tokenizer: &WordTokenizer, script: &[(&str, f64, f64)]) -> Self {
        Self {
            labels: script.iter().map(|(l, _, _)| l.to_string()).collect(),
            base: script.iter().map(|(_, _, without)| logit(*without)).collect(),
            weight: script
                .iter()
                .map(|(_, with, without)| logit(*with) - logit(*without))
                .collect(),
            trigger_id: tokenizer.token_id(TRIGGER),
            poison_id: Some(tokenizer.token_id(POISON)),
            unavailable: false,
        }
    }

    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }
}

pub fn scripted_tokenizer() -> WordTokenizer {
    WordTokenizer::new([TRIGGER.to_string(), POISON.to_string()], 64)
}

impl EmbeddingBackbone for ScriptedClassifier {
    fn get_input_embeddings(&self, ids: &[u32]) -> Result<Embeddings, ClassifierError> {
        if self.unavailable {
            return Err(ClassifierError::unavailable("scripted backend offline"));
        }
        if let Some(poison) = self.poison_id
            && ids.contains(&poison)
        {
            return Err(ClassifierError::invalid_input("poisoned input"));
        }
        let data = ids
            .iter()
            .map(|id| if *id == self.trigger_id { 1.0 } else { 0.0 })
            .collect();
        Embeddings::new(ids.len(), 1, data)
    }

    fn forward_from_embeddings(
        &self,
        embeddings: &Embeddings,
        attention_mask: &[bool],
        grad: GradMode,
    ) -> Result<ForwardOutput, ClassifierError> {
        let signal: f64 = attention_mask
            .iter()
            .enumerate()
            .filter(|(_, m)| **m)
            .map(|(t, _)| embeddings.row(t)[0] as f64)
            .sum();
        let logits = self
            .base
            .iter()
            .zip(&self.weight)
            .map(|(b, w)| b + w * signal)
            .collect();
        let input_grad = match grad {
            GradMode::Disabled => None,
            GradMode::Target(label) => {
                let w = self.weight[label] as f32;
                let mut g = Embeddings::zeros(embeddings.rows(), 1);
                for (t, _) in attention_mask.iter().enumerate().filter(|(_, m)| **m) {
                    g.row_mut(t)[0] = w;
                }
                Some(g)
            }
        };
        Ok(ForwardOutput { logits, input_grad })
    }
}

impl Classifier for ScriptedClassifier {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            model_name: "scripted".into(),
            max_len: 64,
            num_labels: self.labels.len(),
            ..ModelInfo::default()
        }
    }
}

/// Engine over a [`ScriptedClassifier`].
pub fn scripted_engine(script: &[(&str, f64, f64)], config: LabelwiseConfig) -> DecisionEngine {
    let tok = scripted_tokenizer();
    let clf = ScriptedClassifier::new(&tok, script);
    engine_with(Arc::new(clf), Arc::new(tok), config)
}

/// Calibrator that turns one label's probability into NaN.
#[derive(Debug, Clone, Copy)]
pub struct BrokenCalibrator;

impl Calibrator for BrokenCalibrator {
    fn calibrate(&self, raw: f64) -> f64 {
        raw
    }

    fn describe(&self) -> CalibrationInfo {
        CalibrationInfo {
            method: "broken".into(),
            temperature: None,
        }
    }

    fn calibrate_all(&self, raw: &[f64]) -> Vec<f64> {
        raw.iter()
            .enumerate()
            .map(|(i, p)| if i == 0 { f64::NAN } else { *p })
            .collect()
    }
}

//! Inference collaborators: classifier capability, tokenizer, calibration.

pub mod backbone;
pub mod backends;
pub mod calibration;
pub mod tokenizer;

pub use backbone::{
    Classifier, EmbeddingBackbone, Embeddings, ForwardOutput, GradMode, ModelInfo, sigmoid,
};
pub use backends::{BagOfEmbeddingsClassifier, BagOfEmbeddingsWeights};
pub use calibration::{CalibrationInfo, Calibrator, TemperatureScaling};
pub use tokenizer::{Encoding, Token, Tokenizer, WordTokenizer};

//! Concrete classifier backends.

pub mod bag_of_embeddings;

pub use bag_of_embeddings::{BagOfEmbeddingsClassifier, BagOfEmbeddingsWeights};

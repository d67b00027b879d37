//! Error types for the labelwise-ml crate.
//!
//! Per-example failures (attribution, span bounds, faithfulness re-inference)
//! are recoverable and never abort a batch. Infrastructure failures (an
//! unavailable classifier, malformed configuration) are fatal and surface to
//! the caller. Abstention is not an error and never appears here.

use thiserror::Error;

/// Top-level error type for labelwise operations.
#[derive(Debug, Error)]
pub enum LabelwiseError {
    #[error("Attribution error: {0}")]
    Attribution(#[from] AttributionError),

    #[error("Span bounds error: {0}")]
    SpanBounds(#[from] SpanBoundsError),

    #[error("Faithfulness computation error: {0}")]
    Faithfulness(#[from] FaithfulnessComputationError),

    #[error("Schema validation error: {0}")]
    Schema(#[from] SchemaValidationError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl LabelwiseError {
    /// Whether this error must abort the whole batch instead of skipping one example.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Classifier(e) => e.is_fatal(),
            Self::Config(_) | Self::Io(_) => true,
            _ => false,
        }
    }
}

/// Errors raised by the classifier collaborator.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClassifierError {
    #[error("classifier unavailable: {message}")]
    Unavailable { message: String },

    #[error("invalid classifier input: {message}")]
    InvalidInput { message: String },

    #[error("numerical failure: {message}")]
    Numerical { message: String },

    #[error("no differentiable path to input embeddings: {message}")]
    NonDifferentiable { message: String },
}

impl ClassifierError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable {
            message: msg.into(),
        }
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: msg.into(),
        }
    }

    pub fn numerical(msg: impl Into<String>) -> Self {
        Self::Numerical {
            message: msg.into(),
        }
    }

    pub fn non_differentiable(msg: impl Into<String>) -> Self {
        Self::NonDifferentiable {
            message: msg.into(),
        }
    }

    /// Only an unreachable collaborator is an infrastructure failure.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Gradient computation failed for one (example, label).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AttributionError {
    #[error("backbone failed while attributing label {label}: {source}")]
    Backbone {
        label: usize,
        #[source]
        source: ClassifierError,
    },

    #[error("backbone returned no gradient for label {label}")]
    MissingGradient { label: usize },

    #[error("gradient shape {actual:?} does not match embeddings {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("non-finite attribution score at token {token_index} for label {label}")]
    NonFinite { label: usize, token_index: usize },

    #[error("label index {label} out of range for {num_labels} labels")]
    LabelOutOfRange { label: usize, num_labels: usize },
}

/// A computed span fell outside the input character range.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("span [{start}, {end}) outside input of {text_len} chars")]
pub struct SpanBoundsError {
    pub start: usize,
    pub end: usize,
    pub text_len: usize,
}

/// Re-inference for a deletion test failed.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("deletion test for label {label} not computed: {reason}")]
pub struct FaithfulnessComputationError {
    pub label: usize,
    pub reason: String,
}

impl FaithfulnessComputationError {
    pub fn new(label: usize, reason: impl Into<String>) -> Self {
        Self {
            label,
            reason: reason.into(),
        }
    }
}

/// A record failed contract validation.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{} schema violation(s): {}", violations.len(), violations.join("; "))]
pub struct SchemaValidationError {
    pub violations: Vec<String>,
}

/// Malformed or unloadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: String, reason: String },

    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("failed to load model weights from {path}: {reason}")]
    Weights { path: String, reason: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

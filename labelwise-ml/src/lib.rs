//! # labelwise-ml: Evidence & Decision Layer
//!
//! Turns a multi-label classifier's per-label probabilities into an auditable
//! decision record: gradient-based token attribution, contiguous evidence
//! spans, deletion-based faithfulness checks, control baselines with paired
//! statistics, and a schema-validated contract with a prioritized abstention
//! policy.
//!
//! ## Layers
//!
//! 1. **Inference**: collaborator traits (classifier backbone, tokenizer,
//!    calibrator) and reference implementations
//! 2. **Interpretability**: Gradient×Input / Integrated Gradients and span building
//! 3. **Eval**: faithfulness verification, baselines, statistics, audit reports
//! 4. **Contract**: assemble → validate → repair → final state machine
//! 5. **Safety / Decision**: sanitization, abstention, thresholds, label dependencies

// Foundation
pub mod config;
pub mod error;
pub mod runtime;

// Collaborators
pub mod decision;
pub mod inference;
pub mod safety;

// Evidence
pub mod eval;
pub mod interpretability;

// Output
pub mod contract;
pub mod transparency;

pub mod pipeline;

// Re-exports
pub use config::{LabelwiseConfig, load_config, load_config_file};
pub use contract::{DecisionRecord, ValidationLimits, validate_record, validate_value};
pub use error::{ClassifierError, ConfigError, LabelwiseError};
pub use eval::{AuditReport, write_audit, write_jsonl};
pub use pipeline::{AuditRun, BatchOutput, DecisionEngine, InputExample, SkippedExample};
pub use safety::AbstainReason;
pub use transparency::ExplanationGraph;

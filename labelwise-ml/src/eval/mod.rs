//! Evaluation of evidence: deletion tests, control baselines, paired statistics
//! and audit reports.

pub mod baselines;
pub mod faithfulness;
pub mod report;
pub mod stats;

pub use baselines::{BaselineGenerator, BaselineKind, BaselineSample};
pub use faithfulness::{
    FaithfulnessResult, FaithfulnessStatus, FaithfulnessVerifier, LabelFaithfulness,
    LabelVerification, MaskStrategy,
};
pub use report::{AuditArtifacts, AuditReport, write_audit, write_jsonl};
pub use stats::{BootstrapCi, KindStatistics, PairedComparison, aggregate};

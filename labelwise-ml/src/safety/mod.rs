//! Input safety: sanitization and the abstention policy.

pub mod abstain;
pub mod sanitize;

pub use abstain::{AbstainReason, AbstainSignals, decide_abstain};
pub use sanitize::{RegexSanitizer, SanitizationRecord, SanitizedText, Sanitizer};

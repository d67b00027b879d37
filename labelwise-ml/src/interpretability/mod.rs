//! Evidence extraction: token attribution and span building.

pub mod attribution;
pub mod integrated_gradients;
pub mod spans;

pub use attribution::{AttributionEngine, EvidenceMethod, IgBaseline, Reduction, TokenAttribution};
pub use spans::{EvidenceSpan, SpanBuilder, TokenSelection};

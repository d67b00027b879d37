//! Decision contract: schema, validation, repair, and the builder state machine.

pub mod builder;
pub mod repair;
pub mod schema;
#[cfg(test)]
pub(crate) mod test_support;
pub mod validate;

pub use builder::{Assembly, ContractBuilder, ContractOutcome, ContractState, LabelDraft};
pub use repair::{RepairOutcome, repair_record};
pub use schema::{
    Abstain, DecisionRecord, EvidenceEntry, LabelEntry, RecordMetadata, SCHEMA_VERSION,
    example_id_for,
};
pub use validate::{ValidationLimits, round_to, validate_record, validate_value};

//! Core types for the clash client comparison harness
//!
//! This crate holds what both client variants share: the status code
//! mapping, the canonical records every response is normalized into, the
//! aggregation of tests with their latest results, and the chunking of
//! manual suppression requests.

mod aggregate;
pub mod model;
mod status;
mod suppress;

pub use aggregate::{
    aggregate, classify_version_name, is_raw_changeset_id, sort_by_executed_desc,
    AggregatedTestRow, NO_NAMED_VERSION,
};
pub use model::{
    ClashCounts, ClashRecord, ClashResultSet, ClashTestSettings, ClashTestSpec, CreatedTest,
    ManualSuppression, NewSuppressionRule, RuleTemplate, SuppressionRule, SuppressionRuleUpdate,
    TestDefinition, TestRunRequest, TestRunStatus, ValidationResult,
};
pub use status::ValidationStatus;
pub use suppress::{
    chunk_pairs, SuppressAction, SuppressionPlan, SuppressionRequest, CLASH_SUPPRESS_MAX_PAYLOAD,
};

//! Output Validation and Deterministic Repair
//!
//! Everything that inspects model output without calling a model:
//! - Target schema contract and validation
//! - Error classification into a `FailureKind`
//! - Structural JSON repair, field-name normalization, pattern extraction
//! - Semantic scoring for the quality gate
//!
//! ## Design Philosophy
//! - Pure functions of their inputs; no I/O, no shared state
//! - Strict parsing first, repair only what is demonstrably broken

mod classifier;
mod json_repair;
mod normalize;
mod pattern;
mod schema;
mod scoring;

pub use classifier::{Diagnosis, ErrorClassifier, kind_for_violations};
pub use json_repair::{JsonRepairer, Repaired};
pub use normalize::normalize_field_names;
pub use pattern::{extract_fields, mentions_field};
pub use schema::{
    CrossFieldConstraint, FieldKind, FieldSpec, TargetSchema, Violation, ViolationKind, fold_key,
    json_type_name,
};
pub use scoring::{
    HeuristicScorer, Penalty, ScoringConfig, SemanticAssessment, SemanticScorer,
};

//! Error Classification
//!
//! Assigns one [`FailureKind`] to a raw model output. Pure: no side effects,
//! no network calls. A `None` classification means the output parsed and
//! satisfied the schema; semantic judgement belongs to the quality gate.

use serde_json::Value;

use super::schema::{TargetSchema, Violation, ViolationKind};
use crate::types::{Attempt, FailureKind};

/// Full classification result, used to build repair prompts
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnosis {
    pub kind: Option<FailureKind>,
    pub violations: Vec<Violation>,
    /// Strictly parsed value, when parsing succeeded
    pub value: Option<Value>,
    /// Human-readable description of the specific error
    pub message: String,
}

impl Diagnosis {
    pub fn is_valid(&self) -> bool {
        self.kind.is_none()
    }

    /// Fields named by violations of the classified kind
    pub fn offending_fields(&self) -> Vec<&str> {
        let Some(kind) = self.kind else {
            return Vec::new();
        };
        self.violations
            .iter()
            .filter(|v| violation_kind(&v.kind) == kind)
            .map(|v| v.field.as_str())
            .collect()
    }
}

fn violation_kind(kind: &ViolationKind) -> FailureKind {
    match kind {
        ViolationKind::Aliased { .. } => FailureKind::FieldNameMismatch,
        ViolationKind::Missing => FailureKind::MissingRequiredField,
        ViolationKind::WrongType { .. } | ViolationKind::NotAnObject => FailureKind::TypeMismatch,
        ViolationKind::Constraint { .. } => FailureKind::ConstraintViolation,
    }
}

/// Tie-break order when several violations are present. Name mismatches come
/// first: a renamed key would otherwise also read as missing or mistyped.
const PRIORITY: [FailureKind; 4] = [
    FailureKind::FieldNameMismatch,
    FailureKind::MissingRequiredField,
    FailureKind::TypeMismatch,
    FailureKind::ConstraintViolation,
];

/// Pick the kind for a set of schema violations
pub fn kind_for_violations(violations: &[Violation]) -> Option<FailureKind> {
    PRIORITY
        .into_iter()
        .find(|k| violations.iter().any(|v| violation_kind(&v.kind) == *k))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(
        &self,
        raw: &str,
        schema: &TargetSchema,
        prior: Option<&Attempt>,
    ) -> Option<FailureKind> {
        self.diagnose(raw, schema, prior).kind
    }

    pub fn diagnose(&self, raw: &str, schema: &TargetSchema, prior: Option<&Attempt>) -> Diagnosis {
        if raw.trim().is_empty() {
            let kind = if prior.and_then(Attempt::failure) == Some(FailureKind::ModelUnavailable) {
                FailureKind::ModelUnavailable
            } else {
                FailureKind::ParseError
            };
            return Diagnosis {
                kind: Some(kind),
                violations: Vec::new(),
                value: None,
                message: "model returned empty output".into(),
            };
        }

        match serde_json::from_str::<Value>(raw) {
            Ok(value) => self.diagnose_value(value, schema),
            Err(e) => Diagnosis {
                kind: Some(FailureKind::ParseError),
                violations: Vec::new(),
                value: None,
                message: format!("output is not valid JSON: {e}"),
            },
        }
    }

    /// Classify an already-parsed value against the schema
    pub fn diagnose_value(&self, value: Value, schema: &TargetSchema) -> Diagnosis {
        let violations = schema.validate(&value);
        let kind = kind_for_violations(&violations);
        let message = match kind {
            None => String::new(),
            Some(k) => violations
                .iter()
                .filter(|v| violation_kind(&v.kind) == k)
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join("; "),
        };
        Diagnosis {
            kind,
            violations,
            value: Some(value),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::validation::schema::{FieldKind, FieldSpec};
    use crate::types::{ModelTier, Outcome, StrategyUsed};

    fn schema() -> TargetSchema {
        TargetSchema::new(
            "meta",
            vec![
                FieldSpec::new("category", FieldKind::String).with_enum(&["guide", "reference"]),
                FieldSpec::new("pages", FieldKind::Integer).with_range(Some(1.0), None),
            ],
        )
    }

    fn classify(raw: &str) -> Option<FailureKind> {
        ErrorClassifier::new().classify(raw, &schema(), None)
    }

    #[test]
    fn test_valid_output() {
        assert_eq!(classify(r#"{"category": "guide", "pages": 3}"#), None);
    }

    #[test]
    fn test_parse_error() {
        assert_eq!(classify("{category: 'x'"), Some(FailureKind::ParseError));
        assert_eq!(
            classify("```json\n{\"category\": \"guide\", \"pages\": 1}\n```"),
            Some(FailureKind::ParseError)
        );
    }

    #[test]
    fn test_field_name_mismatch_before_type() {
        assert_eq!(
            classify(r#"{"Category": "guide", "pages": "three"}"#),
            Some(FailureKind::FieldNameMismatch)
        );
    }

    #[test]
    fn test_missing_before_type_mismatch() {
        assert_eq!(
            classify(r#"{"pages": "three"}"#),
            Some(FailureKind::MissingRequiredField)
        );
    }

    #[test]
    fn test_type_mismatch_and_not_object() {
        assert_eq!(
            classify(r#"{"category": "guide", "pages": "three"}"#),
            Some(FailureKind::TypeMismatch)
        );
        assert_eq!(classify(r#"["guide"]"#), Some(FailureKind::TypeMismatch));
    }

    #[test]
    fn test_constraint_violation() {
        assert_eq!(
            classify(r#"{"category": "poem", "pages": 0}"#),
            Some(FailureKind::ConstraintViolation)
        );
    }

    #[test]
    fn test_empty_output_after_unavailable() {
        let prior = Attempt {
            attempt_index: 0,
            strategy_used: StrategyUsed::Generation,
            model_tier: Some(ModelTier::Tier1),
            raw_output: String::new(),
            tokens_consumed: 0,
            cost_usd: 0.0,
            latency_ms: 0,
            outcome: Outcome::Failure(FailureKind::ModelUnavailable),
            semantic_score: None,
            note: None,
        };
        let classifier = ErrorClassifier::new();
        assert_eq!(
            classifier.classify("  ", &schema(), Some(&prior)),
            Some(FailureKind::ModelUnavailable)
        );
        assert_eq!(classify(""), Some(FailureKind::ParseError));
    }

    #[test]
    fn test_diagnosis_message_and_fields() {
        let diagnosis =
            ErrorClassifier::new().diagnose(r#"{"category": "poem", "pages": 2}"#, &schema(), None);
        assert_eq!(diagnosis.offending_fields(), vec!["category"]);
        assert!(diagnosis.message.contains("poem"));
        assert!(diagnosis.value.is_some());
    }
}

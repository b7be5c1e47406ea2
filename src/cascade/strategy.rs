//! Repair strategy selection and the deterministic chain.
//!
//! Strategies form a closed set ([`RepairStrategy`]). The three deterministic
//! ones run first as a chain, each on the best working value the previous
//! one produced. Model-calling strategies are then ordered by estimated
//! token cost, falling back to their static rank on ties.

use serde_json::Value;

use crate::ai::validation::{
    Diagnosis, ErrorClassifier, JsonRepairer, TargetSchema, ViolationKind, extract_fields,
    mentions_field, normalize_field_names,
};
use crate::types::{AttemptLog, Criticality, FailureKind, RepairStrategy};

pub const DETERMINISTIC: [RepairStrategy; 3] = [
    RepairStrategy::StructuralAutoFix,
    RepairStrategy::FieldNameNormalize,
    RepairStrategy::PatternFallback,
];

// =============================================================================
// Deterministic Chain
// =============================================================================

/// Result of the deterministic chain on one raw output
#[derive(Debug, Clone, PartialEq)]
pub enum ChainOutcome {
    /// The named strategy produced a schema-valid object
    Fixed {
        strategy: RepairStrategy,
        value: Value,
    },
    /// Every applicable strategy ran without producing a valid object
    Exhausted {
        /// Best parsed value seen so far, if anything parsed
        working: Option<Value>,
        /// Diagnosis of `working` (or of the raw output when nothing parsed)
        diagnosis: Diagnosis,
    },
}

/// Deterministic strategies worth running for this diagnosis. A strategy is
/// dropped only when it provably cannot help.
pub fn applicable_deterministic(
    raw: &str,
    diagnosis: &Diagnosis,
    schema: &TargetSchema,
) -> Vec<RepairStrategy> {
    DETERMINISTIC
        .into_iter()
        .filter(|strategy| match strategy {
            // Text that already parses has nothing to fix structurally
            RepairStrategy::StructuralAutoFix => diagnosis.value.is_none(),
            RepairStrategy::PatternFallback => {
                diagnosis.kind != Some(FailureKind::MissingRequiredField)
                    || diagnosis.offending_fields().iter().any(|name| {
                        schema
                            .field(name)
                            .is_some_and(|spec| mentions_field(raw, spec))
                    })
            }
            _ => true,
        })
        .collect()
}

/// Run one deterministic strategy. `None` means it had nothing to work on.
pub fn apply_deterministic(
    strategy: RepairStrategy,
    raw: &str,
    working: Option<&Value>,
    schema: &TargetSchema,
) -> Option<Value> {
    match strategy {
        RepairStrategy::StructuralAutoFix => match working {
            Some(value) => Some(value.clone()),
            None => JsonRepairer::new().repair(raw).map(|r| r.value),
        },
        RepairStrategy::FieldNameNormalize => working.map(|v| normalize_field_names(v, schema)),
        RepairStrategy::PatternFallback => pattern_merge(raw, working, schema),
        _ => None,
    }
}

/// Fill fields that are absent or mistyped in `working` with values
/// extracted from the raw text. Well-typed existing values win.
fn pattern_merge(raw: &str, working: Option<&Value>, schema: &TargetSchema) -> Option<Value> {
    let extracted = extract_fields(raw, schema);
    if extracted.is_empty() {
        return None;
    }

    let mut object = working
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    for (name, value) in extracted {
        let keep = object
            .get(&name)
            .zip(schema.field(&name))
            .is_some_and(|(existing, spec)| spec.kind.matches(existing));
        if !keep {
            object.insert(name, value);
        }
    }
    Some(Value::Object(object))
}

/// Run the deterministic chain, stopping at the first schema-valid result
pub fn run_chain(
    raw: &str,
    diagnosis: &Diagnosis,
    schema: &TargetSchema,
    classifier: &ErrorClassifier,
) -> ChainOutcome {
    let mut working = diagnosis.value.clone();
    let mut last = diagnosis.clone();

    for strategy in applicable_deterministic(raw, diagnosis, schema) {
        let Some(value) = apply_deterministic(strategy, raw, working.as_ref(), schema) else {
            tracing::trace!(%strategy, "Deterministic strategy had no input");
            continue;
        };
        let checked = classifier.diagnose_value(value.clone(), schema);
        if checked.is_valid() {
            return ChainOutcome::Fixed { strategy, value };
        }
        tracing::trace!(%strategy, kind = ?checked.kind, "Deterministic strategy did not validate");
        working = Some(value);
        last = checked;
    }

    ChainOutcome::Exhausted {
        working,
        diagnosis: last,
    }
}

/// Post-process a model reply the same way a raw output is cleaned up,
/// without recording the fix as a separate attempt.
pub fn clean_reply(text: &str, schema: &TargetSchema, classifier: &ErrorClassifier) -> Diagnosis {
    let strict = classifier.diagnose(text, schema, None);
    if strict.is_valid() {
        return strict;
    }
    let parsed = strict
        .value
        .clone()
        .or_else(|| JsonRepairer::new().repair(text).map(|r| r.value));
    match parsed {
        Some(value) => classifier.diagnose_value(normalize_field_names(&value, schema), schema),
        None => strict,
    }
}

// =============================================================================
// Model-Calling Strategy Plans
// =============================================================================

/// One applicable model-calling strategy with its estimated cost
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyPlan {
    pub strategy: RepairStrategy,
    /// Input plus output tokens across all calls the strategy makes
    pub estimated_tokens: u64,
    /// Field regenerated by PartialFieldRegeneration
    pub target_field: Option<String>,
}

impl StrategyPlan {
    pub fn new(strategy: RepairStrategy, estimated_tokens: u64) -> Self {
        Self {
            strategy,
            estimated_tokens,
            target_field: None,
        }
    }

    pub fn for_field(mut self, field: impl Into<String>) -> Self {
        self.target_field = Some(field.into());
        self
    }
}

/// Deterministic first, then ascending estimated cost, then static rank
pub fn order_plans(mut plans: Vec<StrategyPlan>) -> Vec<StrategyPlan> {
    plans.sort_by_key(|p| {
        (
            !p.strategy.is_deterministic(),
            p.estimated_tokens,
            p.strategy.rank(),
        )
    });
    plans
}

/// The single field PartialFieldRegeneration may rebuild, if any. Requires
/// an object candidate with every violation on one field, a multi-field
/// schema, and an explicit independence declaration covering that field.
pub fn isolated_field(working: Option<&Value>, diagnosis: &Diagnosis, schema: &TargetSchema) -> Option<String> {
    let object = working?.as_object()?;
    if schema.fields.len() < 2 || object.is_empty() {
        return None;
    }

    let mut fields = diagnosis.violations.iter().filter_map(|v| match v.kind {
        ViolationKind::NotAnObject => None,
        _ => Some(v.field.as_str()),
    });
    let field = fields.next()?;
    if fields.any(|f| f != field) {
        return None;
    }
    if diagnosis.violations.iter().any(|v| v.kind == ViolationKind::NotAnObject) {
        return None;
    }

    schema
        .allows_isolated_regeneration(field)
        .then(|| field.to_string())
}

/// Critique/revise is unlocked when a critical unit's LLM repair already
/// failed in this cascade run, or when one failure kind keeps recurring.
pub fn critique_unlocked(
    log: &AttemptLog,
    kind: FailureKind,
    criticality: Criticality,
    llm_repair_failed: bool,
    recurrence: usize,
) -> bool {
    (llm_repair_failed && criticality.is_critical()) || log.occurrences(kind) >= recurrence
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::validation::{FieldKind, FieldSpec};
    use crate::types::{Attempt, ModelTier, Outcome, StrategyUsed, UnitId};
    use proptest::prelude::*;
    use serde_json::json;

    fn schema() -> TargetSchema {
        TargetSchema::new(
            "meta",
            vec![
                FieldSpec::new("category", FieldKind::String).with_enum(&["guide", "reference"]),
                FieldSpec::new("title", FieldKind::String),
                FieldSpec::new("pages", FieldKind::Integer).optional(),
            ],
        )
        .independent()
    }

    fn diagnose(raw: &str) -> Diagnosis {
        ErrorClassifier::new().diagnose(raw, &schema(), None)
    }

    fn chain(raw: &str) -> ChainOutcome {
        run_chain(raw, &diagnose(raw), &schema(), &ErrorClassifier::new())
    }

    #[test]
    fn test_structural_fix_first() {
        match chain("{category: 'guide', title: 'Intro'") {
            ChainOutcome::Fixed { strategy, value } => {
                assert_eq!(strategy, RepairStrategy::StructuralAutoFix);
                assert_eq!(value, json!({"category": "guide", "title": "Intro"}));
            }
            other => panic!("expected fix, got {other:?}"),
        }
    }

    #[test]
    fn test_normalize_after_parse() {
        match chain(r#"{"Category": "guide", "TITLE": "Intro"}"#) {
            ChainOutcome::Fixed { strategy, .. } => {
                assert_eq!(strategy, RepairStrategy::FieldNameNormalize)
            }
            other => panic!("expected fix, got {other:?}"),
        }
    }

    #[test]
    fn test_pattern_fallback_from_prose() {
        match chain("Result -> category: guide\ntitle: Intro to widgets") {
            ChainOutcome::Fixed { strategy, value } => {
                assert_eq!(strategy, RepairStrategy::PatternFallback);
                assert_eq!(value["title"], "Intro to widgets");
            }
            other => panic!("expected fix, got {other:?}"),
        }
    }

    #[test]
    fn test_exhausted_keeps_working_value() {
        match chain(r#"{"category": "poem", "title": "Intro"}"#) {
            ChainOutcome::Exhausted { working, diagnosis } => {
                assert_eq!(working, Some(json!({"category": "poem", "title": "Intro"})));
                assert_eq!(diagnosis.kind, Some(FailureKind::ConstraintViolation));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[test]
    fn test_pattern_skipped_for_unmentioned_missing_field() {
        let raw = r#"{"title": "Intro"}"#;
        let applicable = applicable_deterministic(raw, &diagnose(raw), &schema());
        assert_eq!(applicable, vec![RepairStrategy::FieldNameNormalize]);

        let raw = r#"{"title": "Intro"} category guide"#;
        let applicable = applicable_deterministic(raw, &diagnose(raw), &schema());
        assert!(applicable.contains(&RepairStrategy::PatternFallback));
    }

    #[test]
    fn test_order_plans_by_cost_then_rank() {
        let ordered = order_plans(vec![
            StrategyPlan::new(RepairStrategy::MultiStepCritiqueRevise, 900),
            StrategyPlan::new(RepairStrategy::LlmAssistedRepair, 500),
            StrategyPlan::new(RepairStrategy::PartialFieldRegeneration, 300).for_field("category"),
            StrategyPlan::new(RepairStrategy::FieldNameNormalize, 0),
        ]);
        let order: Vec<_> = ordered.iter().map(|p| p.strategy).collect();
        assert_eq!(
            order,
            vec![
                RepairStrategy::FieldNameNormalize,
                RepairStrategy::PartialFieldRegeneration,
                RepairStrategy::LlmAssistedRepair,
                RepairStrategy::MultiStepCritiqueRevise,
            ]
        );

        let tied = order_plans(vec![
            StrategyPlan::new(RepairStrategy::PartialFieldRegeneration, 500),
            StrategyPlan::new(RepairStrategy::LlmAssistedRepair, 500),
        ]);
        assert_eq!(tied[0].strategy, RepairStrategy::LlmAssistedRepair);
    }

    #[test]
    fn test_isolated_field_rules() {
        let value = json!({"category": "poem", "title": "Intro"});
        let d = ErrorClassifier::new().diagnose_value(value.clone(), &schema());
        assert_eq!(isolated_field(Some(&value), &d, &schema()), Some("category".into()));

        // Without the independence declaration
        let coupled = TargetSchema::new("meta", schema().fields.clone());
        assert_eq!(isolated_field(Some(&value), &d, &coupled), None);

        // Cross-field constraint touching the broken field
        let constrained = schema().with_constraint("cat-title", &["category", "title"]);
        assert_eq!(isolated_field(Some(&value), &d, &constrained), None);

        // Two broken fields
        let value = json!({"category": "poem", "title": 3});
        let d = ErrorClassifier::new().diagnose_value(value.clone(), &schema());
        assert_eq!(isolated_field(Some(&value), &d, &schema()), None);
    }

    #[test]
    fn test_critique_unlocked() {
        let mut log = AttemptLog::new(UnitId::from("u"), Criticality::Standard);
        assert!(critique_unlocked(&log, FailureKind::TypeMismatch, Criticality::Critical, true, 2));
        assert!(!critique_unlocked(&log, FailureKind::TypeMismatch, Criticality::Standard, true, 2));

        for i in 0..2 {
            log.push(Attempt {
                attempt_index: i,
                strategy_used: StrategyUsed::Generation,
                model_tier: Some(ModelTier::Tier1),
                raw_output: String::new(),
                tokens_consumed: 0,
                cost_usd: 0.0,
                latency_ms: 0,
                outcome: Outcome::Failure(FailureKind::TypeMismatch),
                semantic_score: None,
                note: None,
            });
        }
        assert!(critique_unlocked(&log, FailureKind::TypeMismatch, Criticality::Standard, false, 2));
    }

    #[test]
    fn test_clean_reply_fixes_fences_and_names() {
        let d = clean_reply(
            "```json\n{\"Category\": \"guide\", \"title\": \"x\"}\n```",
            &schema(),
            &ErrorClassifier::new(),
        );
        assert!(d.is_valid());
        assert_eq!(d.value.unwrap()["category"], "guide");
    }

    proptest! {
        #[test]
        fn prop_deterministic_strategies_idempotent_on_valid(
            category in prop::sample::select(vec!["guide", "reference"]),
            title in "[A-Za-z][A-Za-z ]{0,20}[A-Za-z]",
            pages in prop::option::of(1i64..500),
        ) {
            let mut value = json!({"category": category, "title": title});
            if let Some(p) = pages {
                value["pages"] = json!(p);
            }
            let raw = value.to_string();
            for strategy in DETERMINISTIC {
                let out = apply_deterministic(strategy, &raw, Some(&value), &schema());
                prop_assert_eq!(out.as_ref(), Some(&value));
            }
        }
    }
}

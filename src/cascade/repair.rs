//! Repair Cascade
//!
//! Turns one failed raw output into a schema-valid candidate, or reports the
//! last observed [`FailureKind`]. Deterministic strategies run first as a
//! chain; model-calling strategies follow in ascending estimated cost:
//!
//! - `LLMAssistedRepair`: one call with the broken fragment and the error
//! - `MultiStepCritiqueRevise`: a prose critique call, then a revise call
//! - `PartialFieldRegeneration`: rebuild one field and splice it back
//!
//! Every model-calling invocation that does not yield a valid candidate is
//! recorded as a failed attempt. A valid candidate is returned unrecorded;
//! its attempt is sealed once the quality gate has judged it.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::orchestrator::{AttemptDraft, CallError, CallOutcome, Candidate, CascadeContext, UnitRun};
use super::prompts;
use super::strategy::{
    ChainOutcome, StrategyPlan, clean_reply, critique_unlocked, isolated_field, order_plans,
    run_chain,
};
use crate::ai::validation::{Diagnosis, FieldKind, FieldSpec, JsonRepairer};
use crate::constants::prompt::{CRITIQUE_MAX_OUTPUT_TOKENS, FIELD_MAX_OUTPUT_TOKENS};
use crate::types::{FailureKind, GenerationUnit, Outcome, RepairStrategy, StrategyUsed};

/// Why one model-calling strategy did not produce a candidate
#[derive(Debug)]
enum StepError {
    /// Pre-flight reservation refused; nothing was dispatched
    Budget,
    /// Attempt recorded with this failure
    Failed(FailureKind),
}

pub struct RepairCascade<'a> {
    ctx: &'a CascadeContext,
}

impl<'a> RepairCascade<'a> {
    pub fn new(ctx: &'a CascadeContext) -> Self {
        Self { ctx }
    }

    /// Repair one raw output. `diagnosis` is the classification of
    /// `output.raw_output`.
    pub async fn repair(
        &self,
        run: &mut UnitRun,
        output: AttemptDraft,
        diagnosis: Diagnosis,
    ) -> Result<Candidate, FailureKind> {
        let unit = run.unit();

        let (working, current) = match run_chain(
            &output.raw_output,
            &diagnosis,
            &unit.schema,
            self.ctx.classifier(),
        ) {
            ChainOutcome::Fixed { strategy, value } => {
                debug!(unit = %unit.unit_id, %strategy, "Deterministic repair succeeded");
                return Ok(Candidate {
                    value,
                    draft: output.with_strategy(StrategyUsed::Repair(strategy)),
                });
            }
            ChainOutcome::Exhausted { working, diagnosis: current } => (working, current),
        };

        let kind = diagnosis.kind.unwrap_or(FailureKind::ParseError);
        let raw = output.raw_output.clone();
        run.record(self.ctx, output, Outcome::Failure(kind), None, Some(diagnosis.message));

        self.model_strategies(run, &unit, &raw, working, current).await
    }

    async fn model_strategies(
        &self,
        run: &mut UnitRun,
        unit: &GenerationUnit,
        raw: &str,
        working: Option<Value>,
        current: Diagnosis,
    ) -> Result<Candidate, FailureKind> {
        let policy = self.ctx.policy();
        let mut last = current.kind.unwrap_or(FailureKind::ParseError);

        let fragment = working
            .as_ref()
            .map(Value::to_string)
            .unwrap_or_else(|| raw.to_string());
        let error = if current.message.is_empty() {
            last.to_string()
        } else {
            current.message.clone()
        };

        let plans = self.plan(run, unit, &fragment, &error, working.as_ref(), &current);
        debug!(
            unit = %unit.unit_id,
            plan = ?plans.iter().map(|p| (p.strategy, p.estimated_tokens)).collect::<Vec<_>>(),
            "Model strategies planned"
        );

        let mut llm_repair_failed = false;
        for plan in plans {
            if self.ctx.is_cancelled() {
                debug!(unit = %unit.unit_id, "Cancelled inside cascade");
                break;
            }
            if run.attempts_used() >= policy.retry_ceiling {
                debug!(unit = %unit.unit_id, "Retry ceiling reached inside cascade");
                break;
            }

            let result = match plan.strategy {
                RepairStrategy::LlmAssistedRepair => self.llm_repair(run, unit, &fragment, &error).await,
                RepairStrategy::MultiStepCritiqueRevise => {
                    if !critique_unlocked(
                        run.log(),
                        last,
                        unit.criticality,
                        llm_repair_failed,
                        policy.recurrence_for_critique,
                    ) {
                        continue;
                    }
                    self.critique_revise(run, unit, &fragment, &error).await
                }
                RepairStrategy::PartialFieldRegeneration => {
                    match (working.as_ref().and_then(Value::as_object), plan.target_field.as_deref()) {
                        (Some(object), Some(field)) => {
                            self.regenerate_field(run, unit, object, field).await
                        }
                        _ => continue,
                    }
                }
                _ => continue,
            };

            match result {
                Ok(candidate) => return Ok(candidate),
                Err(StepError::Budget) => return Err(FailureKind::BudgetExhausted),
                Err(StepError::Failed(kind)) => {
                    last = kind;
                    if kind == FailureKind::ModelUnavailable
                        && run.unavailable_count() >= policy.model_unavailable_limit
                    {
                        return Err(kind);
                    }
                }
            }

            if plan.strategy == RepairStrategy::LlmAssistedRepair {
                llm_repair_failed = true;
            }
        }

        Err(last)
    }

    /// Applicable model-calling strategies in execution order
    fn plan(
        &self,
        run: &UnitRun,
        unit: &GenerationUnit,
        fragment: &str,
        error: &str,
        working: Option<&Value>,
        current: &Diagnosis,
    ) -> Vec<StrategyPlan> {
        let schema = &unit.schema;
        let cost = |prompt: &crate::ai::client::ModelPrompt| {
            let tier = self.ctx.route(run, prompt);
            self.ctx.estimate(tier, prompt).total()
        };

        let mut plans = vec![StrategyPlan::new(
            RepairStrategy::LlmAssistedRepair,
            cost(&prompts::repair(fragment, schema, error, u64::MAX)),
        )];

        let critique = cost(&prompts::critique(fragment, schema, error, CRITIQUE_MAX_OUTPUT_TOKENS));
        let revise = cost(&prompts::revise(fragment, schema, "", u64::MAX));
        plans.push(StrategyPlan::new(
            RepairStrategy::MultiStepCritiqueRevise,
            critique + revise + CRITIQUE_MAX_OUTPUT_TOKENS,
        ));

        if let Some(field) = isolated_field(working, current, schema)
            && let (Some(spec), Some(object)) = (schema.field(&field), working.and_then(Value::as_object))
        {
            plans.push(
                StrategyPlan::new(
                    RepairStrategy::PartialFieldRegeneration,
                    cost(&prompts::field(unit, spec, object, FIELD_MAX_OUTPUT_TOKENS)),
                )
                .for_field(field),
            );
        }

        order_plans(plans)
    }

    async fn llm_repair(
        &self,
        run: &mut UnitRun,
        unit: &GenerationUnit,
        fragment: &str,
        error: &str,
    ) -> Result<Candidate, StepError> {
        let draft = AttemptDraft::new(StrategyUsed::Repair(RepairStrategy::LlmAssistedRepair));
        let prompt = prompts::repair(fragment, &unit.schema, error, u64::MAX);
        let call = self.ctx.call(run, prompt, None).await;
        self.finish(run, unit, draft, call)
    }

    async fn critique_revise(
        &self,
        run: &mut UnitRun,
        unit: &GenerationUnit,
        fragment: &str,
        error: &str,
    ) -> Result<Candidate, StepError> {
        let mut draft = AttemptDraft::new(StrategyUsed::Repair(RepairStrategy::MultiStepCritiqueRevise));

        let prompt = prompts::critique(fragment, &unit.schema, error, CRITIQUE_MAX_OUTPUT_TOKENS);
        let first = match self.ctx.call(run, prompt, None).await {
            Ok(call) => call,
            Err(e) => return Err(self.call_failed(run, draft, e)),
        };
        draft.absorb(&first);
        let critique = first.reply.text.trim().to_string();
        debug!(unit = %unit.unit_id, critique_chars = critique.len(), "Critique received");

        let prompt = prompts::revise(fragment, &unit.schema, &critique, u64::MAX);
        let second = self.ctx.call(run, prompt, Some(first.tier)).await;
        self.finish(run, unit, draft, second)
    }

    async fn regenerate_field(
        &self,
        run: &mut UnitRun,
        unit: &GenerationUnit,
        working: &Map<String, Value>,
        field: &str,
    ) -> Result<Candidate, StepError> {
        let mut draft = AttemptDraft::new(StrategyUsed::Repair(RepairStrategy::PartialFieldRegeneration));
        let Some(spec) = unit.schema.field(field) else {
            return Err(StepError::Failed(FailureKind::MissingRequiredField));
        };

        let prompt = prompts::field(unit, spec, working, FIELD_MAX_OUTPUT_TOKENS);
        let call = match self.ctx.call(run, prompt, None).await {
            Ok(call) => call,
            Err(e) => return Err(self.call_failed(run, draft, e)),
        };
        draft.absorb(&call);

        let Some(value) = field_value(&call.reply.text, spec) else {
            run.record(
                self.ctx,
                draft,
                Outcome::Failure(FailureKind::TypeMismatch),
                None,
                Some(format!("no usable value for '{field}' in reply")),
            );
            return Err(StepError::Failed(FailureKind::TypeMismatch));
        };

        // Siblings are carried over untouched
        let mut spliced = working.clone();
        spliced.insert(spec.name.clone(), value);
        let diagnosis = self
            .ctx
            .classifier()
            .diagnose_value(Value::Object(spliced), &unit.schema);
        self.accept_or_record(run, draft, diagnosis)
    }

    /// Turn a finished call into a candidate, or record the failure
    fn finish(
        &self,
        run: &mut UnitRun,
        unit: &GenerationUnit,
        mut draft: AttemptDraft,
        call: Result<CallOutcome, CallError>,
    ) -> Result<Candidate, StepError> {
        let call = match call {
            Ok(call) => call,
            Err(e) => return Err(self.call_failed(run, draft, e)),
        };
        draft.absorb(&call);
        let diagnosis = clean_reply(&call.reply.text, &unit.schema, self.ctx.classifier());
        self.accept_or_record(run, draft, diagnosis)
    }

    fn accept_or_record(
        &self,
        run: &mut UnitRun,
        draft: AttemptDraft,
        diagnosis: Diagnosis,
    ) -> Result<Candidate, StepError> {
        match (diagnosis.kind, diagnosis.value) {
            (None, Some(value)) => Ok(Candidate { value, draft }),
            (kind, _) => {
                let kind = kind.unwrap_or(FailureKind::ParseError);
                run.record(self.ctx, draft, Outcome::Failure(kind), None, Some(diagnosis.message));
                Err(StepError::Failed(kind))
            }
        }
    }

    fn call_failed(&self, run: &mut UnitRun, mut draft: AttemptDraft, error: CallError) -> StepError {
        match error {
            CallError::Budget(e) => {
                warn!(unit = %run.unit_id(), error = %e, "Reservation refused");
                // A partially spent multi-call attempt is still recorded
                if draft.tokens > 0 {
                    run.record(
                        self.ctx,
                        draft,
                        Outcome::Failure(FailureKind::BudgetExhausted),
                        None,
                        Some(e.to_string()),
                    );
                }
                StepError::Budget
            }
            CallError::Unavailable {
                tier,
                error,
                latency_ms,
            } => {
                draft.absorb_failed(tier, latency_ms);
                run.record(
                    self.ctx,
                    draft,
                    Outcome::Failure(FailureKind::ModelUnavailable),
                    None,
                    Some(error.to_string()),
                );
                StepError::Failed(FailureKind::ModelUnavailable)
            }
        }
    }
}

/// Pull the regenerated value out of a single-field reply
fn field_value(text: &str, spec: &FieldSpec) -> Option<Value> {
    let value = match JsonRepairer::new().repair(text) {
        Some(repaired) => match repaired.value {
            Value::Object(map) => {
                let found = map
                    .iter()
                    .find(|(key, _)| *key == &spec.name || spec.answers_to(key))
                    .map(|(_, v)| v.clone());
                match found {
                    Some(v) => v,
                    None if map.len() == 1 => map.into_iter().next().map(|(_, v)| v)?,
                    None => Value::Object(map),
                }
            }
            other => other,
        },
        None if spec.kind == FieldKind::String => {
            let trimmed = text.trim().trim_matches(|c| c == '"' || c == '\'').trim();
            if trimmed.is_empty() {
                return None;
            }
            Value::String(trimmed.to_string())
        }
        None => return None,
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_value_shapes() {
        let spec = FieldSpec::new("category", FieldKind::String).with_aliases(&["kind"]);
        assert_eq!(field_value(r#"{"category": "guide"}"#, &spec), Some(json!("guide")));
        assert_eq!(field_value(r#"{"kind": "guide"}"#, &spec), Some(json!("guide")));
        assert_eq!(field_value(r#"{"value": "guide"}"#, &spec), Some(json!("guide")));
        assert_eq!(field_value(r#""guide""#, &spec), Some(json!("guide")));
        assert_eq!(field_value("guide", &spec), Some(json!("guide")));
        assert_eq!(field_value("   ", &spec), None);

        let pages = FieldSpec::new("pages", FieldKind::Integer);
        assert_eq!(field_value("12", &pages), Some(json!(12)));
        assert_eq!(field_value("twelve", &pages), None);
    }
}

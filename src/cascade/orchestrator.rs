//! Regeneration Orchestrator
//!
//! Drives one unit from its first raw output to a sealed
//! [`RegenerationRecord`]. The loop is an explicit state machine:
//!
//! ```text
//! Classifying ──valid──▶ Validating ──accept──▶ Accepted
//!      │                     │ retry
//!      ▼                     ▼
//!  Repairing ──candidate──▶ Validating
//!      │ exhausted           │ ceiling (standard)
//!      ▼                     ▼
//!  Retrying ──output──▶ Classifying     Degrading ──▶ AcceptedDegraded | Failed
//! ```
//!
//! Every transition is logged at debug level. Recoverable failures never
//! escape as errors; they only shape the verdict.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::prompts;
use super::quality::{GateVerdict, QualityGate};
use super::repair::RepairCascade;
use super::router::{ModelRouter, RouteRequest};
use crate::ai::budget::{BudgetError, CallEstimate, SharedBudget};
use crate::ai::client::{ModelPrompt, ModelReply, SharedClient, TierTable};
use crate::ai::metrics::{MetricsEvent, SharedMetrics};
use crate::ai::timeout::with_call_timeout;
use crate::ai::tokenizer::TokenCounter;
use crate::ai::validation::{Diagnosis, ErrorClassifier, SemanticScorer};
use crate::config::CascadePolicy;
use crate::constants::network::DEFAULT_CALL_TIMEOUT_SECS;
use crate::types::{
    Attempt, AttemptLog, FailureKind, GenerationUnit, JobId, ModelCallError, ModelTier, Outcome,
    RegenerationRecord, Seal, StrategyUsed, SubmittedUnit, UnitId, Usage, Verdict,
};

// =============================================================================
// Attempt Drafts
// =============================================================================

/// An attempt under construction: usage accumulates across the calls a
/// strategy makes, and the outcome is fixed when it is recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptDraft {
    pub strategy: StrategyUsed,
    pub tier: Option<ModelTier>,
    pub raw_output: String,
    pub tokens: u64,
    pub cost_usd: f64,
    pub latency_ms: u64,
    /// Model calls dispatched, including ones that failed
    pub calls: u32,
}

impl AttemptDraft {
    pub fn new(strategy: StrategyUsed) -> Self {
        Self {
            strategy,
            tier: None,
            raw_output: String::new(),
            tokens: 0,
            cost_usd: 0.0,
            latency_ms: 0,
            calls: 0,
        }
    }

    /// A raw output supplied by the caller
    pub fn supplied(text: impl Into<String>, usage: Usage) -> Self {
        Self {
            raw_output: text.into(),
            tokens: usage.tokens_used,
            cost_usd: usage.cost_usd,
            latency_ms: usage.latency_ms,
            ..Self::new(StrategyUsed::Generation)
        }
    }

    pub fn with_strategy(mut self, strategy: StrategyUsed) -> Self {
        self.strategy = strategy;
        self
    }

    /// Fold a finished call into the draft
    pub fn absorb(&mut self, call: &CallOutcome) {
        self.tier = Some(call.tier);
        self.raw_output = call.reply.text.clone();
        self.tokens += call.charged_tokens;
        self.cost_usd += call.reply.cost_usd;
        self.latency_ms += call.latency_ms;
        self.calls += 1;
    }

    /// Fold a dispatched call that returned no reply
    pub fn absorb_failed(&mut self, tier: ModelTier, latency_ms: u64) {
        self.tier = Some(tier);
        self.latency_ms += latency_ms;
        self.calls += 1;
    }

    fn into_attempt(self, index: u32, outcome: Outcome, score: Option<f64>, note: Option<String>) -> Attempt {
        Attempt {
            attempt_index: index,
            strategy_used: self.strategy,
            model_tier: self.tier,
            raw_output: self.raw_output,
            tokens_consumed: self.tokens,
            cost_usd: self.cost_usd,
            latency_ms: self.latency_ms,
            outcome,
            semantic_score: score,
            note: note.filter(|n| !n.is_empty()),
        }
    }
}

/// A schema-valid object waiting for the quality gate
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub value: Value,
    pub draft: AttemptDraft,
}

// =============================================================================
// Model Calls
// =============================================================================

#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub reply: ModelReply,
    pub tier: ModelTier,
    /// Tokens charged against the job budget
    pub charged_tokens: u64,
    pub latency_ms: u64,
}

#[derive(Debug)]
pub enum CallError {
    /// Reservation refused before dispatch
    Budget(BudgetError),
    /// Dispatched on `tier` and failed
    Unavailable {
        tier: ModelTier,
        error: ModelCallError,
        latency_ms: u64,
    },
}

/// Everything one job's units share: transport, budget, metrics, routing,
/// the quality gate, and the cancellation flag.
pub struct CascadeContext {
    client: SharedClient,
    budget: SharedBudget,
    metrics: SharedMetrics,
    router: ModelRouter,
    gate: QualityGate,
    tiers: TierTable,
    classifier: ErrorClassifier,
    counter: TokenCounter,
    call_timeout: Duration,
    cancel: Arc<AtomicBool>,
}

impl std::fmt::Debug for CascadeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CascadeContext")
            .field("job_id", self.metrics.job_id())
            .field("client", &self.client.name())
            .field("gate", &self.gate)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl CascadeContext {
    pub fn new(
        client: SharedClient,
        budget: SharedBudget,
        metrics: SharedMetrics,
        tiers: TierTable,
        policy: CascadePolicy,
    ) -> Self {
        Self {
            client,
            budget,
            metrics,
            router: ModelRouter::new(tiers.clone()),
            gate: QualityGate::new(policy),
            tiers,
            classifier: ErrorClassifier::new(),
            counter: TokenCounter::default(),
            call_timeout: Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn SemanticScorer>) -> Self {
        self.gate = QualityGate::with_scorer(self.gate.policy().clone(), scorer);
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_cancellation(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn job_id(&self) -> &JobId {
        self.metrics.job_id()
    }

    pub fn policy(&self) -> &CascadePolicy {
        self.gate.policy()
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    pub fn budget(&self) -> &SharedBudget {
        &self.budget
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    fn prompt_tokens(&self, prompt: &ModelPrompt) -> u64 {
        self.counter.count(&prompt.system) + self.counter.count(&prompt.user)
    }

    /// Pessimistic estimate of `prompt` on `tier`
    pub fn estimate(&self, tier: ModelTier, prompt: &ModelPrompt) -> CallEstimate {
        let profile = self.tiers.get(tier);
        let input_tokens = self.prompt_tokens(prompt);
        let output_tokens = prompt.max_output_tokens.min(profile.max_output_tokens);
        CallEstimate {
            input_tokens,
            output_tokens,
            cost_usd: profile.estimate_cost(input_tokens + output_tokens),
        }
    }

    /// Tier the router would pick for `prompt` given the unit's history
    pub fn route(&self, run: &UnitRun, prompt: &ModelPrompt) -> ModelTier {
        let request = RouteRequest {
            unit: &run.unit,
            context_tokens: self.prompt_tokens(prompt),
            history: run.log.attempts(),
        };
        self.router
            .select_tier(&request, |tier| self.budget.can_afford(&self.estimate(tier, prompt)))
    }

    /// Reserve, dispatch under the call timeout, and reconcile one model
    /// call. `tier` pins the call to a tier instead of routing it.
    pub async fn call(
        &self,
        run: &UnitRun,
        mut prompt: ModelPrompt,
        tier: Option<ModelTier>,
    ) -> Result<CallOutcome, CallError> {
        let tier = tier.unwrap_or_else(|| self.route(run, &prompt));
        let profile = self.tiers.get(tier);
        prompt.max_output_tokens = prompt.max_output_tokens.min(profile.max_output_tokens);

        let estimate = self.estimate(tier, &prompt);
        let reservation = self.budget.reserve(estimate).map_err(CallError::Budget)?;

        debug!(
            unit = %run.unit.unit_id,
            kind = %prompt.kind,
            %tier,
            reserved = estimate.total(),
            "Dispatching model call"
        );

        let start = Instant::now();
        let result = with_call_timeout(
            self.call_timeout,
            self.client.call_model(tier, &prompt),
            self.client.name(),
        )
        .await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(reply) => {
                let charged_tokens = reservation.release(reply.tokens_used, reply.cost_usd);
                Ok(CallOutcome {
                    reply,
                    tier,
                    charged_tokens,
                    latency_ms,
                })
            }
            Err(error) => {
                // Dropping the reservation returns the hold
                drop(reservation);
                warn!(unit = %run.unit.unit_id, %tier, error = %error, "Model call failed");
                Err(CallError::Unavailable {
                    tier,
                    error,
                    latency_ms,
                })
            }
        }
    }
}

// =============================================================================
// Per-Unit Run State
// =============================================================================

/// Mutable state of one unit while the orchestrator works on it
#[derive(Debug)]
pub struct UnitRun {
    unit: Arc<GenerationUnit>,
    log: AttemptLog,
    /// Highest-scoring schema-valid candidate so far
    best: Option<(Value, f64)>,
    feedback: Vec<String>,
    notes: Vec<String>,
}

impl UnitRun {
    pub fn new(unit: GenerationUnit) -> Self {
        let log = AttemptLog::new(unit.unit_id.clone(), unit.criticality);
        Self {
            unit: Arc::new(unit),
            log,
            best: None,
            feedback: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn unit(&self) -> Arc<GenerationUnit> {
        Arc::clone(&self.unit)
    }

    pub fn unit_id(&self) -> &UnitId {
        &self.unit.unit_id
    }

    pub fn log(&self) -> &AttemptLog {
        &self.log
    }

    pub fn attempts_used(&self) -> u32 {
        self.log.len() as u32
    }

    pub fn unavailable_count(&self) -> usize {
        self.log.occurrences(FailureKind::ModelUnavailable)
    }

    pub fn last_failure(&self) -> Option<FailureKind> {
        self.log.attempts().iter().rev().find_map(Attempt::failure)
    }

    /// Append an attempt and emit its metrics event
    pub fn record(
        &mut self,
        ctx: &CascadeContext,
        draft: AttemptDraft,
        outcome: Outcome,
        score: Option<f64>,
        note: Option<String>,
    ) {
        let calls = draft.calls;
        let attempt = draft.into_attempt(self.log.next_index(), outcome, score, note);
        debug!(
            unit = %self.unit.unit_id,
            index = attempt.attempt_index,
            strategy = %attempt.strategy_used,
            outcome = %attempt.outcome,
            tokens = attempt.tokens_consumed,
            "Attempt recorded"
        );
        ctx.metrics.record(
            MetricsEvent::from_attempt(ctx.job_id(), &self.unit.unit_id, &attempt)
                .with_model_calls(calls),
        );
        self.log.push(attempt);
    }

    /// Replace the best candidate only on a strictly greater score
    fn offer_best(&mut self, value: &Value, score: f64) {
        if self.best.as_ref().is_none_or(|(_, best)| score > *best) {
            self.best = Some((value.clone(), score));
        }
    }

    fn best_score(&self) -> Option<f64> {
        self.best.as_ref().map(|(_, s)| *s)
    }

    fn seal(self, verdict: Verdict, final_object: Option<Value>, final_failure: Option<FailureKind>) -> RegenerationRecord {
        let best_semantic_score = self.best_score();
        self.log.seal(Seal {
            verdict,
            final_object,
            final_failure,
            best_semantic_score,
            notes: self.notes,
        })
    }
}

// =============================================================================
// State Machine
// =============================================================================

#[derive(Debug)]
enum State {
    Classifying(AttemptDraft),
    Repairing(AttemptDraft, Diagnosis),
    Validating(Candidate),
    Retrying,
    /// Out of attempts or budget: accept the best candidate or fail
    Degrading(FailureKind),
    Done(Verdict, Option<Value>, Option<FailureKind>),
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            Self::Classifying(_) => "Classifying",
            Self::Repairing(..) => "Repairing",
            Self::Validating(_) => "Validating",
            Self::Retrying => "Retrying",
            Self::Degrading(_) => "Degrading",
            Self::Done(Verdict::Accepted, ..) => "Accepted",
            Self::Done(Verdict::AcceptedDegraded, ..) => "AcceptedDegraded",
            Self::Done(Verdict::Failed, ..) => "Failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegenerationOrchestrator {
    ctx: Arc<CascadeContext>,
}

impl RegenerationOrchestrator {
    pub fn new(ctx: Arc<CascadeContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &CascadeContext {
        &self.ctx
    }

    /// Run one unit to a sealed record. Never fails; every outcome,
    /// including cancellation, ends in a verdict.
    #[instrument(skip_all, fields(unit = %submitted.unit.unit_id, criticality = %submitted.unit.criticality))]
    pub async fn process(&self, submitted: SubmittedUnit) -> RegenerationRecord {
        let SubmittedUnit {
            unit,
            initial_output,
            initial_usage,
        } = submitted;

        let mut run = UnitRun::new(unit);
        let mut state = State::Classifying(AttemptDraft::supplied(
            initial_output,
            initial_usage.unwrap_or_default(),
        ));

        loop {
            state = match state {
                State::Done(verdict, final_object, final_failure) => {
                    let record = run.seal(verdict, final_object, final_failure);
                    info!(
                        verdict = %record.verdict,
                        attempts = record.attempts.len(),
                        tokens = record.total_tokens,
                        "Unit sealed"
                    );
                    return record;
                }
                _ if self.ctx.is_cancelled() => {
                    run.notes.push("cancelled before reaching a verdict".to_string());
                    let last = run.last_failure();
                    State::Done(Verdict::Failed, None, last)
                }
                current => {
                    let from = current.name();
                    let next = self.step(&mut run, current).await;
                    debug!(from, to = next.name(), "Transition");
                    next
                }
            };
        }
    }

    async fn step(&self, run: &mut UnitRun, state: State) -> State {
        let ctx = self.ctx.as_ref();
        match state {
            State::Classifying(output) => {
                let diagnosis = ctx
                    .classifier
                    .diagnose(&output.raw_output, &run.unit.schema, run.log.last());
                match (diagnosis.kind, diagnosis.value.clone()) {
                    (None, Some(value)) => State::Validating(Candidate { value, draft: output }),
                    _ => State::Repairing(output, diagnosis),
                }
            }

            State::Repairing(output, diagnosis) => {
                match RepairCascade::new(ctx).repair(run, output, diagnosis).await {
                    Ok(candidate) => State::Validating(candidate),
                    Err(kind) => self.after_exhaustion(run, kind),
                }
            }

            State::Validating(candidate) => self.validate(run, candidate),

            State::Retrying => self.regenerate(run).await,

            State::Degrading(kind) => match run.best.clone() {
                Some((value, score)) if !run.unit.is_critical() => {
                    run.notes.push(format!(
                        "accepted best candidate (score {score:.2}) after {}",
                        kind.as_str()
                    ));
                    State::Done(Verdict::AcceptedDegraded, Some(value), None)
                }
                _ => {
                    run.notes.push(format!("no acceptable candidate: {}", kind.as_str()));
                    State::Done(Verdict::Failed, None, Some(kind))
                }
            },

            done @ State::Done(..) => done,
        }
    }

    fn validate(&self, run: &mut UnitRun, candidate: Candidate) -> State {
        let ctx = self.ctx.as_ref();
        let Candidate { value, draft } = candidate;

        let score = ctx.gate.evaluate(&value, &run.unit, run.attempts_used() + 1);
        let (outcome, note) = if score.passes() {
            (Outcome::Success, None)
        } else {
            (
                Outcome::Failure(FailureKind::SemanticQualityFailure),
                Some(format!(
                    "score {:.2} below {:.2}",
                    score.semantic_score, score.threshold_applied
                )),
            )
        };
        run.record(ctx, draft, outcome, Some(score.semantic_score), note);
        if score.structural_valid {
            run.offer_best(&value, score.semantic_score);
        }

        match score.verdict {
            GateVerdict::Accept => State::Done(Verdict::Accepted, Some(value), None),
            GateVerdict::Retry => {
                run.feedback.extend(score.feedback);
                State::Retrying
            }
            GateVerdict::Degrade => State::Degrading(FailureKind::SemanticQualityFailure),
            GateVerdict::Fail => {
                run.notes.push(format!(
                    "retry ceiling reached with best score {:.2}",
                    run.best_score().unwrap_or(0.0)
                ));
                State::Done(Verdict::Failed, None, Some(FailureKind::SemanticQualityFailure))
            }
        }
    }

    /// Whole-unit regeneration with the accumulated critique
    async fn regenerate(&self, run: &mut UnitRun) -> State {
        let ctx = self.ctx.as_ref();
        let policy = ctx.policy();

        if run.attempts_used() >= policy.retry_ceiling {
            let kind = run.last_failure().unwrap_or(FailureKind::SemanticQualityFailure);
            return State::Degrading(kind);
        }

        let prompt = prompts::generation(&run.unit, &run.feedback, u64::MAX);
        match ctx.call(run, prompt, None).await {
            Ok(call) => {
                let mut draft = AttemptDraft::new(StrategyUsed::Generation);
                draft.absorb(&call);
                State::Classifying(draft)
            }
            Err(CallError::Budget(e)) => {
                warn!(unit = %run.unit.unit_id, error = %e, "Budget refused regeneration");
                run.notes.push(e.to_string());
                State::Degrading(FailureKind::BudgetExhausted)
            }
            Err(CallError::Unavailable {
                tier,
                error,
                latency_ms,
            }) => {
                let mut draft = AttemptDraft::new(StrategyUsed::Generation);
                draft.absorb_failed(tier, latency_ms);
                run.record(
                    ctx,
                    draft,
                    Outcome::Failure(FailureKind::ModelUnavailable),
                    None,
                    Some(error.to_string()),
                );
                if run.unavailable_count() >= policy.model_unavailable_limit {
                    State::Degrading(FailureKind::ModelUnavailable)
                } else {
                    State::Retrying
                }
            }
        }
    }

    /// The repair cascade gave up on this output
    fn after_exhaustion(&self, run: &mut UnitRun, kind: FailureKind) -> State {
        let policy = self.ctx.policy();
        match kind {
            FailureKind::BudgetExhausted => State::Degrading(kind),
            FailureKind::ModelUnavailable
                if run.unavailable_count() >= policy.model_unavailable_limit =>
            {
                State::Degrading(kind)
            }
            _ if run.attempts_used() >= policy.retry_ceiling => State::Degrading(kind),
            _ => {
                run.feedback
                    .push(format!("The previous output failed with {}.", kind.as_str()));
                State::Retrying
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::budget::{BudgetLimits, TokenBudget};
    use crate::ai::client::{ModelClient, PromptKind};
    use crate::ai::metrics::MetricsRecorder;
    use crate::ai::validation::{FieldKind, FieldSpec, SemanticAssessment, TargetSchema};
    use crate::types::{ErrorCategory, RepairStrategy};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replies in order; an exhausted script answers as unavailable
    struct ScriptedClient {
        replies: Mutex<VecDeque<Option<String>>>,
        repeat: Option<String>,
        calls: Mutex<Vec<(ModelTier, PromptKind)>>,
        /// Raised on the first call, then disarmed
        trip: Mutex<Option<Arc<AtomicBool>>>,
    }

    impl ScriptedClient {
        fn new(replies: &[Option<&str>]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().map(|r| r.map(String::from)).collect()),
                repeat: None,
                calls: Mutex::new(Vec::new()),
                trip: Mutex::new(None),
            }
        }

        fn trip_on_first_call(&self, flag: Arc<AtomicBool>) {
            *self.trip.lock().unwrap() = Some(flag);
        }

        fn always(reply: &str) -> Self {
            Self {
                repeat: Some(reply.to_string()),
                ..Self::new(&[])
            }
        }

        fn calls(&self) -> Vec<(ModelTier, PromptKind)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedClient {
        async fn call_model(
            &self,
            tier: ModelTier,
            prompt: &ModelPrompt,
        ) -> std::result::Result<ModelReply, ModelCallError> {
            self.calls.lock().unwrap().push((tier, prompt.kind.clone()));
            if let Some(flag) = self.trip.lock().unwrap().take() {
                flag.store(true, Ordering::Release);
            }
            let next = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.repeat.clone());
            match next {
                Some(text) => Ok(ModelReply {
                    text,
                    tokens_used: 40,
                    cost_usd: 0.0001,
                }),
                None => Err(ModelCallError::new(
                    ErrorCategory::Unavailable,
                    "503 service unavailable",
                    "scripted",
                )),
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    struct Fixed(f64);

    impl SemanticScorer for Fixed {
        fn score(&self, _candidate: &Value, _unit: &GenerationUnit) -> SemanticAssessment {
            SemanticAssessment {
                score: self.0,
                penalties: Vec::new(),
            }
        }
    }

    struct Harness {
        client: Arc<ScriptedClient>,
        metrics: SharedMetrics,
        orchestrator: RegenerationOrchestrator,
        cancel: Arc<AtomicBool>,
    }

    fn harness(client: ScriptedClient, score: f64, limits: BudgetLimits, policy: CascadePolicy) -> Harness {
        let client = Arc::new(client);
        let metrics = MetricsRecorder::shared(JobId::from("job-1"));
        let cancel = Arc::new(AtomicBool::new(false));
        let ctx = CascadeContext::new(
            client.clone(),
            TokenBudget::shared(limits),
            metrics.clone(),
            TierTable::default(),
            policy,
        )
        .with_scorer(Arc::new(Fixed(score)))
        .with_cancellation(cancel.clone());
        Harness {
            client,
            metrics,
            orchestrator: RegenerationOrchestrator::new(Arc::new(ctx)),
            cancel,
        }
    }

    fn category_schema() -> TargetSchema {
        TargetSchema::new("meta", vec![FieldSpec::new("category", FieldKind::String)])
    }

    fn submit(unit: GenerationUnit, raw: &str) -> SubmittedUnit {
        SubmittedUnit {
            unit,
            initial_output: raw.to_string(),
            initial_usage: None,
        }
    }

    fn strategies(record: &RegenerationRecord) -> Vec<StrategyUsed> {
        record.attempts.iter().map(|a| a.strategy_used).collect()
    }

    #[tokio::test]
    async fn test_structural_fix_accepted_without_model_calls() {
        let h = harness(ScriptedClient::new(&[]), 0.9, BudgetLimits::default(), CascadePolicy::default());
        let unit = GenerationUnit::new("a", category_schema());

        let record = h.orchestrator.process(submit(unit, "{category: 'x'}")).await;

        assert_eq!(record.verdict, Verdict::Accepted);
        assert_eq!(record.final_object, Some(json!({"category": "x"})));
        assert_eq!(
            strategies(&record),
            vec![StrategyUsed::Repair(RepairStrategy::StructuralAutoFix)]
        );
        assert!(h.client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_field_name_normalized_without_model_calls() {
        let h = harness(ScriptedClient::new(&[]), 0.9, BudgetLimits::default(), CascadePolicy::default());
        let unit = GenerationUnit::new("b", category_schema());

        let record = h.orchestrator.process(submit(unit, r#"{"Category":"x"}"#)).await;

        assert_eq!(record.verdict, Verdict::Accepted);
        assert_eq!(record.final_object, Some(json!({"category": "x"})));
        assert_eq!(
            strategies(&record),
            vec![StrategyUsed::Repair(RepairStrategy::FieldNameNormalize)]
        );
        assert_eq!(record.model_calls(), 0);
        assert!(h.client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_critical_below_threshold_fails_at_ceiling() {
        let h = harness(
            ScriptedClient::always(r#"{"category": "x"}"#),
            0.60,
            BudgetLimits::default(),
            CascadePolicy::default(),
        );
        let unit = GenerationUnit::new("c", category_schema()).critical();

        let record = h.orchestrator.process(submit(unit, r#"{"category": "x"}"#)).await;

        assert_eq!(record.verdict, Verdict::Failed);
        assert_eq!(record.attempts.len(), 10);
        assert_eq!(record.best_semantic_score, Some(0.60));
        assert_eq!(record.final_object, None);
        assert_eq!(record.final_failure, Some(FailureKind::SemanticQualityFailure));
        // Critical units never go below Tier2
        assert!(h.client.calls().iter().all(|(tier, _)| *tier >= ModelTier::Tier2));
    }

    #[tokio::test]
    async fn test_budget_refusal_dispatches_nothing() {
        let h = harness(
            ScriptedClient::always(r#"{"category": "x"}"#),
            0.9,
            BudgetLimits::with_ceiling(300),
            CascadePolicy::default(),
        );
        let unit = GenerationUnit::new("d", category_schema());

        let record = h.orchestrator.process(submit(unit, "no json here at all")).await;

        assert_eq!(record.verdict, Verdict::Failed);
        assert_eq!(record.final_failure, Some(FailureKind::BudgetExhausted));
        assert!(h.client.calls().is_empty());
        assert_eq!(record.model_calls(), 0);
    }

    #[tokio::test]
    async fn test_single_broken_field_regenerated_in_isolation() {
        let schema = TargetSchema::new(
            "article",
            vec![
                FieldSpec::new("category", FieldKind::String).with_enum(&["guide", "reference"]),
                FieldSpec::new("title", FieldKind::String),
                FieldSpec::new("summary", FieldKind::String),
                FieldSpec::new("author", FieldKind::String),
                FieldSpec::new("pages", FieldKind::Integer),
            ],
        )
        .independent();
        let h = harness(
            ScriptedClient::new(&[Some(r#"{"category": "guide"}"#)]),
            0.9,
            BudgetLimits::default(),
            CascadePolicy::default(),
        );
        let unit = GenerationUnit::new("e", schema).with_context("A guide to widgets.");
        let raw = r#"{"category": "bogus", "title": "Widgets", "summary": "All about widgets.", "author": "Ann", "pages": 12}"#;

        let record = h.orchestrator.process(submit(unit, raw)).await;

        assert_eq!(record.verdict, Verdict::Accepted);
        assert_eq!(
            strategies(&record),
            vec![
                StrategyUsed::Generation,
                StrategyUsed::Repair(RepairStrategy::PartialFieldRegeneration),
            ]
        );
        assert_eq!(
            record.final_object,
            Some(json!({
                "category": "guide",
                "title": "Widgets",
                "summary": "All about widgets.",
                "author": "Ann",
                "pages": 12
            }))
        );
        let calls = h.client.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].1,
            PromptKind::FieldRegeneration {
                field: "category".into()
            }
        );
    }

    #[tokio::test]
    async fn test_second_unavailable_is_terminal() {
        let h = harness(ScriptedClient::new(&[]), 0.9, BudgetLimits::default(), CascadePolicy::default());
        let unit = GenerationUnit::new("f", category_schema());

        let record = h.orchestrator.process(submit(unit, "nothing usable")).await;

        assert_eq!(record.verdict, Verdict::Failed);
        assert_eq!(record.final_failure, Some(FailureKind::ModelUnavailable));
        let tiers: Vec<_> = h.client.calls().iter().map(|(t, _)| *t).collect();
        assert_eq!(tiers, vec![ModelTier::Tier1, ModelTier::Tier2]);
        // Failed dispatches still count as calls
        assert_eq!(h.metrics.summary().model_calls, 2);
    }

    #[tokio::test]
    async fn test_standard_degrades_to_best_candidate() {
        let policy = CascadePolicy {
            retry_ceiling: 3,
            ..Default::default()
        };
        let h = harness(
            ScriptedClient::always(r#"{"category": "later"}"#),
            0.5,
            BudgetLimits::default(),
            policy,
        );
        let unit = GenerationUnit::new("g", category_schema());

        let record = h.orchestrator.process(submit(unit, r#"{"category": "first"}"#)).await;

        assert_eq!(record.verdict, Verdict::AcceptedDegraded);
        assert_eq!(record.attempts.len(), 3);
        // Equal scores never replace the earlier best
        assert_eq!(record.final_object, Some(json!({"category": "first"})));
        assert!(!record.degradation_notes.is_empty());
    }

    #[tokio::test]
    async fn test_one_metrics_event_per_attempt() {
        let policy = CascadePolicy {
            retry_ceiling: 4,
            ..Default::default()
        };
        let h = harness(ScriptedClient::always(r#"{"category": "x"}"#), 0.5, BudgetLimits::default(), policy);
        let unit = GenerationUnit::new("h", category_schema());

        let record = h.orchestrator.process(submit(unit, "{category: x")).await;

        assert_eq!(h.metrics.event_count(), record.attempts.len());
        let indices: Vec<u32> = record.attempts.iter().map(|a| a.attempt_index).collect();
        assert_eq!(indices, (0..record.attempts.len() as u32).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_cancelled_unit_sealed_failed() {
        let h = harness(ScriptedClient::new(&[]), 0.9, BudgetLimits::default(), CascadePolicy::default());
        h.cancel.store(true, Ordering::Release);
        let unit = GenerationUnit::new("i", category_schema());

        let record = h.orchestrator.process(submit(unit, r#"{"category": "x"}"#)).await;

        assert_eq!(record.verdict, Verdict::Failed);
        assert!(record.attempts.is_empty());
        assert!(record.degradation_notes[0].contains("cancelled"));
    }

    #[tokio::test]
    async fn test_usage_reconciled_into_attempts() {
        let h = harness(
            ScriptedClient::new(&[Some(r#"{"category": "x"}"#)]),
            0.9,
            BudgetLimits::default(),
            CascadePolicy::default(),
        );
        let unit = GenerationUnit::new("j", category_schema());

        let record = h.orchestrator.process(submit(unit, "garbage")).await;

        assert_eq!(record.verdict, Verdict::Accepted);
        let repaired = record.attempts.last().unwrap();
        assert_eq!(repaired.model_tier, Some(ModelTier::Tier1));
        assert_eq!(repaired.tokens_consumed, 40);
        assert_eq!(h.orchestrator.context().budget().consumed(), 40);
    }

    #[tokio::test]
    async fn test_cancel_during_repair_starts_no_further_strategy() {
        let h = harness(
            ScriptedClient::always("still broken"),
            0.9,
            BudgetLimits::default(),
            CascadePolicy::default(),
        );
        h.client.trip_on_first_call(h.cancel.clone());
        let unit = GenerationUnit::new("k", category_schema()).critical();

        let record = h.orchestrator.process(submit(unit, "%%%")).await;

        assert_eq!(record.verdict, Verdict::Failed);
        assert_eq!(
            strategies(&record),
            vec![
                StrategyUsed::Generation,
                StrategyUsed::Repair(RepairStrategy::LlmAssistedRepair),
            ]
        );
        assert_eq!(h.client.calls().len(), 1);
        assert!(record.degradation_notes.iter().any(|n| n.contains("cancelled")));
    }

    #[tokio::test]
    async fn test_critical_unit_escalates_to_critique_revise() {
        let h = harness(
            ScriptedClient::new(&[
                Some("nope"),
                Some("The category key must be a quoted string."),
                Some(r#"{"category": "x"}"#),
            ]),
            0.9,
            BudgetLimits::default(),
            CascadePolicy::default(),
        );
        let unit = GenerationUnit::new("l", category_schema()).critical();

        let record = h.orchestrator.process(submit(unit, "%%%")).await;

        assert_eq!(record.verdict, Verdict::Accepted);
        assert_eq!(record.final_object, Some(json!({"category": "x"})));
        assert_eq!(
            strategies(&record),
            vec![
                StrategyUsed::Generation,
                StrategyUsed::Repair(RepairStrategy::LlmAssistedRepair),
                StrategyUsed::Repair(RepairStrategy::MultiStepCritiqueRevise),
            ]
        );
        assert_eq!(record.attempts[1].outcome, Outcome::Failure(FailureKind::ParseError));
        // One attempt, two calls
        let revised = record.attempts.last().unwrap();
        assert_eq!(revised.outcome, Outcome::Success);
        assert_eq!(revised.tokens_consumed, 80);
        assert_eq!(h.metrics.summary().model_calls, 3);
        assert_eq!(
            h.client.calls(),
            vec![
                (ModelTier::Tier2, PromptKind::Repair),
                (ModelTier::Tier2, PromptKind::Critique),
                (ModelTier::Tier2, PromptKind::Revise),
            ]
        );
    }

    #[tokio::test]
    async fn test_standard_unit_skips_critique_without_recurrence() {
        let h = harness(
            ScriptedClient::new(&[Some(r#"{"category": 5}"#), Some(r#"{"category": "x"}"#)]),
            0.9,
            BudgetLimits::default(),
            CascadePolicy::default(),
        );
        let unit = GenerationUnit::new("m", category_schema());

        let record = h.orchestrator.process(submit(unit, "%%%")).await;

        assert_eq!(record.verdict, Verdict::Accepted);
        assert_eq!(
            strategies(&record),
            vec![
                StrategyUsed::Generation,
                StrategyUsed::Repair(RepairStrategy::LlmAssistedRepair),
                StrategyUsed::Generation,
            ]
        );
        let kinds: Vec<PromptKind> = h.client.calls().into_iter().map(|(_, k)| k).collect();
        assert_eq!(kinds, vec![PromptKind::Repair, PromptKind::Generate]);
    }
}

//! Quality Gate
//!
//! Judges a schema-valid candidate. Structural validity is checked again as a
//! precondition; the semantic score is compared against the threshold for
//! the unit's criticality, and the retry ceiling decides between another
//! attempt, degraded acceptance, and failure.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::ai::validation::{HeuristicScorer, SemanticScorer};
use crate::config::CascadePolicy;
use crate::types::GenerationUnit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateVerdict {
    Accept,
    /// Regenerate with the critique fed back
    Retry,
    /// Retry ceiling reached on a standard unit: accept the best candidate
    Degrade,
    /// Retry ceiling reached on a critical unit
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityScore {
    pub structural_valid: bool,
    pub semantic_score: f64,
    pub threshold_applied: f64,
    pub verdict: GateVerdict,
    /// Critique lines for the next regeneration prompt
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub feedback: Vec<String>,
}

impl QualityScore {
    pub fn passes(&self) -> bool {
        self.verdict == GateVerdict::Accept
    }
}

#[derive(Clone)]
pub struct QualityGate {
    scorer: Arc<dyn SemanticScorer>,
    policy: CascadePolicy,
}

impl std::fmt::Debug for QualityGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QualityGate")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl QualityGate {
    pub fn new(policy: CascadePolicy) -> Self {
        Self::with_scorer(policy, Arc::new(HeuristicScorer::new()))
    }

    pub fn with_scorer(policy: CascadePolicy, scorer: Arc<dyn SemanticScorer>) -> Self {
        Self { scorer, policy }
    }

    pub fn policy(&self) -> &CascadePolicy {
        &self.policy
    }

    /// Evaluate a candidate. `attempts_used` includes the attempt that
    /// produced this candidate.
    pub fn evaluate(&self, candidate: &Value, unit: &GenerationUnit, attempts_used: u32) -> QualityScore {
        let threshold = self.policy.threshold(unit.criticality);
        let at_ceiling = attempts_used >= self.policy.retry_ceiling;

        if !unit.schema.is_valid(candidate) {
            return QualityScore {
                structural_valid: false,
                semantic_score: 0.0,
                threshold_applied: threshold,
                verdict: self.below_threshold(unit, at_ceiling),
                feedback: vec!["Output does not satisfy the schema.".to_string()],
            };
        }

        let assessment = self.scorer.score(candidate, unit);
        let score = assessment.score.clamp(0.0, 1.0);
        let verdict = if score >= threshold {
            GateVerdict::Accept
        } else {
            self.below_threshold(unit, at_ceiling)
        };

        let mut feedback = assessment.critique();
        if verdict != GateVerdict::Accept && feedback.is_empty() {
            feedback.push(format!(
                "Quality score {score:.2} is below the required {threshold:.2}; make the content more specific and complete."
            ));
        }

        QualityScore {
            structural_valid: true,
            semantic_score: score,
            threshold_applied: threshold,
            verdict,
            feedback,
        }
    }

    fn below_threshold(&self, unit: &GenerationUnit, at_ceiling: bool) -> GateVerdict {
        match (at_ceiling, unit.is_critical()) {
            (false, _) => GateVerdict::Retry,
            (true, false) => GateVerdict::Degrade,
            (true, true) => GateVerdict::Fail,
        }
    }
}

//! Sealed regeneration records and job reports.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::attempt::{Attempt, FailureKind};
use super::unit::{Criticality, JobId, UnitId};
use crate::ai::budget::BudgetStats;
use crate::ai::metrics::MetricsSummary;

// =============================================================================
// Verdict
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    Accepted,
    AcceptedDegraded,
    Failed,
}

impl Verdict {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "Accepted",
            Self::AcceptedDegraded => "AcceptedDegraded",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Accepted" => Ok(Self::Accepted),
            "AcceptedDegraded" => Ok(Self::AcceptedDegraded),
            "Failed" => Ok(Self::Failed),
            other => Err(format!("unknown verdict: {other}")),
        }
    }
}

// =============================================================================
// Attempt Log (mutable, owned by the orchestrator)
// =============================================================================

/// The only mutable view of a unit's attempts. Sealing consumes it, so a
/// record can never receive another attempt.
#[derive(Debug)]
pub struct AttemptLog {
    unit_id: UnitId,
    criticality: Criticality,
    attempts: Vec<Attempt>,
}

impl AttemptLog {
    pub fn new(unit_id: UnitId, criticality: Criticality) -> Self {
        Self {
            unit_id,
            criticality,
            attempts: Vec::new(),
        }
    }

    pub fn next_index(&self) -> u32 {
        self.attempts.len() as u32
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    pub fn last(&self) -> Option<&Attempt> {
        self.attempts.last()
    }

    pub fn push(&mut self, attempt: Attempt) {
        debug_assert_eq!(attempt.attempt_index, self.next_index());
        self.attempts.push(attempt);
    }

    /// How many recorded attempts failed with `kind`
    pub fn occurrences(&self, kind: FailureKind) -> usize {
        self.attempts
            .iter()
            .filter(|a| a.failure() == Some(kind))
            .count()
    }

    pub fn seal(self, seal: Seal) -> RegenerationRecord {
        let total_tokens = self.attempts.iter().map(|a| a.tokens_consumed).sum();
        let total_cost_usd = self.attempts.iter().map(|a| a.cost_usd).sum();
        RegenerationRecord {
            unit_id: self.unit_id,
            criticality: self.criticality,
            final_object: seal.final_object,
            attempts: self.attempts,
            total_tokens,
            total_cost_usd,
            verdict: seal.verdict,
            final_failure: seal.final_failure,
            best_semantic_score: seal.best_semantic_score,
            degradation_notes: seal.notes,
        }
    }
}

/// Terminal decision handed to [`AttemptLog::seal`]
#[derive(Debug, Clone)]
pub struct Seal {
    pub verdict: Verdict,
    pub final_object: Option<Value>,
    pub final_failure: Option<FailureKind>,
    pub best_semantic_score: Option<f64>,
    pub notes: Vec<String>,
}

// =============================================================================
// Regeneration Record
// =============================================================================

/// Persisted outcome for one unit. Never mutated after sealing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegenerationRecord {
    pub unit_id: UnitId,
    pub criticality: Criticality,
    pub final_object: Option<Value>,
    pub attempts: Vec<Attempt>,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_failure: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_semantic_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degradation_notes: Vec<String>,
}

impl RegenerationRecord {
    /// Attempts that dispatched at least one model call
    pub fn model_calls(&self) -> usize {
        self.attempts.iter().filter(|a| a.is_model_call()).count()
    }

    pub fn is_failed(&self) -> bool {
        self.verdict == Verdict::Failed
    }

    /// Gap marker used in assembled output for failed non-critical units
    pub fn gap_marker(&self) -> Value {
        json!({
            "__gap__": {
                "unitId": self.unit_id,
                "reason": self.final_failure.map(|k| k.as_str()),
                "attempts": self.attempts.len(),
            }
        })
    }
}

// =============================================================================
// Job Report
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Succeeded,
    SucceededWithDegradations,
    Failed,
}

impl JobStatus {
    /// Failed only when a critical unit failed; degradations otherwise
    pub fn from_records(records: &[RegenerationRecord]) -> Self {
        if records
            .iter()
            .any(|r| r.is_failed() && r.criticality.is_critical())
        {
            Self::Failed
        } else if records
            .iter()
            .any(|r| r.verdict != Verdict::Accepted)
        {
            Self::SucceededWithDegradations
        } else {
            Self::Succeeded
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => f.write_str("succeeded"),
            Self::SucceededWithDegradations => f.write_str("succeeded with degradations"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReport {
    pub job_id: JobId,
    pub status: JobStatus,
    /// In submission order
    pub records: Vec<RegenerationRecord>,
    pub budget: BudgetStats,
    pub metrics: MetricsSummary,
    pub cancelled: bool,
}

impl JobReport {
    /// Assemble the final document keyed by unit id. Failed non-critical
    /// units appear as a gap marker; failed critical units are null.
    pub fn assemble(&self) -> Value {
        assemble_records(&self.records)
    }

    pub fn count(&self, verdict: Verdict) -> usize {
        self.records.iter().filter(|r| r.verdict == verdict).count()
    }
}

/// Assemble sealed records keyed by unit id, in the order given
pub fn assemble_records(records: &[RegenerationRecord]) -> Value {
    let mut out = Map::new();
    for record in records {
        let value = match (&record.final_object, record.verdict) {
            (Some(obj), Verdict::Accepted | Verdict::AcceptedDegraded) => obj.clone(),
            _ if record.criticality.is_critical() => Value::Null,
            _ => record.gap_marker(),
        };
        out.insert(record.unit_id.to_string(), value);
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::attempt::{Outcome, StrategyUsed};

    fn record(id: &str, criticality: Criticality, verdict: Verdict) -> RegenerationRecord {
        let mut log = AttemptLog::new(UnitId::new(id), criticality);
        log.push(Attempt {
            attempt_index: 0,
            strategy_used: StrategyUsed::Generation,
            model_tier: None,
            raw_output: "{}".into(),
            tokens_consumed: 10,
            cost_usd: 0.01,
            latency_ms: 5,
            outcome: if verdict == Verdict::Failed {
                Outcome::Failure(FailureKind::MissingRequiredField)
            } else {
                Outcome::Success
            },
            semantic_score: None,
            note: None,
        });
        log.seal(Seal {
            verdict,
            final_object: (verdict != Verdict::Failed).then(|| json!({"a": id})),
            final_failure: (verdict == Verdict::Failed).then_some(FailureKind::MissingRequiredField),
            best_semantic_score: None,
            notes: Vec::new(),
        })
    }

    #[test]
    fn test_seal_totals() {
        let r = record("a", Criticality::Standard, Verdict::Accepted);
        assert_eq!(r.total_tokens, 10);
        assert_eq!(r.attempts.len(), 1);
        assert_eq!(r.model_calls(), 0);
    }

    #[test]
    fn test_job_status_rules() {
        let ok = record("a", Criticality::Critical, Verdict::Accepted);
        let degraded = record("b", Criticality::Standard, Verdict::AcceptedDegraded);
        let soft_fail = record("c", Criticality::Standard, Verdict::Failed);
        let hard_fail = record("d", Criticality::Critical, Verdict::Failed);

        assert_eq!(JobStatus::from_records(&[ok.clone()]), JobStatus::Succeeded);
        assert_eq!(
            JobStatus::from_records(&[ok.clone(), degraded]),
            JobStatus::SucceededWithDegradations
        );
        assert_eq!(
            JobStatus::from_records(&[ok.clone(), soft_fail]),
            JobStatus::SucceededWithDegradations
        );
        assert_eq!(JobStatus::from_records(&[ok, hard_fail]), JobStatus::Failed);
    }

    #[test]
    fn test_gap_marker() {
        let r = record("c", Criticality::Standard, Verdict::Failed);
        let marker = r.gap_marker();
        assert_eq!(marker["__gap__"]["unitId"], "c");
        assert_eq!(marker["__gap__"]["reason"], "MissingRequiredField");
    }

    #[test]
    fn test_occurrences() {
        let mut log = AttemptLog::new(UnitId::new("x"), Criticality::Standard);
        for i in 0..3 {
            log.push(Attempt {
                attempt_index: i,
                strategy_used: StrategyUsed::Generation,
                model_tier: None,
                raw_output: String::new(),
                tokens_consumed: 0,
                cost_usd: 0.0,
                latency_ms: 0,
                outcome: Outcome::Failure(FailureKind::ParseError),
                semantic_score: None,
                note: None,
            });
        }
        assert_eq!(log.occurrences(FailureKind::ParseError), 3);
        assert_eq!(log.next_index(), 3);
    }
}

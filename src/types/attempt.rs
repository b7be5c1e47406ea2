//! Attempts and the vocabulary used to describe them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// =============================================================================
// Failure Kind
// =============================================================================

/// Why a candidate was unusable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Not valid serialization
    ParseError,
    /// Naming-convention skew (casing, known alias)
    FieldNameMismatch,
    /// Value present with the wrong shape
    TypeMismatch,
    MissingRequiredField,
    /// Value present but out of declared bounds or enum
    ConstraintViolation,
    /// Syntactically valid, rejected by the quality gate
    SemanticQualityFailure,
    ModelUnavailable,
    BudgetExhausted,
}

/// Coarse recovery class for a [`FailureKind`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    RecoverableDeterministic,
    RecoverableSemantic,
    ResourceExhaustion,
    TransientInfrastructure,
}

impl FailureKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ParseError => "ParseError",
            Self::FieldNameMismatch => "FieldNameMismatch",
            Self::TypeMismatch => "TypeMismatch",
            Self::MissingRequiredField => "MissingRequiredField",
            Self::ConstraintViolation => "ConstraintViolation",
            Self::SemanticQualityFailure => "SemanticQualityFailure",
            Self::ModelUnavailable => "ModelUnavailable",
            Self::BudgetExhausted => "BudgetExhausted",
        }
    }

    pub const fn class(&self) -> FailureClass {
        match self {
            Self::ParseError | Self::FieldNameMismatch | Self::ConstraintViolation => {
                FailureClass::RecoverableDeterministic
            }
            Self::TypeMismatch | Self::MissingRequiredField | Self::SemanticQualityFailure => {
                FailureClass::RecoverableSemantic
            }
            Self::BudgetExhausted => FailureClass::ResourceExhaustion,
            Self::ModelUnavailable => FailureClass::TransientInfrastructure,
        }
    }

    /// Structural failures are the ones the repair cascade can address
    pub const fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::ParseError
                | Self::FieldNameMismatch
                | Self::TypeMismatch
                | Self::MissingRequiredField
                | Self::ConstraintViolation
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const ALL: [FailureKind; 8] = [
            FailureKind::ParseError,
            FailureKind::FieldNameMismatch,
            FailureKind::TypeMismatch,
            FailureKind::MissingRequiredField,
            FailureKind::ConstraintViolation,
            FailureKind::SemanticQualityFailure,
            FailureKind::ModelUnavailable,
            FailureKind::BudgetExhausted,
        ];
        ALL.into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown failure kind: {s}"))
    }
}

// =============================================================================
// Model Tier
// =============================================================================

/// Model tiers in ascending cost/capability
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// Fast/cheap model
    #[default]
    Tier1,
    /// Stronger reasoning model
    Tier2,
    /// Largest-context model
    Tier3,
}

impl ModelTier {
    pub const ALL: [ModelTier; 3] = [Self::Tier1, Self::Tier2, Self::Tier3];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Tier1 => "tier1",
            Self::Tier2 => "tier2",
            Self::Tier3 => "tier3",
        }
    }

    pub const fn index(&self) -> usize {
        match self {
            Self::Tier1 => 0,
            Self::Tier2 => 1,
            Self::Tier3 => 2,
        }
    }

    /// Next tier up, saturating at Tier3
    pub const fn escalate(&self) -> Self {
        match self {
            Self::Tier1 => Self::Tier2,
            Self::Tier2 | Self::Tier3 => Self::Tier3,
        }
    }

    pub const fn downgrade(&self) -> Self {
        match self {
            Self::Tier1 | Self::Tier2 => Self::Tier1,
            Self::Tier3 => Self::Tier2,
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tier1" => Ok(Self::Tier1),
            "tier2" => Ok(Self::Tier2),
            "tier3" => Ok(Self::Tier3),
            other => Err(format!("unknown model tier: {other}")),
        }
    }
}

// =============================================================================
// Repair Strategy
// =============================================================================

/// Closed set of repair strategies, declared in ascending expected cost
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RepairStrategy {
    StructuralAutoFix,
    FieldNameNormalize,
    PatternFallback,
    #[serde(rename = "LLMAssistedRepair")]
    LlmAssistedRepair,
    MultiStepCritiqueRevise,
    PartialFieldRegeneration,
}

impl RepairStrategy {
    pub const ALL: [RepairStrategy; 6] = [
        Self::StructuralAutoFix,
        Self::FieldNameNormalize,
        Self::PatternFallback,
        Self::LlmAssistedRepair,
        Self::MultiStepCritiqueRevise,
        Self::PartialFieldRegeneration,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::StructuralAutoFix => "StructuralAutoFix",
            Self::FieldNameNormalize => "FieldNameNormalize",
            Self::PatternFallback => "PatternFallback",
            Self::LlmAssistedRepair => "LLMAssistedRepair",
            Self::MultiStepCritiqueRevise => "MultiStepCritiqueRevise",
            Self::PartialFieldRegeneration => "PartialFieldRegeneration",
        }
    }

    /// Static rank, used as the tie-break after estimated cost
    pub const fn rank(&self) -> u8 {
        match self {
            Self::StructuralAutoFix => 0,
            Self::FieldNameNormalize => 1,
            Self::PatternFallback => 2,
            Self::LlmAssistedRepair => 3,
            Self::MultiStepCritiqueRevise => 4,
            Self::PartialFieldRegeneration => 5,
        }
    }

    pub const fn is_deterministic(&self) -> bool {
        matches!(
            self,
            Self::StructuralAutoFix | Self::FieldNameNormalize | Self::PatternFallback
        )
    }

    /// Number of model calls one invocation makes
    pub const fn model_calls(&self) -> u32 {
        match self {
            Self::StructuralAutoFix | Self::FieldNameNormalize | Self::PatternFallback => 0,
            Self::LlmAssistedRepair | Self::PartialFieldRegeneration => 1,
            Self::MultiStepCritiqueRevise => 2,
        }
    }
}

impl fmt::Display for RepairStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepairStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| format!("unknown repair strategy: {s}"))
    }
}

// =============================================================================
// Strategy Used / Outcome
// =============================================================================

/// What produced an attempt's candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum StrategyUsed {
    /// A raw model output (initial or regenerated) with no successful repair
    Generation,
    Repair(RepairStrategy),
}

impl StrategyUsed {
    pub fn repair(&self) -> Option<RepairStrategy> {
        match self {
            Self::Generation => None,
            Self::Repair(s) => Some(*s),
        }
    }
}

impl fmt::Display for StrategyUsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generation => f.write_str("Generation"),
            Self::Repair(s) => f.write_str(s.as_str()),
        }
    }
}

impl From<StrategyUsed> for String {
    fn from(s: StrategyUsed) -> Self {
        s.to_string()
    }
}

impl TryFrom<String> for StrategyUsed {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s == "Generation" {
            Ok(Self::Generation)
        } else {
            s.parse().map(Self::Repair)
        }
    }
}

/// Result of an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Outcome {
    Success,
    Failure(FailureKind),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn failure(&self) -> Option<FailureKind> {
        match self {
            Self::Success => None,
            Self::Failure(kind) => Some(*kind),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("Success"),
            Self::Failure(kind) => f.write_str(kind.as_str()),
        }
    }
}

impl From<Outcome> for String {
    fn from(o: Outcome) -> Self {
        o.to_string()
    }
}

impl TryFrom<String> for Outcome {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s == "Success" {
            Ok(Self::Success)
        } else {
            s.parse().map(Self::Failure)
        }
    }
}

// =============================================================================
// Attempt
// =============================================================================

/// One candidate-producing event against a unit. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    pub attempt_index: u32,
    pub strategy_used: StrategyUsed,
    /// `None` when no model was called (caller-supplied output, deterministic repair)
    pub model_tier: Option<ModelTier>,
    pub raw_output: String,
    pub tokens_consumed: u64,
    pub cost_usd: f64,
    pub latency_ms: u64,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Attempt {
    pub fn is_model_call(&self) -> bool {
        self.model_tier.is_some()
    }

    pub fn failure(&self) -> Option<FailureKind> {
        self.outcome.failure()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_order_matches_rank() {
        let mut sorted = RepairStrategy::ALL;
        sorted.sort_by_key(|s| s.rank());
        assert_eq!(sorted, RepairStrategy::ALL);
        assert!(RepairStrategy::PatternFallback < RepairStrategy::LlmAssistedRepair);
    }

    #[test]
    fn test_tier_escalation_saturates() {
        assert_eq!(ModelTier::Tier1.escalate(), ModelTier::Tier2);
        assert_eq!(ModelTier::Tier3.escalate(), ModelTier::Tier3);
        assert_eq!(ModelTier::Tier1.downgrade(), ModelTier::Tier1);
    }

    #[test]
    fn test_strategy_used_serializes_as_name() {
        let json = serde_json::to_string(&StrategyUsed::Repair(RepairStrategy::LlmAssistedRepair))
            .unwrap();
        assert_eq!(json, "\"LLMAssistedRepair\"");
        let back: StrategyUsed = serde_json::from_str("\"Generation\"").unwrap();
        assert_eq!(back, StrategyUsed::Generation);
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_string(&Outcome::Failure(FailureKind::ParseError)).unwrap();
        assert_eq!(json, "\"ParseError\"");
        let ok: Outcome = serde_json::from_str("\"Success\"").unwrap();
        assert!(ok.is_success());
        assert!(serde_json::from_str::<Outcome>("\"Nope\"").is_err());
    }

    #[test]
    fn test_failure_classes() {
        assert_eq!(
            FailureKind::BudgetExhausted.class(),
            FailureClass::ResourceExhaustion
        );
        assert_eq!(
            FailureKind::ModelUnavailable.class(),
            FailureClass::TransientInfrastructure
        );
        assert!(FailureKind::TypeMismatch.is_structural());
        assert!(!FailureKind::SemanticQualityFailure.is_structural());
    }

    #[test]
    fn test_attempt_camel_case_layout() {
        let attempt = Attempt {
            attempt_index: 0,
            strategy_used: StrategyUsed::Repair(RepairStrategy::StructuralAutoFix),
            model_tier: None,
            raw_output: "{".into(),
            tokens_consumed: 0,
            cost_usd: 0.0,
            latency_ms: 1,
            outcome: Outcome::Success,
            semantic_score: None,
            note: None,
        };
        let value = serde_json::to_value(&attempt).unwrap();
        assert_eq!(value["attemptIndex"], 0);
        assert_eq!(value["strategyUsed"], "StructuralAutoFix");
        assert_eq!(value["outcome"], "Success");
        assert!(value.get("note").is_none());
    }
}

//! Model tier routing.
//!
//! A pure function of the unit, its attempt history, and what the budget can
//! afford. Floors are hard requirements and are never downgraded; preferences
//! give way when the remaining budget cannot pay for them.

use crate::ai::client::TierTable;
use crate::types::{Attempt, FailureKind, GenerationUnit, ModelTier};

/// Inputs for one routing decision
#[derive(Debug, Clone, Copy)]
pub struct RouteRequest<'a> {
    pub unit: &'a GenerationUnit,
    /// Estimated tokens of the prompt about to be sent
    pub context_tokens: u64,
    /// Attempts recorded so far for the unit
    pub history: &'a [Attempt],
}

#[derive(Debug, Clone)]
pub struct ModelRouter {
    tiers: TierTable,
}

impl ModelRouter {
    pub fn new(tiers: TierTable) -> Self {
        Self { tiers }
    }

    /// Lowest tier the request may be served by
    pub fn floor(&self, request: &RouteRequest<'_>) -> ModelTier {
        let mut floor = ModelTier::Tier1;

        if request.unit.is_critical() {
            floor = floor.max(ModelTier::Tier2);
        }

        if request.context_tokens > self.tiers.tier1.input_token_ceiling {
            floor = floor.max(ModelTier::Tier2);
        }
        if request.context_tokens > self.tiers.tier2.input_token_ceiling {
            floor = ModelTier::Tier3;
        }

        // Never retry against a backend that just failed
        if let Some(last) = request.history.iter().rev().find(|a| a.is_model_call())
            && last.failure() == Some(FailureKind::ModelUnavailable)
            && let Some(tier) = last.model_tier
        {
            floor = floor.max(tier.escalate());
        }

        floor
    }

    /// Preferred tier before budget considerations
    pub fn preferred(&self, request: &RouteRequest<'_>) -> ModelTier {
        let model_calls: Vec<&Attempt> = request
            .history
            .iter()
            .filter(|a| a.is_model_call())
            .collect();

        let mut tier = ModelTier::Tier1;
        if !model_calls.is_empty() {
            tier = ModelTier::Tier2;
        }

        // Once two consecutive Tier2 calls have failed the unit stays on Tier3
        let failed_on_tier2 =
            |a: &&Attempt| a.model_tier == Some(ModelTier::Tier2) && !a.outcome.is_success();
        if model_calls
            .windows(2)
            .any(|pair| pair.iter().all(failed_on_tier2))
        {
            tier = ModelTier::Tier3;
        }

        tier.max(self.floor(request))
    }

    /// Select the tier for the next model call. `can_afford` reports whether
    /// the budget could pay for a call on the given tier.
    pub fn select_tier(
        &self,
        request: &RouteRequest<'_>,
        can_afford: impl Fn(ModelTier) -> bool,
    ) -> ModelTier {
        let floor = self.floor(request);
        let mut tier = self.preferred(request);

        while tier > floor && !can_afford(tier) {
            tier = tier.downgrade().max(floor);
        }

        tracing::trace!(
            unit = %request.unit.unit_id,
            %floor,
            %tier,
            "Tier selected"
        );
        tier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::validation::{FieldKind, FieldSpec, TargetSchema};
    use crate::types::{Outcome, RepairStrategy, StrategyUsed};

    fn unit() -> GenerationUnit {
        GenerationUnit::new(
            "u1",
            TargetSchema::new("meta", vec![FieldSpec::new("title", FieldKind::String)]),
        )
    }

    fn call(index: u32, tier: ModelTier, outcome: Outcome) -> Attempt {
        Attempt {
            attempt_index: index,
            strategy_used: StrategyUsed::Repair(RepairStrategy::LlmAssistedRepair),
            model_tier: Some(tier),
            raw_output: String::new(),
            tokens_consumed: 10,
            cost_usd: 0.0,
            latency_ms: 1,
            outcome,
            semantic_score: None,
            note: None,
        }
    }

    fn route(unit: &GenerationUnit, context_tokens: u64, history: &[Attempt]) -> ModelTier {
        ModelRouter::new(TierTable::default()).select_tier(
            &RouteRequest {
                unit,
                context_tokens,
                history,
            },
            |_| true,
        )
    }

    #[test]
    fn test_standard_first_call_tier1() {
        assert_eq!(route(&unit(), 100, &[]), ModelTier::Tier1);
    }

    #[test]
    fn test_critical_always_tier2() {
        assert_eq!(route(&unit().critical(), 100, &[]), ModelTier::Tier2);
    }

    #[test]
    fn test_second_repair_attempt_tier2() {
        let history = [call(0, ModelTier::Tier1, Outcome::Failure(FailureKind::TypeMismatch))];
        assert_eq!(route(&unit(), 100, &history), ModelTier::Tier2);
    }

    #[test]
    fn test_two_failed_tier2_escalate() {
        let history = [
            call(0, ModelTier::Tier2, Outcome::Failure(FailureKind::TypeMismatch)),
            call(1, ModelTier::Tier2, Outcome::Failure(FailureKind::SemanticQualityFailure)),
        ];
        assert_eq!(route(&unit(), 100, &history), ModelTier::Tier3);

        let mut longer = history.to_vec();
        longer.push(call(2, ModelTier::Tier3, Outcome::Failure(FailureKind::TypeMismatch)));
        assert_eq!(route(&unit(), 100, &longer), ModelTier::Tier3);
    }

    #[test]
    fn test_large_context_tier3() {
        let tiers = TierTable::default();
        let huge = tiers.tier2.input_token_ceiling + 1;
        assert_eq!(route(&unit(), huge, &[]), ModelTier::Tier3);

        let medium = tiers.tier1.input_token_ceiling + 1;
        assert_eq!(route(&unit(), medium, &[]), ModelTier::Tier2);
    }

    #[test]
    fn test_unavailable_escalates_past_failed_tier() {
        let history = [call(0, ModelTier::Tier2, Outcome::Failure(FailureKind::ModelUnavailable))];
        assert_eq!(route(&unit(), 100, &history), ModelTier::Tier3);
    }

    #[test]
    fn test_preference_downgraded_but_floor_kept() {
        let router = ModelRouter::new(TierTable::default());
        let history = [
            call(0, ModelTier::Tier2, Outcome::Failure(FailureKind::TypeMismatch)),
            call(1, ModelTier::Tier2, Outcome::Failure(FailureKind::TypeMismatch)),
        ];
        let standard = unit();
        let request = RouteRequest {
            unit: &standard,
            context_tokens: 100,
            history: &history,
        };
        assert_eq!(
            router.select_tier(&request, |t| t == ModelTier::Tier1),
            ModelTier::Tier1
        );

        let critical = unit().critical();
        let request = RouteRequest {
            unit: &critical,
            context_tokens: 100,
            history: &[],
        };
        assert_eq!(router.select_tier(&request, |_| false), ModelTier::Tier2);
    }

    #[test]
    fn test_deterministic() {
        let history = [call(0, ModelTier::Tier1, Outcome::Success)];
        let first = route(&unit(), 100, &history);
        for _ in 0..10 {
            assert_eq!(route(&unit(), 100, &history), first);
        }
    }
}

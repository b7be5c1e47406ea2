//! Model Client Abstraction
//!
//! The cascade reaches a model through one operation,
//! [`ModelClient::call_model`]`(tier, prompt) -> { text, tokensUsed, costUsd }`.
//! Transport, prompt formatting, and model selection per tier live behind it.
//!
//! ## Modules
//!
//! - `openai`: OpenAI-compatible Chat Completions client
//! - `limiter`: per-tier concurrency limits as a client decorator

mod limiter;
mod openai;

pub use limiter::TierLimiter;
pub use openai::OpenAiClient;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::constants::tier as tier_constants;
use crate::types::{CascadeError, ModelCallError, ModelTier, Result};

// =============================================================================
// Prompt and Reply
// =============================================================================

/// What a prompt asks the model to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptKind {
    /// Produce the whole unit from its source context
    Generate,
    /// Fix a broken fragment given the specific error
    Repair,
    /// Explain in prose what is wrong with a candidate
    Critique,
    /// Produce a corrected candidate conditioned on a critique
    Revise,
    /// Produce the value of a single field
    FieldRegeneration { field: String },
}

impl fmt::Display for PromptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generate => f.write_str("generate"),
            Self::Repair => f.write_str("repair"),
            Self::Critique => f.write_str("critique"),
            Self::Revise => f.write_str("revise"),
            Self::FieldRegeneration { field } => write!(f, "field:{field}"),
        }
    }
}

/// Prompt context handed to the transport
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPrompt {
    pub kind: PromptKind,
    pub system: String,
    pub user: String,
    /// Output cap requested from the backend
    pub max_output_tokens: u64,
    /// Whether the reply must be a JSON document
    pub expects_json: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModelReply {
    pub text: String,
    pub tokens_used: u64,
    pub cost_usd: f64,
}

// =============================================================================
// Client Trait
// =============================================================================

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Invoke the model serving `tier`. Any error is treated by the cascade
    /// as `ModelUnavailable`.
    async fn call_model(
        &self,
        tier: ModelTier,
        prompt: &ModelPrompt,
    ) -> std::result::Result<ModelReply, ModelCallError>;

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// Shared client for concurrently processed units
pub type SharedClient = Arc<dyn ModelClient>;

// =============================================================================
// Tier Profiles
// =============================================================================

/// Capabilities and prices of the model behind one tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierProfile {
    pub model: String,
    /// Largest prompt the model accepts
    pub input_token_ceiling: u64,
    pub max_output_tokens: u64,
    pub cost_per_1k_tokens: f64,
}

impl TierProfile {
    pub fn estimate_cost(&self, tokens: u64) -> f64 {
        tokens as f64 / 1000.0 * self.cost_per_1k_tokens
    }
}

impl Default for TierProfile {
    fn default() -> Self {
        TierTable::default().tier1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierTable {
    pub tier1: TierProfile,
    pub tier2: TierProfile,
    pub tier3: TierProfile,
}

impl Default for TierTable {
    fn default() -> Self {
        use tier_constants::{fast, large_context, reasoning};
        Self {
            tier1: TierProfile {
                model: fast::MODEL.to_string(),
                input_token_ceiling: fast::INPUT_TOKEN_CEILING,
                max_output_tokens: fast::MAX_OUTPUT_TOKENS,
                cost_per_1k_tokens: fast::COST_PER_1K_TOKENS,
            },
            tier2: TierProfile {
                model: reasoning::MODEL.to_string(),
                input_token_ceiling: reasoning::INPUT_TOKEN_CEILING,
                max_output_tokens: reasoning::MAX_OUTPUT_TOKENS,
                cost_per_1k_tokens: reasoning::COST_PER_1K_TOKENS,
            },
            tier3: TierProfile {
                model: large_context::MODEL.to_string(),
                input_token_ceiling: large_context::INPUT_TOKEN_CEILING,
                max_output_tokens: large_context::MAX_OUTPUT_TOKENS,
                cost_per_1k_tokens: large_context::COST_PER_1K_TOKENS,
            },
        }
    }
}

impl TierTable {
    pub fn get(&self, tier: ModelTier) -> &TierProfile {
        match tier {
            ModelTier::Tier1 => &self.tier1,
            ModelTier::Tier2 => &self.tier2,
            ModelTier::Tier3 => &self.tier3,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for tier in ModelTier::ALL {
            let profile = self.get(tier);
            if profile.model.trim().is_empty() {
                return Err(CascadeError::Config(format!("{tier}: model must be set")));
            }
            if profile.input_token_ceiling == 0 || profile.max_output_tokens == 0 {
                return Err(CascadeError::Config(format!(
                    "{tier}: token ceilings must be greater than 0"
                )));
            }
            if profile.cost_per_1k_tokens < 0.0 {
                return Err(CascadeError::Config(format!(
                    "{tier}: cost must not be negative"
                )));
            }
        }
        if self.tier3.input_token_ceiling < self.tier2.input_token_ceiling.max(self.tier1.input_token_ceiling) {
            return Err(CascadeError::Config(
                "tier3 must have the largest input ceiling".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tiers_valid() {
        let tiers = TierTable::default();
        assert!(tiers.validate().is_ok());
        assert!(tiers.tier3.input_token_ceiling > tiers.tier2.input_token_ceiling);
    }

    #[test]
    fn test_estimate_cost() {
        let profile = TierProfile {
            cost_per_1k_tokens: 0.01,
            ..TierProfile::default()
        };
        assert!((profile.estimate_cost(2_000) - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_tier_table() {
        let mut tiers = TierTable::default();
        tiers.tier3.input_token_ceiling = 10;
        assert!(tiers.validate().is_err());
    }

    #[test]
    fn test_prompt_kind_display() {
        assert_eq!(PromptKind::Repair.to_string(), "repair");
        assert_eq!(
            PromptKind::FieldRegeneration {
                field: "title".into()
            }
            .to_string(),
            "field:title"
        );
    }
}

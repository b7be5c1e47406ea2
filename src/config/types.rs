//! Configuration Types
//!
//! All configuration structures with sensible defaults.
//! Supports global (`~/.config/regencascade/`) and project (`.regencascade/`)
//! level configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::ai::budget::BudgetLimits;
use crate::ai::client::TierTable;
use crate::constants::{concurrency, network, policy, storage};
use crate::types::{CascadeError, Criticality, Result};

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Quality thresholds and retry ceilings
    pub policy: CascadePolicy,

    /// Model served by each tier
    pub tiers: TierTable,

    /// Model endpoint settings
    pub llm: LlmConfig,

    /// Default job budget (a job file may override it)
    pub budget: BudgetLimits,

    pub concurrency: ConcurrencyConfig,

    pub storage: StorageConfig,
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    /// Returns `CascadeError::Config` on validation failure.
    pub fn validate(&self) -> Result<()> {
        self.policy.validate()?;
        self.tiers.validate()?;
        self.budget.validate()?;

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(CascadeError::Config(format!(
                "llm.temperature must be between 0.0 and 2.0, got {}",
                self.llm.temperature
            )));
        }

        if self.llm.timeout_secs == 0 || self.llm.call_timeout_secs == 0 {
            return Err(CascadeError::Config(
                "llm timeouts must be greater than 0".to_string(),
            ));
        }

        if self.concurrency.units == 0 || self.concurrency.per_tier.contains(&0) {
            return Err(CascadeError::Config(
                "concurrency limits must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

// =============================================================================
// Cascade Policy
// =============================================================================

/// Quality gate and retry policy. The defaults are the documented
/// thresholds; all of them are tunable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadePolicy {
    /// Minimum semantic score for standard units
    pub standard_threshold: f64,
    /// Minimum semantic score for critical units
    pub critical_threshold: f64,
    /// Maximum attempts per unit
    pub retry_ceiling: u32,
    /// Recurrences of one failure kind that unlock critique/revise
    pub recurrence_for_critique: usize,
    /// ModelUnavailable occurrences within a unit that end it
    pub model_unavailable_limit: usize,
}

impl Default for CascadePolicy {
    fn default() -> Self {
        Self {
            standard_threshold: policy::STANDARD_THRESHOLD,
            critical_threshold: policy::CRITICAL_THRESHOLD,
            retry_ceiling: policy::RETRY_CEILING,
            recurrence_for_critique: policy::RECURRENCE_FOR_CRITIQUE,
            model_unavailable_limit: policy::MODEL_UNAVAILABLE_LIMIT,
        }
    }
}

impl CascadePolicy {
    pub fn threshold(&self, criticality: Criticality) -> f64 {
        match criticality {
            Criticality::Critical => self.critical_threshold,
            Criticality::Standard => self.standard_threshold,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("standard_threshold", self.standard_threshold),
            ("critical_threshold", self.critical_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(CascadeError::Config(format!(
                    "policy.{name} must be in (0, 1], got {value}"
                )));
            }
        }
        if self.retry_ceiling == 0 {
            return Err(CascadeError::Config(
                "policy.retry_ceiling must be greater than 0".to_string(),
            ));
        }
        if self.recurrence_for_critique == 0 || self.model_unavailable_limit == 0 {
            return Err(CascadeError::Config(
                "policy recurrence limits must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// LLM Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// OpenAI-compatible base URL
    pub api_base: String,

    /// Falls back to `OPENAI_API_KEY`; never written back to disk
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    pub temperature: f32,

    /// HTTP client timeout (seconds)
    pub timeout_secs: u64,

    pub connect_timeout_secs: u64,

    /// Per-attempt deadline enforced by the orchestrator (seconds)
    pub call_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: network::DEFAULT_API_BASE.to_string(),
            api_key: None,
            temperature: 0.2,
            timeout_secs: network::DEFAULT_CALL_TIMEOUT_SECS,
            connect_timeout_secs: network::CONNECTION_TIMEOUT_SECS,
            call_timeout_secs: network::DEFAULT_CALL_TIMEOUT_SECS,
        }
    }
}

impl LlmConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

// =============================================================================
// Concurrency & Storage
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Units processed in parallel within one job
    pub units: usize,
    /// In-flight model calls per tier (tier1, tier2, tier3)
    pub per_tier: [usize; 3],
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            units: concurrency::DEFAULT_UNIT_CONCURRENCY,
            per_tier: [concurrency::DEFAULT_PER_TIER; 3],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Record store path, relative to the working directory
    pub db_path: PathBuf,
    pub pool_size: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(".regencascade").join(storage::DEFAULT_DB_FILE),
            pool_size: storage::POOL_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.policy.retry_ceiling, 10);
        assert_eq!(config.policy.threshold(Criticality::Critical), 0.85);
        assert_eq!(config.policy.threshold(Criticality::Standard), 0.75);
    }

    #[test]
    fn test_threshold_bounds() {
        let mut config = Config::default();
        config.policy.standard_threshold = 0.0;
        assert!(config.validate().is_err());

        config.policy.standard_threshold = 1.0;
        assert!(config.validate().is_ok());

        config.policy.critical_threshold = 1.2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut config = Config::default();
        config.concurrency.per_tier = [1, 0, 1];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.policy.retry_ceiling = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.llm.temperature = 3.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_key_not_serialized() {
        let mut config = Config::default();
        config.llm.api_key = Some("sk-hidden".into());
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(!toml.contains("sk-hidden"));
        assert!(toml.contains("[policy]"));
    }
}

//! Global Constants
//!
//! Centralized policy defaults for the cascade.
//! All magic numbers should be defined here with documentation.
//! Values that an operator may want to tune are also exposed through
//! [`crate::config::Config`]; these are only the defaults.

/// Quality gate and retry policy
pub mod policy {
    /// Minimum semantic score for standard units
    pub const STANDARD_THRESHOLD: f64 = 0.75;

    /// Minimum semantic score for critical units
    pub const CRITICAL_THRESHOLD: f64 = 0.85;

    /// Maximum attempts per unit (all strategies and regenerations counted)
    pub const RETRY_CEILING: u32 = 10;

    /// Same failure kind recurring this often escalates to critique/revise
    pub const RECURRENCE_FOR_CRITIQUE: usize = 2;

    /// A second ModelUnavailable within one unit is terminal
    pub const MODEL_UNAVAILABLE_LIMIT: usize = 2;
}

/// Token budget constants
pub mod budget {
    /// Default total token ceiling per job
    pub const DEFAULT_TOTAL_CEILING: u64 = 1_000_000;

    /// Default input-token ceiling per single model call
    pub const DEFAULT_INPUT_CEILING: u64 = 200_000;

    /// Warning threshold (fraction of ceiling)
    pub const WARNING_THRESHOLD: f64 = 0.75;

    /// Critical threshold (fraction of ceiling)
    pub const CRITICAL_THRESHOLD: f64 = 0.90;

    /// Cost is stored as micro-dollars to keep atomics integral
    pub const MICROS_PER_USD: f64 = 1_000_000.0;
}

/// Model tier defaults
pub mod tier {
    /// Tier 1: fast/cheap model
    pub mod fast {
        pub const MODEL: &str = "gpt-4o-mini";
        pub const INPUT_TOKEN_CEILING: u64 = 16_000;
        pub const MAX_OUTPUT_TOKENS: u64 = 1_024;
        pub const COST_PER_1K_TOKENS: f64 = 0.0006;
    }

    /// Tier 2: stronger reasoning model
    pub mod reasoning {
        pub const MODEL: &str = "gpt-4o";
        pub const INPUT_TOKEN_CEILING: u64 = 32_000;
        pub const MAX_OUTPUT_TOKENS: u64 = 2_048;
        pub const COST_PER_1K_TOKENS: f64 = 0.01;
    }

    /// Tier 3: largest-context model
    pub mod large_context {
        pub const MODEL: &str = "gpt-4.1";
        pub const INPUT_TOKEN_CEILING: u64 = 1_000_000;
        pub const MAX_OUTPUT_TOKENS: u64 = 4_096;
        pub const COST_PER_1K_TOKENS: f64 = 0.008;
    }
}

/// Prompt construction limits
pub mod prompt {
    /// Maximum characters of broken output echoed into a repair prompt
    pub const MAX_FRAGMENT_CHARS: usize = 4_000;

    /// Maximum characters of source context used by partial-field regeneration
    pub const FIELD_CONTEXT_EXCERPT_CHARS: usize = 1_200;

    /// Maximum critique lines carried into a regeneration prompt
    pub const MAX_CRITIQUE_LINES: usize = 8;

    /// Output cap for a single regenerated field
    pub const FIELD_MAX_OUTPUT_TOKENS: u64 = 256;

    /// Output cap for the prose critique call
    pub const CRITIQUE_MAX_OUTPUT_TOKENS: u64 = 512;
}

/// Concurrency constants
pub mod concurrency {
    /// Default number of units processed in parallel within a job
    pub const DEFAULT_UNIT_CONCURRENCY: usize = 4;

    /// Default in-flight model calls per tier
    pub const DEFAULT_PER_TIER: usize = 4;
}

/// HTTP/Network constants
pub mod network {
    /// Default per-call timeout (seconds)
    pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 120;

    /// Connection timeout (seconds)
    pub const CONNECTION_TIMEOUT_SECS: u64 = 30;

    /// Default OpenAI-compatible endpoint
    pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
}

/// Storage constants
pub mod storage {
    /// Default record store filename
    pub const DEFAULT_DB_FILE: &str = "regencascade.db";

    /// Maximum pooled SQLite connections
    pub const POOL_SIZE: u32 = 4;
}

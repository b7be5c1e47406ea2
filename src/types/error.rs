//! Unified Error Type System
//!
//! Centralized error types for the cascade. Two families live here:
//!
//! - [`CascadeError`]: infrastructure errors (I/O, storage, config, budget)
//!   propagated with `?` through the crate.
//! - [`ModelCallError`]: a failed `callModel` invocation, classified by
//!   [`ErrorCategory`] so the orchestrator can log why a backend failed.
//!   Every model-call failure surfaces to the cascade as
//!   `FailureKind::ModelUnavailable`.
//!
//! Recoverable generation outcomes (`FailureKind`) are *not* errors; they are
//! absorbed by the orchestrator and only shape the final verdict.

use std::time::Duration;
use thiserror::Error;

use crate::ai::budget::BudgetError;

// =============================================================================
// Error Categories
// =============================================================================

/// Transport-level error categories for model backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rate limited by the backend
    RateLimit,
    /// Request exceeded the model's context window
    TokenLimit,
    /// Authentication failed
    Auth,
    /// Network/connectivity issues
    Network,
    /// Backend down or model not served
    Unavailable,
    /// Request rejected as malformed
    BadRequest,
    /// Call exceeded its per-call timeout
    Timeout,
    /// Temporary server issues
    Transient,
    /// Unknown error
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimit => write!(f, "RATE_LIMIT"),
            Self::TokenLimit => write!(f, "TOKEN_LIMIT"),
            Self::Auth => write!(f, "AUTH"),
            Self::Network => write!(f, "NETWORK"),
            Self::Unavailable => write!(f, "UNAVAILABLE"),
            Self::BadRequest => write!(f, "BAD_REQUEST"),
            Self::Timeout => write!(f, "TIMEOUT"),
            Self::Transient => write!(f, "TRANSIENT"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl ErrorCategory {
    /// Whether escalating to a larger tier could plausibly help
    pub fn favors_escalation(&self) -> bool {
        matches!(self, Self::TokenLimit | Self::Unavailable | Self::Timeout)
    }
}

// =============================================================================
// Model Call Error
// =============================================================================

/// A failed model call with category and backend context
#[derive(Debug, Clone, Error)]
#[error("[{backend}:{category}] {message}")]
pub struct ModelCallError {
    pub category: ErrorCategory,
    pub message: String,
    pub backend: String,
}

impl ModelCallError {
    pub fn new(
        category: ErrorCategory,
        message: impl Into<String>,
        backend: impl Into<String>,
    ) -> Self {
        Self {
            category,
            message: message.into(),
            backend: backend.into(),
        }
    }

    pub fn timeout(backend: impl Into<String>, duration: Duration) -> Self {
        Self::new(
            ErrorCategory::Timeout,
            format!("model call timed out after {duration:?}"),
            backend,
        )
    }

    /// Classify a free-form error message from a backend
    pub fn classify(message: &str, backend: &str) -> Self {
        let lower = message.to_lowercase();

        let category = if lower.contains("rate limit")
            || lower.contains("429")
            || lower.contains("too many requests")
            || lower.contains("quota exceeded")
        {
            ErrorCategory::RateLimit
        } else if lower.contains("context length")
            || lower.contains("context too long")
            || lower.contains("too large")
            || (lower.contains("token")
                && (lower.contains("limit") || lower.contains("maximum")))
        {
            ErrorCategory::TokenLimit
        } else if lower.contains("401")
            || lower.contains("403")
            || lower.contains("api key")
            || lower.contains("unauthorized")
        {
            ErrorCategory::Auth
        } else if lower.contains("timed out") || lower.contains("timeout") {
            ErrorCategory::Timeout
        } else if lower.contains("connection")
            || lower.contains("dns")
            || lower.contains("network")
            || lower.contains("unreachable")
        {
            ErrorCategory::Network
        } else if lower.contains("503")
            || lower.contains("502")
            || lower.contains("service unavailable")
            || lower.contains("model not found")
            || lower.contains("overloaded")
        {
            ErrorCategory::Unavailable
        } else if lower.contains("400") || lower.contains("bad request") {
            ErrorCategory::BadRequest
        } else if lower.contains("500") || lower.contains("internal") || lower.contains("retry") {
            ErrorCategory::Transient
        } else {
            ErrorCategory::Unknown
        };

        Self::new(category, message, backend)
    }

    /// Classify an HTTP status code directly
    pub fn from_http_status(status: u16, message: &str, backend: &str) -> Self {
        let category = match status {
            429 => ErrorCategory::RateLimit,
            401 | 403 => ErrorCategory::Auth,
            400 => ErrorCategory::BadRequest,
            404 | 502 | 503 => ErrorCategory::Unavailable,
            408 | 504 => ErrorCategory::Timeout,
            500 => ErrorCategory::Transient,
            413 => ErrorCategory::TokenLimit,
            _ => ErrorCategory::Unknown,
        };
        Self::new(category, message, backend)
    }
}

// =============================================================================
// Application Error
// =============================================================================

#[derive(Debug, Error)]
pub enum CascadeError {
    // -------------------------------------------------------------------------
    // System Errors (auto From impl)
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // -------------------------------------------------------------------------
    // Model Errors
    // -------------------------------------------------------------------------
    #[error("Model call failed: {0}")]
    Model(#[from] ModelCallError),

    #[error("Timeout after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    // -------------------------------------------------------------------------
    // Domain Errors
    // -------------------------------------------------------------------------
    #[error("Schema error in {schema}: {message}")]
    Schema { schema: String, message: String },

    #[error("Invalid job submission: {0}")]
    InvalidJob(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Record for unit {unit_id} is already sealed")]
    RecordSealed { unit_id: String },

    // -------------------------------------------------------------------------
    // Budget Errors
    // -------------------------------------------------------------------------
    #[error("Budget exhausted: {0}")]
    BudgetExhausted(BudgetError),

    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("Job {0} already has an open budget")]
    JobAlreadyOpen(String),
}

impl From<BudgetError> for CascadeError {
    fn from(err: BudgetError) -> Self {
        CascadeError::BudgetExhausted(err)
    }
}

pub type Result<T> = std::result::Result<T, CascadeError>;

impl CascadeError {
    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a schema error
    pub fn schema(schema: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Schema {
            schema: schema.into(),
            message: message.into(),
        }
    }
}

/// Context extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn with_context<C: Into<String>>(self, context: C) -> Result<T>;

    /// Add context using a closure (lazy evaluation)
    fn with_context_fn<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn with_context<C: Into<String>>(self, context: C) -> Result<T> {
        self.map_err(|e| CascadeError::Storage(format!("{}: {}", context.into(), e)))
    }

    fn with_context_fn<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|e| CascadeError::Storage(format!("{}: {}", f().into(), e)))
    }
}

// =============================================================================
// Tests
// =============================================================================

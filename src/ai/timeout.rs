//! Unified Timeout Configuration
//!
//! Every model call is wrapped in a per-call timeout supplied by the caller.
//! An elapsed call surfaces as a [`ModelCallError`] with
//! [`ErrorCategory::Timeout`](crate::types::ErrorCategory::Timeout), which the
//! cascade treats as `ModelUnavailable`.
//!
//! ## Usage
//!
//! ```ignore
//! use crate::ai::timeout::with_call_timeout;
//!
//! let reply = with_call_timeout(
//!     Duration::from_secs(30),
//!     client.call_model(tier, &prompt),
//!     "tier2",
//! ).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use crate::constants::network as net_constants;
use crate::types::{CascadeError, ModelCallError, Result};

/// Timeouts used by the cascade
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Per model call (default: 2 minutes)
    pub model_call: Duration,
    /// HTTP connection establishment (default: 30 seconds)
    pub connection: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            model_call: Duration::from_secs(net_constants::DEFAULT_CALL_TIMEOUT_SECS),
            connection: Duration::from_secs(net_constants::CONNECTION_TIMEOUT_SECS),
        }
    }
}

impl TimeoutConfig {
    pub fn with_call_timeout(model_call: Duration) -> Self {
        Self {
            model_call,
            ..Default::default()
        }
    }
}

/// Execute an async operation with a timeout
///
/// Returns [`CascadeError::Timeout`] if the operation doesn't complete in time.
pub async fn with_timeout<T, F>(timeout: Duration, future: F, operation_name: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(CascadeError::timeout(operation_name, timeout)),
    }
}

/// Execute a model call with a timeout
///
/// An elapsed call becomes a timeout-category [`ModelCallError`] for `backend`.
pub async fn with_call_timeout<T, F>(
    timeout: Duration,
    future: F,
    backend: &str,
) -> std::result::Result<T, ModelCallError>
where
    F: Future<Output = std::result::Result<T, ModelCallError>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(ModelCallError::timeout(backend, timeout)),
    }
}

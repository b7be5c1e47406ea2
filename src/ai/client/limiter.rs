//! Per-tier concurrency limits.
//!
//! Units of one job run in parallel, but each tier's backend only accepts a
//! bounded number of in-flight calls. [`TierLimiter`] wraps any client and
//! holds a semaphore permit for the duration of each call.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use super::{ModelClient, ModelPrompt, ModelReply, SharedClient};
use crate::types::{ErrorCategory, ModelCallError, ModelTier};

pub struct TierLimiter {
    inner: SharedClient,
    permits: [Arc<Semaphore>; 3],
    limits: [usize; 3],
}

impl TierLimiter {
    /// Same limit for every tier
    pub fn uniform(inner: SharedClient, limit: usize) -> Self {
        Self::new(inner, [limit; 3])
    }

    /// Limits indexed by tier (tier1, tier2, tier3); zero is raised to one
    pub fn new(inner: SharedClient, limits: [usize; 3]) -> Self {
        let limits = limits.map(|l| l.max(1));
        Self {
            inner,
            permits: limits.map(|l| Arc::new(Semaphore::new(l))),
            limits,
        }
    }

    pub fn limit(&self, tier: ModelTier) -> usize {
        self.limits[tier.index()]
    }

    pub fn available(&self, tier: ModelTier) -> usize {
        self.permits[tier.index()].available_permits()
    }
}

#[async_trait]
impl ModelClient for TierLimiter {
    async fn call_model(
        &self,
        tier: ModelTier,
        prompt: &ModelPrompt,
    ) -> std::result::Result<ModelReply, ModelCallError> {
        let _permit = self.permits[tier.index()]
            .acquire()
            .await
            .map_err(|e| ModelCallError::new(ErrorCategory::Unavailable, e.to_string(), self.name()))?;
        self.inner.call_model(tier, prompt).await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

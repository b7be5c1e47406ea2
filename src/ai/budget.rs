//! Job Token Budget Management
//!
//! Thread-safe, per-job token/cost budget with pessimistic reservations.
//!
//! A reservation holds headroom before a model call is dispatched and is
//! reconciled to actual usage afterwards. `held` (consumed plus outstanding
//! reservations) is only ever moved by compare-and-swap, so concurrent units
//! of one job can never jointly overshoot the ceiling.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::budget as budget_constants;
use crate::types::{CascadeError, JobId, Result};

// =============================================================================
// Error Types
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum BudgetError {
    TotalExceeded {
        held: u64,
        ceiling: u64,
        requested: u64,
    },
    InputExceeded {
        requested: u64,
        ceiling: u64,
    },
    CostExceeded {
        held_usd: f64,
        ceiling_usd: f64,
        requested_usd: f64,
    },
}

impl std::fmt::Display for BudgetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TotalExceeded {
                held,
                ceiling,
                requested,
            } => write!(
                f,
                "token budget exceeded: {held}/{ceiling} held (requested: {requested})"
            ),
            Self::InputExceeded { requested, ceiling } => write!(
                f,
                "input tokens {requested} exceed the per-call input ceiling {ceiling}"
            ),
            Self::CostExceeded {
                held_usd,
                ceiling_usd,
                requested_usd,
            } => write!(
                f,
                "cost budget exceeded: ${held_usd:.4}/${ceiling_usd:.4} held (requested: ${requested_usd:.4})"
            ),
        }
    }
}

impl std::error::Error for BudgetError {}

// =============================================================================
// Configuration
// =============================================================================

/// Ceilings for one job, as submitted by the caller
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BudgetLimits {
    pub total_ceiling: u64,
    pub input_ceiling: u64,
    pub cost_ceiling_usd: Option<f64>,
    pub warning_threshold: f64,
    pub critical_threshold: f64,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            total_ceiling: budget_constants::DEFAULT_TOTAL_CEILING,
            input_ceiling: budget_constants::DEFAULT_INPUT_CEILING,
            cost_ceiling_usd: None,
            warning_threshold: budget_constants::WARNING_THRESHOLD,
            critical_threshold: budget_constants::CRITICAL_THRESHOLD,
        }
    }
}

impl BudgetLimits {
    pub fn with_ceiling(total_ceiling: u64) -> Self {
        Self {
            total_ceiling,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.total_ceiling == 0 {
            return Err(CascadeError::Config(
                "Budget total ceiling must be greater than 0".into(),
            ));
        }
        if self.input_ceiling == 0 {
            return Err(CascadeError::Config(
                "Budget input ceiling must be greater than 0".into(),
            ));
        }
        if let Some(cost) = self.cost_ceiling_usd
            && cost <= 0.0
        {
            return Err(CascadeError::Config(format!(
                "Cost ceiling must be positive, got {cost}"
            )));
        }
        if self.warning_threshold <= 0.0 || self.warning_threshold >= 1.0 {
            return Err(CascadeError::Config(format!(
                "Warning threshold must be between 0.0 and 1.0, got {}",
                self.warning_threshold
            )));
        }
        if self.critical_threshold <= self.warning_threshold || self.critical_threshold > 1.0 {
            return Err(CascadeError::Config(format!(
                "Critical threshold must be > warning ({}) and <= 1.0, got {}",
                self.warning_threshold, self.critical_threshold
            )));
        }
        Ok(())
    }
}

/// Pessimistic estimate of one model call
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CallEstimate {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

impl CallEstimate {
    pub fn tokens(tokens: u64) -> Self {
        Self {
            input_tokens: 0,
            output_tokens: tokens,
            cost_usd: 0.0,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

fn to_micros(usd: f64) -> u64 {
    (usd.max(0.0) * budget_constants::MICROS_PER_USD).round() as u64
}

fn from_micros(micros: u64) -> f64 {
    micros as f64 / budget_constants::MICROS_PER_USD
}

// =============================================================================
// Token Budget
// =============================================================================

#[derive(Debug)]
pub struct TokenBudget {
    limits: BudgetLimits,
    /// consumed + outstanding reservations
    held: AtomicU64,
    consumed: AtomicU64,
    cost_held_micros: AtomicU64,
    cost_consumed_micros: AtomicU64,
    reservations: AtomicU64,
    rejections: AtomicU64,
    overruns: AtomicU64,
    overrun_tokens: AtomicU64,
    warning_emitted: AtomicBool,
    critical_emitted: AtomicBool,
}

pub type SharedBudget = Arc<TokenBudget>;

impl TokenBudget {
    pub fn new(limits: BudgetLimits) -> Self {
        Self {
            limits,
            held: AtomicU64::new(0),
            consumed: AtomicU64::new(0),
            cost_held_micros: AtomicU64::new(0),
            cost_consumed_micros: AtomicU64::new(0),
            reservations: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            overrun_tokens: AtomicU64::new(0),
            warning_emitted: AtomicBool::new(false),
            critical_emitted: AtomicBool::new(false),
        }
    }

    pub fn shared(limits: BudgetLimits) -> SharedBudget {
        Arc::new(Self::new(limits))
    }

    pub fn limits(&self) -> &BudgetLimits {
        &self.limits
    }

    pub fn consumed(&self) -> u64 {
        self.consumed.load(Ordering::Acquire)
    }

    /// Headroom not yet consumed or reserved
    pub fn remaining(&self) -> u64 {
        self.limits
            .total_ceiling
            .saturating_sub(self.held.load(Ordering::Acquire))
    }

    /// Advisory check; only [`TokenBudget::reserve`] is authoritative
    pub fn can_afford(&self, estimate: &CallEstimate) -> bool {
        if estimate.total() > self.remaining() || estimate.input_tokens > self.limits.input_ceiling
        {
            return false;
        }
        match self.limits.cost_ceiling_usd {
            Some(ceiling) => {
                from_micros(self.cost_held_micros.load(Ordering::Acquire)) + estimate.cost_usd
                    <= ceiling
            }
            None => true,
        }
    }

    /// Reserve headroom for one call. All or nothing.
    pub fn reserve(
        self: &Arc<Self>,
        estimate: CallEstimate,
    ) -> std::result::Result<Reservation, BudgetError> {
        let tokens = estimate.total();

        if estimate.input_tokens > self.limits.input_ceiling {
            self.rejections.fetch_add(1, Ordering::Relaxed);
            return Err(BudgetError::InputExceeded {
                requested: estimate.input_tokens,
                ceiling: self.limits.input_ceiling,
            });
        }

        loop {
            let held = self.held.load(Ordering::Acquire);
            if tokens > self.limits.total_ceiling.saturating_sub(held) {
                self.rejections.fetch_add(1, Ordering::Relaxed);
                return Err(BudgetError::TotalExceeded {
                    held,
                    ceiling: self.limits.total_ceiling,
                    requested: tokens,
                });
            }
            if self
                .held
                .compare_exchange_weak(held, held + tokens, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }

        let cost_micros = to_micros(estimate.cost_usd);
        if let Some(ceiling) = self.limits.cost_ceiling_usd {
            let ceiling_micros = to_micros(ceiling);
            loop {
                let held = self.cost_held_micros.load(Ordering::Acquire);
                if cost_micros > ceiling_micros.saturating_sub(held) {
                    self.held.fetch_sub(tokens, Ordering::AcqRel);
                    self.rejections.fetch_add(1, Ordering::Relaxed);
                    return Err(BudgetError::CostExceeded {
                        held_usd: from_micros(held),
                        ceiling_usd: ceiling,
                        requested_usd: estimate.cost_usd,
                    });
                }
                if self
                    .cost_held_micros
                    .compare_exchange_weak(
                        held,
                        held + cost_micros,
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    break;
                }
            }
        } else {
            self.cost_held_micros
                .fetch_add(cost_micros, Ordering::AcqRel);
        }

        self.reservations.fetch_add(1, Ordering::Relaxed);
        debug!(tokens, remaining = self.remaining(), "Budget reserved");

        Ok(Reservation {
            budget: Arc::clone(self),
            tokens,
            cost_micros,
            released: false,
        })
    }

    fn settle(&self, reserved: u64, reserved_cost: u64, used: u64, used_cost_usd: f64) -> u64 {
        let charged = used.min(reserved);
        if used > reserved {
            self.overruns.fetch_add(1, Ordering::Relaxed);
            self.overrun_tokens
                .fetch_add(used - reserved, Ordering::Relaxed);
            warn!(reserved, used, "Model call used more tokens than reserved");
        }
        let charged_cost = to_micros(used_cost_usd).min(reserved_cost);

        let consumed = self.consumed.fetch_add(charged, Ordering::AcqRel) + charged;
        self.held.fetch_sub(reserved - charged, Ordering::AcqRel);
        self.cost_consumed_micros
            .fetch_add(charged_cost, Ordering::AcqRel);
        self.cost_held_micros
            .fetch_sub(reserved_cost - charged_cost, Ordering::AcqRel);

        self.check_thresholds(consumed);
        charged
    }

    fn check_thresholds(&self, consumed: u64) {
        if self.limits.total_ceiling == 0 {
            return;
        }
        let util = consumed as f64 / self.limits.total_ceiling as f64;
        if util >= self.limits.critical_threshold
            && !self.critical_emitted.swap(true, Ordering::Relaxed)
        {
            tracing::error!(
                consumed,
                total = self.limits.total_ceiling,
                "CRITICAL: Job token budget at critical threshold"
            );
        } else if util >= self.limits.warning_threshold
            && !self.warning_emitted.swap(true, Ordering::Relaxed)
        {
            warn!(
                consumed,
                total = self.limits.total_ceiling,
                "Job token budget approaching limit"
            );
        }
    }

    pub fn utilization(&self) -> f64 {
        if self.limits.total_ceiling == 0 {
            return 0.0;
        }
        self.consumed() as f64 / self.limits.total_ceiling as f64
    }

    pub fn stats(&self) -> BudgetStats {
        let consumed = self.consumed();
        let held = self.held.load(Ordering::Acquire);
        let utilization = self.utilization();
        BudgetStats {
            total_ceiling: self.limits.total_ceiling,
            consumed,
            outstanding: held.saturating_sub(consumed),
            remaining: self.limits.total_ceiling.saturating_sub(held),
            utilization,
            cost_consumed_usd: from_micros(self.cost_consumed_micros.load(Ordering::Acquire)),
            reservations: self.reservations.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            overrun_tokens: self.overrun_tokens.load(Ordering::Relaxed),
            is_warning: utilization >= self.limits.warning_threshold,
            is_critical: utilization >= self.limits.critical_threshold,
        }
    }
}

// =============================================================================
// Reservation
// =============================================================================

/// A pessimistic hold against a job budget. Released exactly once:
/// explicitly via [`Reservation::release`], or in full on drop.
#[derive(Debug)]
#[must_use = "an unreleased reservation returns its hold on drop"]
pub struct Reservation {
    budget: SharedBudget,
    tokens: u64,
    cost_micros: u64,
    released: bool,
}

impl Reservation {
    pub fn tokens(&self) -> u64 {
        self.tokens
    }

    /// Reconcile to actual usage; returns the tokens charged
    pub fn release(mut self, used_tokens: u64, used_cost_usd: f64) -> u64 {
        self.released = true;
        self.budget
            .settle(self.tokens, self.cost_micros, used_tokens, used_cost_usd)
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.released {
            self.budget.settle(self.tokens, self.cost_micros, 0, 0.0);
        }
    }
}

// =============================================================================
// Allocator
// =============================================================================

/// Registry of per-job budgets. Units draw on the handle returned by
/// `open_job`; the registry only tracks which jobs are live.
#[derive(Debug, Default)]
pub struct BudgetAllocator {
    jobs: DashMap<JobId, SharedBudget>,
}

impl BudgetAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails if `job_id` is already open; a live budget is never replaced
    pub fn open_job(&self, job_id: JobId, limits: BudgetLimits) -> Result<SharedBudget> {
        limits.validate()?;
        match self.jobs.entry(job_id) {
            Entry::Occupied(entry) => Err(CascadeError::JobAlreadyOpen(entry.key().to_string())),
            Entry::Vacant(entry) => {
                let budget = TokenBudget::shared(limits);
                entry.insert(Arc::clone(&budget));
                Ok(budget)
            }
        }
    }

    pub fn budget(&self, job_id: &JobId) -> Option<SharedBudget> {
        self.jobs.get(job_id).map(|b| Arc::clone(b.value()))
    }

    pub fn stats(&self, job_id: &JobId) -> Option<BudgetStats> {
        self.jobs.get(job_id).map(|b| b.stats())
    }

    pub fn close_job(&self, job_id: &JobId) -> Option<BudgetStats> {
        self.jobs.remove(job_id).map(|(_, b)| b.stats())
    }
}

// =============================================================================
// Budget Statistics
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetStats {
    pub total_ceiling: u64,
    pub consumed: u64,
    pub outstanding: u64,
    pub remaining: u64,
    pub utilization: f64,
    pub cost_consumed_usd: f64,
    pub reservations: u64,
    pub rejections: u64,
    pub overruns: u64,
    pub overrun_tokens: u64,
    pub is_warning: bool,
    pub is_critical: bool,
}

impl BudgetStats {
    pub fn summary(&self) -> String {
        let status = if self.is_critical {
            " [CRITICAL]"
        } else if self.is_warning {
            " [WARNING]"
        } else {
            ""
        };
        format!(
            "Budget: {}/{} ({:.1}%){} | Remaining: {} | Cost: ${:.4}",
            self.consumed,
            self.total_ceiling,
            self.utilization * 100.0,
            status,
            self.remaining,
            self.cost_consumed_usd
        )
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn budget(total: u64) -> SharedBudget {
        TokenBudget::shared(BudgetLimits::with_ceiling(total))
    }

    #[test]
    fn test_budget_creation() {
        let budget = budget(1_000_000);
        assert_eq!(budget.remaining(), 1_000_000);
        assert_eq!(budget.utilization(), 0.0);
    }

    #[test]
    fn test_reserve_and_release_reconciles() {
        let budget = budget(10_000);
        let reservation = budget.reserve(CallEstimate::tokens(4_000)).unwrap();
        assert_eq!(budget.remaining(), 6_000);
        assert_eq!(budget.consumed(), 0);

        let charged = reservation.release(1_500, 0.0);
        assert_eq!(charged, 1_500);
        assert_eq!(budget.consumed(), 1_500);
        assert_eq!(budget.remaining(), 8_500);
    }

    #[test]
    fn test_no_partial_reservation() {
        let budget = budget(1_000);
        let held = budget.reserve(CallEstimate::tokens(700)).unwrap();
        let err = budget.reserve(CallEstimate::tokens(500)).unwrap_err();
        assert!(matches!(err, BudgetError::TotalExceeded { requested: 500, .. }));
        assert_eq!(budget.remaining(), 300);
        drop(held);
        assert_eq!(budget.remaining(), 1_000);
        assert_eq!(budget.stats().rejections, 1);
    }

    #[test]
    fn test_overrun_charges_only_reserved() {
        let budget = budget(1_000);
        let reservation = budget.reserve(CallEstimate::tokens(100)).unwrap();
        assert_eq!(reservation.release(250, 0.0), 100);
        let stats = budget.stats();
        assert_eq!(stats.consumed, 100);
        assert_eq!(stats.overruns, 1);
        assert_eq!(stats.overrun_tokens, 150);
    }

    #[test]
    fn test_input_ceiling_enforced() {
        let limits = BudgetLimits {
            input_ceiling: 100,
            ..BudgetLimits::with_ceiling(10_000)
        };
        let budget = TokenBudget::shared(limits);
        let estimate = CallEstimate {
            input_tokens: 150,
            output_tokens: 10,
            cost_usd: 0.0,
        };
        assert!(!budget.can_afford(&estimate));
        assert!(matches!(
            budget.reserve(estimate),
            Err(BudgetError::InputExceeded { .. })
        ));
        assert_eq!(budget.remaining(), 10_000);
    }

    #[test]
    fn test_cost_ceiling_rolls_back_tokens() {
        let limits = BudgetLimits {
            cost_ceiling_usd: Some(0.05),
            ..BudgetLimits::with_ceiling(10_000)
        };
        let budget = TokenBudget::shared(limits);
        let estimate = CallEstimate {
            input_tokens: 10,
            output_tokens: 10,
            cost_usd: 0.10,
        };
        assert!(matches!(
            budget.reserve(estimate),
            Err(BudgetError::CostExceeded { .. })
        ));
        assert_eq!(budget.remaining(), 10_000);
    }

    #[test]
    fn test_budget_stats_thresholds() {
        let budget = budget(10_000);
        budget
            .reserve(CallEstimate::tokens(7_500))
            .unwrap()
            .release(7_500, 0.0);
        let stats = budget.stats();
        assert_eq!(stats.consumed, 7_500);
        assert_eq!(stats.remaining, 2_500);
        assert!(stats.is_warning);
        assert!(!stats.is_critical);
    }

    #[test]
    fn test_allocator_lifecycle() {
        let allocator = BudgetAllocator::new();
        let job = JobId::new("job-1");
        let budget = allocator
            .open_job(job.clone(), BudgetLimits::with_ceiling(1_000))
            .unwrap();

        budget
            .reserve(CallEstimate::tokens(400))
            .unwrap()
            .release(300, 0.0);
        assert_eq!(allocator.stats(&job).unwrap().consumed, 300);
        assert!(budget.reserve(CallEstimate::tokens(800)).is_err());

        let closed = allocator.close_job(&job).unwrap();
        assert_eq!(closed.consumed, 300);
        assert!(allocator.budget(&job).is_none());
        assert!(allocator.stats(&job).is_none());
    }

    #[test]
    fn test_open_job_rejects_live_id() {
        let allocator = BudgetAllocator::new();
        let job = JobId::new("job-1");
        let first = allocator
            .open_job(job.clone(), BudgetLimits::with_ceiling(1_000))
            .unwrap();
        first
            .reserve(CallEstimate::tokens(200))
            .unwrap()
            .release(200, 0.0);

        let err = allocator
            .open_job(job.clone(), BudgetLimits::with_ceiling(50_000))
            .unwrap_err();
        assert!(matches!(err, CascadeError::JobAlreadyOpen(_)));
        // The live budget and its spend survive
        let stats = allocator.stats(&job).unwrap();
        assert_eq!(stats.total_ceiling, 1_000);
        assert_eq!(stats.consumed, 200);

        allocator.close_job(&job);
        assert!(allocator.open_job(job, BudgetLimits::default()).is_ok());
    }

    #[test]
    fn test_limits_validation() {
        assert!(BudgetLimits::default().validate().is_ok());
        let bad = BudgetLimits {
            warning_threshold: 1.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        assert!(BudgetLimits::with_ceiling(0).validate().is_err());
    }

    #[test]
    fn test_concurrent_reservations_never_overshoot() {
        let budget = budget(10_000);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let budget = Arc::clone(&budget);
                std::thread::spawn(move || {
                    let mut granted = 0u64;
                    for _ in 0..50 {
                        if let Ok(r) = budget.reserve(CallEstimate::tokens(100)) {
                            r.release(100, 0.0);
                            granted += 1;
                        }
                    }
                    granted
                })
            })
            .collect();
        let granted: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 100);
        assert_eq!(budget.consumed(), 10_000);
    }

    proptest! {
        #[test]
        fn prop_consumed_monotonic_and_bounded(
            ceiling in 1u64..5_000,
            steps in prop::collection::vec((0u64..800, 0u64..1_000), 1..40)
        ) {
            let budget = budget(ceiling);
            let mut last = 0;
            for (request, used) in steps {
                if let Ok(r) = budget.reserve(CallEstimate::tokens(request)) {
                    r.release(used, 0.0);
                }
                let consumed = budget.consumed();
                prop_assert!(consumed >= last);
                prop_assert!(consumed <= ceiling);
                last = consumed;
            }
        }
    }
}

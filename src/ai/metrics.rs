//! Attempt Metrics Recording
//!
//! Append-only record of every attempt (strategy, tier, cost, latency,
//! outcome) for observability consumers. A pure sink: nothing in the cascade
//! reads it back to make decisions.
//!
//! ## Usage
//!
//! ```ignore
//! let metrics = MetricsRecorder::shared(job_id.clone());
//! let mut events = metrics.subscribe();
//! metrics.record(MetricsEvent::from_attempt(&job_id, &unit_id, &attempt));
//! let summary = metrics.summary();
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::constants::budget::MICROS_PER_USD;
use crate::types::{Attempt, JobId, ModelTier, Outcome, StrategyUsed, UnitId};

// =============================================================================
// Events
// =============================================================================

/// One event per recorded attempt. Timestamp-tagged; consumers must not rely
/// on arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsEvent {
    pub job_id: JobId,
    pub unit_id: UnitId,
    pub attempt_index: u32,
    pub strategy: StrategyUsed,
    pub tier: Option<ModelTier>,
    pub outcome: Outcome,
    pub tokens: u64,
    pub cost_usd: f64,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_score: Option<f64>,
    /// Calls dispatched by the attempt; critique/revise makes two
    #[serde(default)]
    pub model_calls: u32,
    pub timestamp: DateTime<Utc>,
}

impl MetricsEvent {
    pub fn from_attempt(job_id: &JobId, unit_id: &UnitId, attempt: &Attempt) -> Self {
        Self {
            job_id: job_id.clone(),
            unit_id: unit_id.clone(),
            attempt_index: attempt.attempt_index,
            strategy: attempt.strategy_used,
            tier: attempt.model_tier,
            outcome: attempt.outcome,
            tokens: attempt.tokens_consumed,
            cost_usd: attempt.cost_usd,
            latency_ms: attempt.latency_ms,
            semantic_score: attempt.semantic_score,
            model_calls: u32::from(attempt.is_model_call()),
            timestamp: Utc::now(),
        }
    }

    pub fn with_model_calls(mut self, calls: u32) -> Self {
        self.model_calls = calls;
        self
    }
}

/// Destination for streamed events
pub trait MetricsSink: Send + Sync {
    fn emit(&self, event: &MetricsEvent);
}

/// Forwards events over an unbounded channel
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<MetricsEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<MetricsEvent>) -> Self {
        Self { tx }
    }
}

impl MetricsSink for ChannelSink {
    fn emit(&self, event: &MetricsEvent) {
        if self.tx.send(event.clone()).is_err() {
            tracing::debug!(
                unit = %event.unit_id,
                "Metrics receiver closed; event kept in recorder only"
            );
        }
    }
}

// =============================================================================
// Metrics Recorder
// =============================================================================

/// Thread-safe, append-only recorder for one job.
///
/// Uses atomic operations for counters and RwLock for the event log and
/// sink list. Concurrent units append without coordination.
pub struct MetricsRecorder {
    job_id: JobId,
    start_time: Instant,
    attempts: AtomicU32,
    model_calls: AtomicU32,
    successes: AtomicU32,
    total_tokens: AtomicU64,
    total_latency_ms: AtomicU64,
    /// Stored as microdollars for atomic ops
    total_cost_micros: AtomicU64,
    events: RwLock<Vec<MetricsEvent>>,
    sinks: RwLock<Vec<Arc<dyn MetricsSink>>>,
}

/// Summary statistics for one job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSummary {
    pub job_id: String,
    pub total_duration_ms: u64,
    pub attempts: u32,
    pub model_calls: u32,
    pub successes: u32,
    pub total_tokens: u64,
    pub avg_latency_ms: f64,
    pub total_cost_usd: f64,
    pub by_strategy: BTreeMap<String, u32>,
}

impl MetricsRecorder {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            start_time: Instant::now(),
            attempts: AtomicU32::new(0),
            model_calls: AtomicU32::new(0),
            successes: AtomicU32::new(0),
            total_tokens: AtomicU64::new(0),
            total_latency_ms: AtomicU64::new(0),
            total_cost_micros: AtomicU64::new(0),
            events: RwLock::new(Vec::new()),
            sinks: RwLock::new(Vec::new()),
        }
    }

    pub fn shared(job_id: JobId) -> SharedMetrics {
        Arc::new(Self::new(job_id))
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn add_sink(&self, sink: Arc<dyn MetricsSink>) {
        let mut sinks = self.sinks.write().unwrap_or_else(|poisoned| {
            tracing::error!("Metrics sinks RwLock poisoned, recovering");
            poisoned.into_inner()
        });
        sinks.push(sink);
    }

    /// Stream every subsequent event over a channel
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<MetricsEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.add_sink(Arc::new(ChannelSink::new(tx)));
        rx
    }

    /// Append one event and forward it to every sink
    pub fn record(&self, event: MetricsEvent) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        self.model_calls
            .fetch_add(event.model_calls, Ordering::Relaxed);
        if event.outcome.is_success() {
            self.successes.fetch_add(1, Ordering::Relaxed);
        }
        self.total_tokens.fetch_add(event.tokens, Ordering::Relaxed);
        self.total_latency_ms
            .fetch_add(event.latency_ms, Ordering::Relaxed);
        self.total_cost_micros.fetch_add(
            (event.cost_usd * MICROS_PER_USD) as u64,
            Ordering::Relaxed,
        );

        tracing::debug!(
            unit = %event.unit_id,
            attempt = event.attempt_index,
            strategy = %event.strategy,
            outcome = %event.outcome,
            tokens = event.tokens,
            "Attempt recorded"
        );

        {
            let sinks = self.sinks.read().unwrap_or_else(|poisoned| {
                tracing::error!("Metrics sinks RwLock poisoned on read, recovering");
                poisoned.into_inner()
            });
            for sink in sinks.iter() {
                sink.emit(&event);
            }
        }

        let mut events = self.events.write().unwrap_or_else(|poisoned| {
            tracing::error!("Metrics events RwLock poisoned, recovering");
            poisoned.into_inner()
        });
        events.push(event);
    }

    pub fn events(&self) -> Vec<MetricsEvent> {
        self.events
            .read()
            .unwrap_or_else(|poisoned| {
                tracing::error!("Metrics events RwLock poisoned on read, recovering");
                poisoned.into_inner()
            })
            .clone()
    }

    pub fn event_count(&self) -> usize {
        self.attempts.load(Ordering::Relaxed) as usize
    }

    pub fn summary(&self) -> MetricsSummary {
        let attempts = self.attempts.load(Ordering::Relaxed);
        let total_latency = self.total_latency_ms.load(Ordering::Relaxed);
        let avg_latency_ms = if attempts > 0 {
            total_latency as f64 / attempts as f64
        } else {
            0.0
        };

        let mut by_strategy = BTreeMap::new();
        for event in self.events() {
            *by_strategy.entry(event.strategy.to_string()).or_insert(0) += 1;
        }

        MetricsSummary {
            job_id: self.job_id.to_string(),
            total_duration_ms: self.start_time.elapsed().as_millis() as u64,
            attempts,
            model_calls: self.model_calls.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            total_tokens: self.total_tokens.load(Ordering::Relaxed),
            avg_latency_ms,
            total_cost_usd: self.total_cost_micros.load(Ordering::Relaxed) as f64 / MICROS_PER_USD,
            by_strategy,
        }
    }
}

impl MetricsSummary {
    /// Format summary for display
    pub fn display(&self) -> String {
        format!(
            "Job: {}\n\
             Duration: {:.1}s\n\
             Attempts: {} ({} model calls, {} successful)\n\
             Tokens: {}\n\
             Avg Latency: {:.0}ms\n\
             Cost: ${:.4}",
            self.job_id,
            self.total_duration_ms as f64 / 1000.0,
            self.attempts,
            self.model_calls,
            self.successes,
            self.total_tokens,
            self.avg_latency_ms,
            self.total_cost_usd
        )
    }
}

/// Shared recorder for concurrently processed units
pub type SharedMetrics = Arc<MetricsRecorder>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FailureKind, RepairStrategy};

    fn event(index: u32, tier: Option<ModelTier>, outcome: Outcome) -> MetricsEvent {
        MetricsEvent {
            job_id: JobId::new("job"),
            unit_id: UnitId::new("unit"),
            attempt_index: index,
            strategy: if tier.is_some() {
                StrategyUsed::Repair(RepairStrategy::LlmAssistedRepair)
            } else {
                StrategyUsed::Generation
            },
            tier,
            outcome,
            tokens: 100,
            cost_usd: 0.0125,
            latency_ms: 500,
            semantic_score: None,
            model_calls: u32::from(tier.is_some()),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_record_and_summarize() {
        let metrics = MetricsRecorder::new(JobId::new("job"));
        metrics.record(event(0, None, Outcome::Failure(FailureKind::ParseError)));
        metrics.record(event(1, Some(ModelTier::Tier1), Outcome::Success));

        let summary = metrics.summary();
        assert_eq!(summary.attempts, 2);
        assert_eq!(summary.model_calls, 1);
        assert_eq!(summary.successes, 1);
        assert_eq!(summary.total_tokens, 200);
        assert!((summary.total_cost_usd - 0.025).abs() < 0.0001);
        assert_eq!(summary.by_strategy["Generation"], 1);
        assert_eq!(summary.by_strategy["LLMAssistedRepair"], 1);
    }

    #[test]
    fn test_model_calls_count_calls_not_attempts() {
        let metrics = MetricsRecorder::new(JobId::new("job"));
        let mut critique = event(0, Some(ModelTier::Tier2), Outcome::Success).with_model_calls(2);
        critique.strategy = StrategyUsed::Repair(RepairStrategy::MultiStepCritiqueRevise);
        metrics.record(critique);
        metrics.record(event(1, Some(ModelTier::Tier2), Outcome::Failure(FailureKind::ParseError)));

        let summary = metrics.summary();
        assert_eq!(summary.attempts, 2);
        assert_eq!(summary.model_calls, 3);
    }

    #[tokio::test]
    async fn test_subscribe_streams_every_event() {
        let metrics = MetricsRecorder::new(JobId::new("job"));
        let mut rx = metrics.subscribe();
        for i in 0..3 {
            metrics.record(event(i, None, Outcome::Success));
        }
        for i in 0..3 {
            assert_eq!(rx.recv().await.unwrap().attempt_index, i);
        }
    }

    #[test]
    fn test_closed_receiver_does_not_drop_events() {
        let metrics = MetricsRecorder::new(JobId::new("job"));
        drop(metrics.subscribe());
        metrics.record(event(0, None, Outcome::Success));
        assert_eq!(metrics.events().len(), 1);
    }

    #[test]
    fn test_concurrent_recording() {
        use std::thread;

        let metrics = MetricsRecorder::shared(JobId::new("concurrent"));
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let m = Arc::clone(&metrics);
                thread::spawn(move || {
                    for i in 0..100 {
                        m.record(event(i, Some(ModelTier::Tier1), Outcome::Success));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let summary = metrics.summary();
        assert_eq!(summary.attempts, 1000);
        assert_eq!(metrics.events().len(), 1000);
        assert_eq!(summary.total_tokens, 100_000);
    }

    #[test]
    fn test_summary_display() {
        let metrics = MetricsRecorder::new(JobId::new("display-test"));
        metrics.record(event(0, Some(ModelTier::Tier2), Outcome::Success));
        let display = metrics.summary().display();
        assert!(display.contains("display-test"));
        assert!(display.contains("$"));
    }
}

//! Job Runner
//!
//! Runs every unit of a submission through its own orchestrator run. Units
//! proceed concurrently up to the job's concurrency limit and share one
//! token budget; model calls are further bounded per tier by [`TierLimiter`].
//! Records come back in submission order regardless of completion order.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::orchestrator::{CascadeContext, RegenerationOrchestrator};
use crate::ai::budget::{BudgetAllocator, BudgetLimits};
use crate::ai::client::{SharedClient, TierLimiter};
use crate::ai::metrics::{MetricsRecorder, MetricsSink};
use crate::ai::validation::SemanticScorer;
use crate::config::Config;
use crate::types::{CascadeError, JobId, JobReport, JobStatus, Result, SubmittedUnit, Verdict};

// =============================================================================
// Submission
// =============================================================================

/// A job as handed over by the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSubmission {
    #[serde(default = "JobId::generate")]
    pub job_id: JobId,
    pub units: Vec<SubmittedUnit>,
    /// Falls back to the configured default budget
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<BudgetLimits>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency_limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_timeout_ms: Option<u64>,
}

impl JobSubmission {
    pub fn new(units: Vec<SubmittedUnit>) -> Self {
        Self {
            job_id: JobId::generate(),
            units,
            budget: None,
            concurrency_limit: None,
            call_timeout_ms: None,
        }
    }

    /// Parse a JSON or YAML job file; `.yaml`/`.yml` select YAML
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));
        Self::parse(&text, is_yaml)
    }

    pub fn parse(text: &str, is_yaml: bool) -> Result<Self> {
        let submission: Self = if is_yaml {
            serde_yaml::from_str(text)?
        } else {
            serde_json::from_str(text)?
        };
        Ok(submission)
    }

    pub fn validate(&self) -> Result<()> {
        if self.units.is_empty() {
            return Err(CascadeError::InvalidJob("job has no units".to_string()));
        }
        if self.concurrency_limit == Some(0) {
            return Err(CascadeError::InvalidJob(
                "concurrencyLimit must be greater than 0".to_string(),
            ));
        }
        if self.call_timeout_ms == Some(0) {
            return Err(CascadeError::InvalidJob(
                "callTimeoutMs must be greater than 0".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for submitted in &self.units {
            let unit = &submitted.unit;
            if !seen.insert(&unit.unit_id) {
                return Err(CascadeError::InvalidJob(format!(
                    "duplicate unit id '{}'",
                    unit.unit_id
                )));
            }
            unit.schema.check_definition()?;
        }

        if let Some(budget) = &self.budget {
            budget.validate()?;
        }
        Ok(())
    }
}

// =============================================================================
// Runner
// =============================================================================

pub struct JobRunner {
    client: SharedClient,
    config: Config,
    allocator: Arc<BudgetAllocator>,
    scorer: Option<Arc<dyn SemanticScorer>>,
    sinks: Vec<Arc<dyn MetricsSink>>,
    cancel: Arc<AtomicBool>,
}

impl JobRunner {
    /// Wrap `client` in the configured per-tier limits
    pub fn new(client: SharedClient, config: Config) -> Self {
        let limited: SharedClient = Arc::new(TierLimiter::new(client, config.concurrency.per_tier));
        Self {
            client: limited,
            config,
            allocator: Arc::new(BudgetAllocator::new()),
            scorer: None,
            sinks: Vec::new(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn SemanticScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    /// Stream every attempt's event to `sink`
    pub fn with_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Setting the flag stops every unit at its next transition
    pub fn cancellation(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn allocator(&self) -> &Arc<BudgetAllocator> {
        &self.allocator
    }

    #[instrument(skip_all, fields(job = %submission.job_id, units = submission.units.len()))]
    pub async fn run(&self, submission: JobSubmission) -> Result<JobReport> {
        submission.validate()?;

        let JobSubmission {
            job_id,
            units,
            budget,
            concurrency_limit,
            call_timeout_ms,
        } = submission;

        let limits = budget.unwrap_or(self.config.budget);
        let budget = self.allocator.open_job(job_id.clone(), limits)?;
        let metrics = MetricsRecorder::shared(job_id.clone());
        for sink in &self.sinks {
            metrics.add_sink(Arc::clone(sink));
        }

        let call_timeout = call_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.llm.call_timeout());
        let mut ctx = CascadeContext::new(
            Arc::clone(&self.client),
            Arc::clone(&budget),
            Arc::clone(&metrics),
            self.config.tiers.clone(),
            self.config.policy.clone(),
        )
        .with_call_timeout(call_timeout)
        .with_cancellation(Arc::clone(&self.cancel));
        if let Some(scorer) = &self.scorer {
            ctx = ctx.with_scorer(Arc::clone(scorer));
        }
        let orchestrator = RegenerationOrchestrator::new(Arc::new(ctx));

        let limit = concurrency_limit.unwrap_or(self.config.concurrency.units);
        info!(limit, ceiling = limits.total_ceiling, "Job started");

        let mut records: Vec<_> = stream::iter(units.into_iter().enumerate())
            .map(|(position, unit)| {
                let orchestrator = orchestrator.clone();
                async move { (position, orchestrator.process(unit).await) }
            })
            .buffer_unordered(limit)
            .collect()
            .await;
        records.sort_by_key(|(position, _)| *position);
        let records: Vec<_> = records.into_iter().map(|(_, record)| record).collect();

        let stats = self
            .allocator
            .close_job(&job_id)
            .unwrap_or_else(|| budget.stats());
        let cancelled = self.cancel.load(Ordering::Acquire);
        let status = JobStatus::from_records(&records);

        let report = JobReport {
            job_id,
            status,
            records,
            budget: stats,
            metrics: metrics.summary(),
            cancelled,
        };

        if status == JobStatus::Failed {
            warn!(failed = report.count(Verdict::Failed), "Critical unit failed");
        }
        info!(
            %status,
            accepted = report.count(Verdict::Accepted),
            degraded = report.count(Verdict::AcceptedDegraded),
            failed = report.count(Verdict::Failed),
            "{}",
            report.budget.summary()
        );
        Ok(report)
    }
}

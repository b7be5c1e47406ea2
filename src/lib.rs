//! regencascade - Repair, Regeneration and Quality-Gate Cascade
//!
//! Turns unreliable structured output from a language model into either a
//! schema-valid, quality-checked object or an explicit, recorded failure.
//!
//! ## Core Features
//!
//! - **Error Classification**: every raw output mapped to one failure kind
//! - **Repair Cascade**: deterministic fixes first, model-calling strategies
//!   in ascending cost order after
//! - **Tier Routing**: cheapest adequate model, escalation on repeated failure
//! - **Quality Gate**: criticality-aware semantic thresholds
//! - **Shared Budget**: per-job token ceiling with reservations
//! - **Sealed Records**: one write-once record per unit, persisted to SQLite
//!
//! ## Quick Start
//!
//! ```ignore
//! use regencascade::{Config, JobRunner, JobSubmission, OpenAiClient};
//!
//! let config = Config::default();
//! let client = Arc::new(OpenAiClient::new(&config.llm, config.tiers.clone())?);
//! let runner = JobRunner::new(client, config);
//! let report = runner.run(JobSubmission::from_path("job.yaml".as_ref())?).await?;
//! println!("{}", report.assemble());
//! ```
//!
//! ## Modules
//!
//! - [`ai`]: model client seam, budget, metrics, validation toolkit
//! - [`cascade`]: repair cascade, router, quality gate, orchestrator, jobs
//! - [`storage`]: SQLite record store with connection pooling
//! - [`config`]: layered configuration
//! - [`types`]: domain types and errors

pub mod ai;
pub mod cascade;
pub mod cli;
pub mod config;
pub mod constants;
pub mod storage;
pub mod types;

// =============================================================================
// Core Re-exports
// =============================================================================

// Configuration
pub use config::{CascadePolicy, Config, ConfigLoader};

// Error Types
pub use types::error::{CascadeError, ErrorCategory, Result, ResultExt};

// Domain Types
pub use types::{
    Attempt, Criticality, FailureKind, GenerationUnit, JobId, JobReport, JobStatus, ModelTier,
    RegenerationRecord, RepairStrategy, SubmittedUnit, UnitId, Verdict,
};

// Storage
pub use storage::{Database, PoolConfig, SharedDatabase};

// =============================================================================
// Cascade Re-exports
// =============================================================================

pub use cascade::{
    CascadeContext, JobRunner, JobSubmission, ModelRouter, QualityGate, RegenerationOrchestrator,
    RepairCascade,
};

// =============================================================================
// AI Re-exports
// =============================================================================

pub use ai::{
    // Budget
    BudgetAllocator,
    BudgetLimits,
    // Validation
    ErrorClassifier,
    HeuristicScorer,
    // Metrics
    MetricsRecorder,
    MetricsSink,
    // Client
    ModelClient,
    OpenAiClient,
    SemanticScorer,
    TargetSchema,
    TierTable,
};

//! Repair, regeneration, and quality-gate cascade.
//!
//! - [`strategy`]: deterministic repair chain and model-strategy ordering
//! - [`prompts`]: prompt construction for every model-calling step
//! - [`router`]: tier selection
//! - [`repair`]: the repair cascade for one raw output
//! - [`quality`]: semantic quality gate
//! - [`orchestrator`]: per-unit state machine
//! - [`job`]: concurrent job execution

pub mod job;
pub mod orchestrator;
pub mod prompts;
pub mod quality;
pub mod repair;
pub mod router;
pub mod strategy;

pub use job::{JobRunner, JobSubmission};
pub use orchestrator::{
    AttemptDraft, CallError, CallOutcome, Candidate, CascadeContext, RegenerationOrchestrator,
    UnitRun,
};
pub use quality::{GateVerdict, QualityGate, QualityScore};
pub use repair::RepairCascade;
pub use router::{ModelRouter, RouteRequest};
pub use strategy::{ChainOutcome, StrategyPlan};

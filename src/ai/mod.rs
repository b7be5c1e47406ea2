//! Model Integration Layer
//!
//! Everything the cascade needs around a model call: the client seam, the
//! shared token budget, per-attempt metrics, timeouts, token estimation,
//! and the deterministic validation/repair toolkit.

pub mod budget;
pub mod client;
pub mod metrics;
pub mod timeout;
pub mod tokenizer;
pub mod validation;

pub use budget::{
    BudgetAllocator, BudgetError, BudgetLimits, BudgetStats, CallEstimate, Reservation,
    SharedBudget, TokenBudget,
};
pub use client::{
    ModelClient, ModelPrompt, ModelReply, OpenAiClient, PromptKind, SharedClient, TierLimiter,
    TierProfile, TierTable,
};
pub use metrics::{
    ChannelSink, MetricsEvent, MetricsRecorder, MetricsSink, MetricsSummary, SharedMetrics,
};
pub use timeout::{TimeoutConfig, with_call_timeout, with_timeout};
pub use tokenizer::{TokenCounter, TokenEstimator, excerpt};
pub use validation::{
    Diagnosis, ErrorClassifier, HeuristicScorer, JsonRepairer, SemanticAssessment,
    SemanticScorer, TargetSchema,
};

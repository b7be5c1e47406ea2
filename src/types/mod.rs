pub mod attempt;
pub mod error;
pub mod record;
pub mod unit;

pub use attempt::{
    Attempt, FailureClass, FailureKind, ModelTier, Outcome, RepairStrategy, StrategyUsed,
};
pub use error::{CascadeError, ErrorCategory, ModelCallError, Result, ResultExt};
pub use record::{
    AttemptLog, JobReport, JobStatus, RegenerationRecord, Seal, Verdict, assemble_records,
};
pub use unit::{Criticality, GenerationUnit, JobId, SubmittedUnit, UnitId, Usage};

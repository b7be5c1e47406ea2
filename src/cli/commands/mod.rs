pub mod classify;
pub mod config;
pub mod records;
pub mod repair;
pub mod run;

pub use records::RecordsOptions;
pub use repair::RepairOptions;
pub use run::RunOptions;

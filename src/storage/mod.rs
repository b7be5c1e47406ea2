//! SQLite persistence for sealed regeneration records.

pub mod database;
pub mod records;

pub use database::{Database, PoolConfig, SharedDatabase};
pub use records::{StoredJob, object_digest};

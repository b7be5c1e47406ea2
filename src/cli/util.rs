//! CLI Common Utilities
//!
//! Shared initialization and context management for CLI commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::ai::validation::TargetSchema;
use crate::config::{Config, ConfigLoader};
use crate::storage::{Database, PoolConfig, SharedDatabase};
use crate::types::{CascadeError, Result};

/// Command execution context
///
/// Resolved configuration plus the record store location. The store is
/// opened lazily so commands that never touch it work without one.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub config: Config,
    pub db_path: PathBuf,
}

impl CommandContext {
    /// Load configuration from `config_file` when given, else through the
    /// full global/project/env chain. `db_override` replaces the configured
    /// store path.
    pub fn load(config_file: Option<&Path>, db_override: Option<PathBuf>) -> Result<Self> {
        let config = match config_file {
            Some(path) => {
                if !path.exists() {
                    return Err(CascadeError::Config(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                ConfigLoader::load_from_file(path)?
            }
            None => ConfigLoader::load()?,
        };
        let db_path = db_override.unwrap_or_else(|| config.storage.db_path.clone());
        Ok(Self { config, db_path })
    }

    /// Open (creating if needed) and initialize the record store
    pub fn open_db(&self) -> Result<SharedDatabase> {
        let db = Database::open_with_config(
            &self.db_path,
            PoolConfig::with_max_size(self.config.storage.pool_size),
        )?;
        db.initialize()?;
        Ok(Arc::new(db))
    }

    /// Open an existing record store; a missing file is an error rather
    /// than an empty store
    pub fn require_db(&self) -> Result<SharedDatabase> {
        if !self.db_path.exists() {
            return Err(CascadeError::Config(format!(
                "No record store at {}. Run a job first or pass --db.",
                self.db_path.display()
            )));
        }
        self.open_db()
    }
}

/// True when the path names a YAML document
pub fn is_yaml_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
}

/// Read a JSON or YAML document, chosen by extension
pub fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        CascadeError::Config(format!("Failed to read {}: {}", path.display(), e))
    })?;
    if is_yaml_path(path) {
        Ok(serde_yaml::from_str(&text)?)
    } else {
        Ok(serde_json::from_str(&text)?)
    }
}

/// Load a target schema and reject malformed definitions
pub fn load_schema(path: &Path) -> Result<TargetSchema> {
    let schema: TargetSchema = read_document(path)?;
    schema.check_definition()?;
    Ok(schema)
}

/// Read raw model output verbatim
pub fn read_raw_output(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        CascadeError::Config(format!("Failed to read {}: {}", path.display(), e))
    })
}

/// Write `text` to `path`, creating parent directories
pub fn write_output(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, text)?;
    Ok(())
}

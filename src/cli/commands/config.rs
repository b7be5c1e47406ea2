//! Config Command
//!
//! Manage regencascade configuration.
//!
//! Usage:
//!   regencascade config show [-f json]
//!   regencascade config path
//!   regencascade config init [-g] [--force]

use console::style;

use crate::cli::ui::Output;
use crate::config::{Config, ConfigLoader};
use crate::types::{CascadeError, Result};

/// Show the effective configuration (defaults, files, and environment merged)
pub fn show(config: &Config, format: &str) -> Result<()> {
    println!("{}", ConfigLoader::render(config, format == "json")?);
    Ok(())
}

/// Show configuration file locations and whether each exists
pub fn path() -> Result<()> {
    let out = Output::new();
    out.header("Configuration Paths");
    match ConfigLoader::global_config_path() {
        Some(global) => out.field("Global", describe(&global)),
        None => out.field("Global", "(no config directory on this platform)"),
    }
    out.field("Project", describe(&ConfigLoader::project_config_path()));
    Ok(())
}

fn describe(path: &std::path::Path) -> String {
    if path.exists() {
        path.display().to_string()
    } else {
        format!("{} {}", path.display(), style("(not found)").dim())
    }
}

/// Write a default config file at the global or project location
pub fn init(global: bool, force: bool) -> Result<()> {
    let out = Output::new();
    let path = if global {
        ConfigLoader::global_config_path().ok_or_else(|| {
            CascadeError::Config("Cannot determine global config directory".to_string())
        })?
    } else {
        ConfigLoader::project_config_path()
    };

    if ConfigLoader::init(&path, force)? {
        out.success(&format!("Created {}", path.display()));
    } else {
        out.warning(&format!(
            "{} already exists; pass --force to overwrite",
            path.display()
        ));
    }
    Ok(())
}

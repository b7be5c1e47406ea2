//! Configuration Loader (Figment-based)
//!
//! Loads and merges configuration from multiple sources using Figment:
//! 1. Built-in defaults (Serialized)
//! 2. Global config (`<config dir>/regencascade/config.toml`)
//! 3. Project config (`.regencascade/config.toml`)
//! 4. Environment variables (`REGENCASCADE_*` prefix, `__` separates sections)

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use tracing::{debug, info};

use super::types::Config;
use crate::types::{CascadeError, Result};

const ENV_PREFIX: &str = "REGENCASCADE_";

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with full resolution chain:
    /// defaults → global → project → env vars
    pub fn load() -> Result<Config> {
        Self::load_with(Self::global_config_path(), Self::project_config_path())
    }

    /// Load with explicit file locations; missing files are skipped
    pub fn load_with(global: Option<PathBuf>, project: PathBuf) -> Result<Config> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(global_path) = global
            && global_path.exists()
        {
            debug!("Loading global config from: {}", global_path.display());
            figment = figment.merge(Toml::file(&global_path));
        }

        if project.exists() {
            debug!("Loading project config from: {}", project.display());
            figment = figment.merge(Toml::file(&project));
        }

        // e.g. REGENCASCADE_POLICY__RETRY_CEILING -> policy.retry_ceiling
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__").lowercase(true));

        let config: Config = figment
            .extract()
            .map_err(|e| CascadeError::Config(format!("Configuration error: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file only (defaults underneath)
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| CascadeError::Config(format!("Configuration error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    // =========================================================================
    // Path Management
    // =========================================================================

    pub fn global_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "regencascade").map(|dirs| dirs.config_dir().to_path_buf())
    }

    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_dir().map(|dir| dir.join("config.toml"))
    }

    pub fn project_dir() -> PathBuf {
        PathBuf::from(".regencascade")
    }

    pub fn project_config_path() -> PathBuf {
        Self::project_dir().join("config.toml")
    }

    // =========================================================================
    // Config Commands
    // =========================================================================

    /// Render the effective configuration as TOML or JSON
    pub fn render(config: &Config, as_json: bool) -> Result<String> {
        if as_json {
            Ok(serde_json::to_string_pretty(config)?)
        } else {
            toml::to_string_pretty(config).map_err(|e| CascadeError::Config(e.to_string()))
        }
    }

    /// Write a commented default config. Existing files are kept unless
    /// `force` is set.
    pub fn init(path: &Path, force: bool) -> Result<bool> {
        if path.exists() && !force {
            info!("Config exists: {}", path.display());
            return Ok(false);
        }
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, Self::default_config()?)?;
        info!("Created config: {}", path.display());
        Ok(true)
    }

    fn default_config() -> Result<String> {
        let body = toml::to_string_pretty(&Config::default())
            .map_err(|e| CascadeError::Config(e.to_string()))?;
        Ok(format!(
            "# regencascade configuration\n\
             # Project settings in .regencascade/config.toml override the global file.\n\
             # The API key is read from OPENAI_API_KEY unless llm.api_key is set.\n\n{body}"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_when_no_files() {
        let dir = TempDir::new().unwrap();
        let config = ConfigLoader::load_with(None, dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.policy.retry_ceiling, 10);
    }

    #[test]
    fn test_project_overrides_global() {
        let dir = TempDir::new().unwrap();
        let global = dir.path().join("global.toml");
        let project = dir.path().join("project.toml");
        fs::write(
            &global,
            "[policy]\nretry_ceiling = 4\nstandard_threshold = 0.5\n",
        )
        .unwrap();
        fs::write(&project, "[policy]\nretry_ceiling = 6\n").unwrap();

        let config = ConfigLoader::load_with(Some(global), project).unwrap();
        assert_eq!(config.policy.retry_ceiling, 6);
        assert_eq!(config.policy.standard_threshold, 0.5);
    }

    #[test]
    fn test_invalid_file_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[policy]\ncritical_threshold = 1.5\n").unwrap();
        assert!(ConfigLoader::load_from_file(&path).is_err());
    }

    #[test]
    fn test_init_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        assert!(ConfigLoader::init(&path, false).unwrap());
        assert!(!ConfigLoader::init(&path, false).unwrap());

        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(config.tiers, Config::default().tiers);
    }

    #[test]
    fn test_render_json() {
        let rendered = ConfigLoader::render(&Config::default(), true).unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["policy"]["retry_ceiling"], 10);
    }
}

use crate::config::Config;
use crate::errors::CrucibleError;
use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};

pub fn get_config_path() -> anyhow::Result<PathBuf> {
    let home = dirs::home_dir().context("could not determine home directory")?;
    Ok(home.join(".crucible").join("config.toml"))
}

/// Load the configuration, falling back to defaults when no file exists.
///
/// Unknown keys and malformed values are configuration errors: the process
/// refuses to start rather than silently ignoring an option (spotting a
/// typo at startup beats debugging a default at runtime).
pub fn load_config(config_path: Option<&Path>) -> Result<Config, CrucibleError> {
    let default_path = get_config_path().unwrap_or_else(|_| PathBuf::from("config.toml"));
    let path = config_path.unwrap_or(default_path.as_path());

    let config = if path.exists() {
        let content = fs::read_to_string(path).map_err(|e| {
            CrucibleError::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        toml::from_str::<Config>(&content).map_err(|e| {
            CrucibleError::Configuration(format!("failed to parse {}: {e}", path.display()))
        })?
    } else {
        Config::default()
    };

    config.validate().map_err(CrucibleError::Configuration)?;
    Ok(config)
}

//! Configuration loading from file system
//!
//! Reads a JSON config file. A missing, unreadable, malformed or invalid file
//! never stops the driver: it logs why and falls back to defaults.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

use super::defaults::{CONFIG_ENV_VAR, DEFAULT_CONFIG_PATH};
use super::types::Config;

/// Resolve the config path: explicit argument, then `$CHAT_ESCALATION_CONFIG`,
/// then `~/.chat-escalation/config.json`.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref());
    }
    if let Ok(from_env) = std::env::var(CONFIG_ENV_VAR) {
        if !from_env.trim().is_empty() {
            return PathBuf::from(shellexpand::tilde(&from_env).as_ref());
        }
    }
    PathBuf::from(shellexpand::tilde(DEFAULT_CONFIG_PATH).as_ref())
}

/// Load configuration from `path`
///
/// Returns Config::default() if any step fails.
#[instrument(name = "load_config", skip_all, fields(path = %path.display()))]
pub fn load_config(path: &Path) -> Config {
    if !path.exists() {
        info!("Config file not found, using defaults");
        return Config::default();
    }

    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, "Failed to read config file, using defaults");
            return Config::default();
        }
    };

    parse_config(&raw)
}

/// Parse config JSON, falling back to defaults on syntax or validation errors.
pub fn parse_config(raw: &str) -> Config {
    let config = match serde_json::from_str::<Config>(raw) {
        Ok(config) => config,
        Err(e) => {
            let hint = if e.is_syntax() || e.is_eof() {
                "The config file must be a single JSON object"
            } else {
                "Check field names (camelCase) and value types"
            };
            warn!(
                error = %e,
                line = e.line(),
                column = e.column(),
                hint,
                "Failed to parse config JSON, using defaults"
            );
            return Config::default();
        }
    };

    if let Err(reason) = config.validate() {
        warn!(reason = %reason, "Config failed validation, using defaults");
        return Config::default();
    }

    info!("Successfully loaded config");
    config
}

// src/config/loader.rs

use std::fs;
use std::path::Path;

use crate::config::model::{RawSettings, Settings};
use crate::errors::{FleetError, Result};

/// Overrides `connection_timeout_ms` (integer milliseconds).
pub const CONNECTION_TIMEOUT_ENV: &str = "SHELLFLEET_CONNECTION_TIMEOUT";

/// Overrides `execution_timeout_ms` (integer milliseconds).
pub const EXECUTION_TIMEOUT_ENV: &str = "SHELLFLEET_EXECUTION_TIMEOUT";

/// Load a settings file and return the raw, unvalidated [`RawSettings`].
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawSettings> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let raw: RawSettings = toml::from_str(&contents)?;

    Ok(raw)
}

/// Load a settings file, apply environment overrides and validate.
///
/// This is the entry point the binary uses.
pub fn load_settings(path: impl AsRef<Path>) -> Result<Settings> {
    let raw = load_from_path(&path)?;
    let raw = apply_overrides(raw, |key| std::env::var(key).ok())?;
    Settings::try_from(raw)
}

/// Apply environment-style overrides using `lookup` to resolve variables.
///
/// Split out from [`load_settings`] so tests can inject values without
/// touching the process environment.
pub fn apply_overrides<F>(mut raw: RawSettings, lookup: F) -> Result<RawSettings>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(CONNECTION_TIMEOUT_ENV) {
        raw.connection_timeout_ms = Some(parse_millis(CONNECTION_TIMEOUT_ENV, &value)?);
    }
    if let Some(value) = lookup(EXECUTION_TIMEOUT_ENV) {
        raw.execution_timeout_ms = Some(parse_millis(EXECUTION_TIMEOUT_ENV, &value)?);
    }
    Ok(raw)
}

fn parse_millis(key: &str, value: &str) -> Result<u64> {
    value.trim().parse::<u64>().map_err(|e| {
        FleetError::ConfigError(format!("{key} must be an integer number of milliseconds: {e}"))
    })
}

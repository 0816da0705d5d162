// src/config/validate.rs

use std::time::Duration;

use crate::config::model::{RawSettings, Settings};
use crate::errors::{FleetError, Result};

impl TryFrom<RawSettings> for Settings {
    type Error = FleetError;

    fn try_from(raw: RawSettings) -> std::result::Result<Self, Self::Error> {
        let connection_timeout = required_millis(raw.connection_timeout_ms, "connection_timeout_ms")?;
        let execution_timeout = required_millis(raw.execution_timeout_ms, "execution_timeout_ms")?;

        Ok(Settings {
            connection_timeout,
            execution_timeout,
            identity: raw.identity,
            known_hosts: raw.known_hosts,
            sessions_dir: raw.sessions_dir,
        })
    }
}

fn required_millis(value: Option<u64>, key: &str) -> Result<Duration> {
    match value {
        None => Err(FleetError::ConfigError(format!("`{key}` is required"))),
        Some(0) => Err(FleetError::ConfigError(format!(
            "`{key}` must be >= 1 (got 0)"
        ))),
        Some(ms) => Ok(Duration::from_millis(ms)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_timeouts_are_required() {
        let raw = RawSettings {
            connection_timeout_ms: Some(1000),
            ..Default::default()
        };
        match Settings::try_from(raw) {
            Err(FleetError::ConfigError(msg)) => assert!(msg.contains("execution_timeout_ms")),
            other => panic!("expected ConfigError, got {other:?}"),
        }
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let raw = RawSettings {
            connection_timeout_ms: Some(0),
            execution_timeout_ms: Some(1000),
            ..Default::default()
        };
        assert!(matches!(
            Settings::try_from(raw),
            Err(FleetError::ConfigError(_))
        ));
    }

    #[test]
    fn valid_settings_convert() {
        let raw = RawSettings {
            connection_timeout_ms: Some(5000),
            execution_timeout_ms: Some(60000),
            sessions_dir: Some("sessions".into()),
            ..Default::default()
        };
        let settings = Settings::try_from(raw).unwrap();
        assert_eq!(settings.connection_timeout, Duration::from_secs(5));
        assert_eq!(settings.execution_timeout, Duration::from_secs(60));
        assert_eq!(settings.sessions_dir.as_deref(), Some(std::path::Path::new("sessions")));
    }
}

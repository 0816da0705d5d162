// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Settings as read from a TOML file, before validation.
///
/// ```toml
/// connection_timeout_ms = 10000
/// execution_timeout_ms = 60000
/// identity = "~/.ssh/id_ed25519"
/// known_hosts = "~/.ssh/known_hosts"
/// sessions_dir = "sessions"
/// ```
///
/// Both timeouts are required; they are `Option`s here only so a missing
/// value can be reported as a configuration error instead of a TOML error,
/// and so environment overrides can fill them in.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSettings {
    #[serde(default)]
    pub connection_timeout_ms: Option<u64>,

    #[serde(default)]
    pub execution_timeout_ms: Option<u64>,

    /// Private key used for hosts with `Credential::DefaultIdentity`.
    #[serde(default)]
    pub identity: Option<PathBuf>,

    /// known_hosts file used to verify server keys.
    ///
    /// If `None`, the user's default known_hosts file is used.
    #[serde(default)]
    pub known_hosts: Option<PathBuf>,

    /// Directory receiving one transcript file per connection.
    #[serde(default)]
    pub sessions_dir: Option<PathBuf>,
}

/// Validated settings. Construct with [`Settings::new`] or via
/// [`crate::config::load_settings`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub connection_timeout: Duration,
    pub execution_timeout: Duration,
    pub identity: Option<PathBuf>,
    pub known_hosts: Option<PathBuf>,
    pub sessions_dir: Option<PathBuf>,
}

impl Settings {
    pub fn new(connection_timeout_ms: u64, execution_timeout_ms: u64) -> Self {
        Self {
            connection_timeout: Duration::from_millis(connection_timeout_ms),
            execution_timeout: Duration::from_millis(execution_timeout_ms),
            identity: None,
            known_hosts: None,
            sessions_dir: None,
        }
    }

    pub fn with_identity(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity = Some(path.into());
        self
    }

    pub fn with_known_hosts(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts = Some(path.into());
        self
    }

    pub fn with_sessions_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.sessions_dir = Some(path.into());
        self
    }
}

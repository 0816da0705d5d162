// src/types.rs

//! Plain value types shared across the crate.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default SSH port used when a host string omits one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// How a session authenticates against a host.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Credential {
    /// Use the identity file configured in [`crate::config::Settings`].
    DefaultIdentity,
    /// Use a specific private key file.
    KeyFile(PathBuf),
    /// Password authentication.
    Password(String),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::DefaultIdentity => f.write_str("DefaultIdentity"),
            Credential::KeyFile(path) => f.debug_tuple("KeyFile").field(path).finish(),
            Credential::Password(_) => f.write_str("Password(<redacted>)"),
        }
    }
}

impl Default for Credential {
    fn default() -> Self {
        Credential::DefaultIdentity
    }
}

/// Target machine identity.
///
/// Hosts compare by value; the session pool keys sessions by `Host`, so two
/// equal hosts always share one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Host {
    pub hostname: String,
    pub ssh_port: u16,
    pub username: String,
    pub credential: Credential,
}

impl Host {
    pub fn new(hostname: impl Into<String>, ssh_port: u16, username: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ssh_port,
            username: username.into(),
            credential: Credential::default(),
        }
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = credential;
        self
    }

    pub fn with_password(self, password: impl Into<String>) -> Self {
        self.with_credential(Credential::Password(password.into()))
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.hostname, self.ssh_port)
    }
}

/// Parses `user@hostname[:port]`.
impl FromStr for Host {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (username, rest) = s
            .split_once('@')
            .ok_or_else(|| format!("invalid host '{s}' (expected user@hostname[:port])"))?;

        if username.is_empty() {
            return Err(format!("invalid host '{s}': empty username"));
        }

        let (hostname, port) = match rest.rsplit_once(':') {
            Some((name, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|e| format!("invalid port in host '{s}': {e}"))?;
                (name, port)
            }
            None => (rest, DEFAULT_SSH_PORT),
        };

        if hostname.is_empty() {
            return Err(format!("invalid host '{s}': empty hostname"));
        }

        Ok(Host::new(hostname, port, username))
    }
}

/// Per-command wait bound while the session waits for a completion pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeoutPolicy {
    /// Use the session's default execution timeout.
    #[default]
    Default,
    /// Wait indefinitely.
    Infinite,
    /// Wait at most this long.
    Explicit(Duration),
}

impl TimeoutPolicy {
    /// Interpret the classic millisecond encoding: `0` is the session
    /// default, negative values wait forever, anything else is a bound.
    pub fn from_millis(ms: i64) -> Self {
        match ms {
            0 => TimeoutPolicy::Default,
            ms if ms < 0 => TimeoutPolicy::Infinite,
            ms => TimeoutPolicy::Explicit(Duration::from_millis(ms as u64)),
        }
    }

    /// Resolve against a session default. `None` means no bound.
    pub fn resolve(self, session_default: Duration) -> Option<Duration> {
        match self {
            TimeoutPolicy::Default => Some(session_default),
            TimeoutPolicy::Infinite => None,
            TimeoutPolicy::Explicit(d) => Some(d),
        }
    }
}

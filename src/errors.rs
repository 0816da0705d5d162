// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    /// Transport could not be established or broke mid-session. Fatal for
    /// the session: its task queue stops accepting work.
    #[error("Error establishing SSH connection with {host}: {message}")]
    Connection { host: String, message: String },

    /// The remote login shell is not one of the supported POSIX shells.
    #[error("Shell not supported in {host}: {shell}")]
    ShellUnsupported { host: String, shell: String },

    /// A configured error text was found in the command's output.
    #[error("{host}: {message}")]
    CommandFailed { host: String, message: String },

    #[error("The command '{command}...' returned a non-zero error code ({code}) in {host}")]
    NonZeroExit {
        host: String,
        command: String,
        code: i32,
    },

    #[error("Operation timeout waiting for {pattern} in host {host}")]
    OperationTimeout { pattern: String, host: String },

    #[error("Deployment error: {0}")]
    Deployment(String),

    #[error("{0} cannot depend on itself")]
    SelfDependency(String),

    #[error("Cycle detected in dependency graph: {0}")]
    DependencyCycle(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Task queue for {host} is closed")]
    QueueClosed { host: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FleetError {
    /// Whether this error leaves the session unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FleetError::Connection { .. } | FleetError::ShellUnsupported { .. }
        )
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, FleetError>;

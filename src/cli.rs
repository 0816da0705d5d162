// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::types::Host;

/// Command-line arguments for `shellfleet`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "shellfleet",
    version,
    about = "Run a command on a remote host through an interactive shell session.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the settings file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Shellfleet.toml")]
    pub settings: PathBuf,

    /// Target host as `user@hostname[:port]`.
    #[arg(long, value_name = "HOST", value_parser = parse_host)]
    pub host: Host,

    /// Read the SSH password from this environment variable.
    #[arg(long, value_name = "VAR", conflicts_with = "identity")]
    pub password_env: Option<String>,

    /// Private key to authenticate with instead of the configured identity.
    #[arg(long, value_name = "PATH")]
    pub identity: Option<PathBuf>,

    /// Command timeout in milliseconds (0 = settings default, -1 = none).
    #[arg(long, value_name = "MS", default_value_t = 0, allow_negative_numbers = true)]
    pub timeout: i64,

    /// Output text that marks the command as failed. May be repeated.
    #[arg(long = "error-text", value_name = "TEXT")]
    pub error_texts: Vec<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `SHELLFLEET_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Validate settings and print what would run, without connecting.
    #[arg(long)]
    pub dry_run: bool,

    /// The command and its arguments.
    #[arg(last = true, required = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

fn parse_host(s: &str) -> Result<Host, String> {
    s.parse()
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

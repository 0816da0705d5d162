// src/exec/strategy.rs

//! How a descriptor's command is driven through a live session.

use std::fmt;

use regex::Regex;
use tracing::{debug, warn};

use crate::descriptor::CommandDescriptor;
use crate::errors::{FleetError, Result};
use crate::progress::ProgressEvent;
use crate::shell::expect::ExpectError;
use crate::shell::prompt::{EXIT_CODE_PROBE, EXIT_CODE_RE};
use crate::shell::session::{PROMPT_DESCRIPTION, RemoteSession};
use crate::shell::transport::BoxFuture;

/// Commands are shortened to this many characters in exit-code errors.
const COMMAND_PREVIEW_LEN: usize = 16;

/// Protocol used to run one descriptor against a ready session.
///
/// `quiet` suppresses the per-command success/error progress events.
pub trait ExecutionStrategy: Send + Sync + fmt::Debug {
    fn execute<'a>(
        &'a self,
        session: &'a mut RemoteSession,
        descriptor: &'a CommandDescriptor,
        quiet: bool,
    ) -> BoxFuture<'a, Result<String>>;
}

/// Send, wait for completion, flush, slice the log, check error texts,
/// then probe the exit code.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultStrategy;

impl ExecutionStrategy for DefaultStrategy {
    fn execute<'a>(
        &'a self,
        session: &'a mut RemoteSession,
        descriptor: &'a CommandDescriptor,
        quiet: bool,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(run_default(session, descriptor, quiet))
    }
}

async fn run_default(
    session: &mut RemoteSession,
    descriptor: &CommandDescriptor,
    quiet: bool,
) -> Result<String> {
    let host = session.host().to_string();
    let timeout = session.effective_timeout(descriptor.timeout());
    let (pattern, pattern_name): (Regex, String) = match descriptor.release_pattern() {
        Some(re) => (re.clone(), format!("\"{}\"", re.as_str())),
        None => (session.prompt().clone(), PROMPT_DESCRIPTION.to_string()),
    };

    let from = session.log().len();
    session.send_line(descriptor.command()).await?;

    let response = match session.expect(&pattern, timeout).await {
        Ok(found) => found,
        Err(ExpectError::Timeout { buffer }) => {
            if descriptor.matches_error_text(&buffer) {
                return Err(command_failed(session, descriptor, quiet));
            }
            warn!(host = %host, command = %descriptor.command(), pattern = %pattern_name, "command timed out");
            return Err(FleetError::OperationTimeout {
                pattern: pattern_name,
                host,
            });
        }
        Err(e) => return Err(session.expect_failure(e, &pattern_name)),
    };
    let to = response.line;

    // Output still travelling through the terminal is flushed by one more
    // prompt round trip before the log is sliced.
    session.send_line("").await?;
    session.wait_for_prompt(timeout).await?;

    let output = response.capture(session.log(), from);

    if descriptor.matches_error_text(&response.before) {
        return Err(command_failed(session, descriptor, quiet));
    }

    let code = exit_code(session, timeout).await?;
    if code != 0 {
        if !quiet {
            session.reporter().emit(ProgressEvent::CommandFailed {
                host: session.host().clone(),
                message: descriptor.error_message().to_string(),
            });
        }
        return Err(FleetError::NonZeroExit {
            host,
            command: preview(descriptor.command()),
            code,
        });
    }

    debug!(host = %host, command = %descriptor.command(), lines = to.saturating_sub(from), "command succeeded");
    if !quiet {
        session.reporter().emit(ProgressEvent::CommandSucceeded {
            host: session.host().clone(),
            message: descriptor.success_message().to_string(),
        });
    }
    Ok(output)
}

fn command_failed(
    session: &RemoteSession,
    descriptor: &CommandDescriptor,
    quiet: bool,
) -> FleetError {
    if !quiet {
        session.reporter().emit(ProgressEvent::CommandFailed {
            host: session.host().clone(),
            message: descriptor.error_message().to_string(),
        });
    }
    FleetError::CommandFailed {
        host: session.host().to_string(),
        message: descriptor.error_message().to_string(),
    }
}

/// Exit status of the last command, read through the probe.
async fn exit_code(
    session: &mut RemoteSession,
    timeout: Option<std::time::Duration>,
) -> Result<i32> {
    session.send_line(EXIT_CODE_PROBE).await?;
    let probe = match session.expect(&EXIT_CODE_RE, timeout).await {
        Ok(found) => found,
        Err(e) => return Err(session.expect_failure(e, "the exit code")),
    };
    session.wait_for_prompt(timeout).await?;

    probe
        .groups
        .first()
        .cloned()
        .flatten()
        .and_then(|digits| digits.parse::<i32>().ok())
        .ok_or_else(|| FleetError::Connection {
            host: session.host().to_string(),
            message: format!("unreadable exit code {:?}", probe.matched),
        })
}

fn preview(command: &str) -> String {
    command.chars().take(COMMAND_PREVIEW_LEN).collect()
}

// src/shell/session.rs

//! One persistent interactive shell per host.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::descriptor::CommandDescriptor;
use crate::errors::{FleetError, Result};
use crate::progress::{ProgressEvent, Reporter};
use crate::shell::executions::{ExecutionDescriptor, ExecutionFilter};
use crate::shell::expect::{Expect, ExpectError, ExpectMatch, Transcript};
use crate::shell::log::OutputLog;
use crate::shell::prompt::{
    DISABLE_ECHO, GENERIC_PROMPT_RE, PROMPT_RE, SHELL_NAME_RE, SHELL_QUERY, ShellKind,
};
use crate::shell::transport::{Connector, ShellTransport};
use crate::types::{Host, TimeoutPolicy};

/// Human-readable name of the default completion pattern.
pub const PROMPT_DESCRIPTION: &str = "the distinguished prompt";

/// Lifecycle of a [`RemoteSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    RawShell,
    PromptNegotiated,
    Ready,
    Closed,
}

/// A negotiated interactive shell on one host.
///
/// All access goes through the host's task queue, which owns the session;
/// the running-executions list therefore needs no locking.
pub struct RemoteSession {
    host: Host,
    state: SessionState,
    expect: Expect,
    shell: Option<ShellKind>,
    default_timeout: Duration,
    executions: Vec<ExecutionDescriptor>,
    reporter: Reporter,
}

impl fmt::Debug for RemoteSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSession")
            .field("host", &self.host)
            .field("state", &self.state)
            .field("shell", &self.shell)
            .field("executions", &self.executions)
            .finish_non_exhaustive()
    }
}

impl RemoteSession {
    /// Connect, authenticate and negotiate the distinguished prompt.
    pub async fn open(
        host: Host,
        settings: &Settings,
        reporter: Reporter,
        connector: &dyn Connector,
    ) -> Result<Self> {
        debug!(host = %host, state = ?SessionState::Connecting, "opening session");
        let transport = connector.connect(&host, settings).await?;
        Self::establish(host, transport, settings, reporter).await
    }

    /// Negotiate a session over an already connected transport.
    pub async fn establish(
        host: Host,
        transport: Box<dyn ShellTransport>,
        settings: &Settings,
        reporter: Reporter,
    ) -> Result<Self> {
        let mut expect = Expect::new(transport);
        if let Some(dir) = settings.sessions_dir.as_deref() {
            match Transcript::create(dir, &host) {
                Ok(transcript) => {
                    debug!(host = %host, path = %transcript.path().display(), "writing session transcript");
                    expect = expect.with_transcript(transcript);
                }
                Err(e) => warn!(host = %host, error = %e, "cannot create session transcript"),
            }
        }

        let mut session = Self {
            host,
            state: SessionState::RawShell,
            expect,
            shell: None,
            default_timeout: settings.execution_timeout,
            executions: Vec::new(),
            reporter,
        };

        if let Err(e) = session.negotiate().await {
            if let Err(close_err) = session.expect.close().await {
                debug!(host = %session.host, error = %close_err, "closing failed session");
            }
            session.state = SessionState::Disconnected;
            return Err(e);
        }

        info!(host = %session.host, shell = ?session.shell, "session ready");
        Ok(session)
    }

    async fn negotiate(&mut self) -> Result<()> {
        let timeout = Some(self.default_timeout);

        self.negotiation_step(&GENERIC_PROMPT_RE, timeout, "a shell prompt")
            .await?;
        self.send_line(DISABLE_ECHO).await?;
        self.negotiation_step(&GENERIC_PROMPT_RE, timeout, "a shell prompt")
            .await?;

        self.send_line(SHELL_QUERY).await?;
        let reply = match self.expect.expect(&SHELL_NAME_RE, timeout).await {
            Ok(reply) => reply,
            Err(ExpectError::Timeout { buffer }) => {
                return Err(FleetError::ShellUnsupported {
                    host: self.host.to_string(),
                    shell: unknown_shell(&buffer),
                });
            }
            Err(e) => return Err(self.negotiation_failure(e, "the shell name")),
        };
        let name = reply
            .groups
            .first()
            .cloned()
            .flatten()
            .unwrap_or_default();
        let kind = ShellKind::from_name(&name).ok_or_else(|| FleetError::ShellUnsupported {
            host: self.host.to_string(),
            shell: name.clone(),
        })?;
        debug!(host = %self.host, shell = %name, "detected remote shell");
        self.negotiation_step(&GENERIC_PROMPT_RE, timeout, "a shell prompt")
            .await?;

        self.send_line(&kind.prompt_command()).await?;
        self.negotiation_step(&PROMPT_RE, timeout, PROMPT_DESCRIPTION)
            .await?;

        self.shell = Some(kind);
        self.state = SessionState::PromptNegotiated;
        debug!(host = %self.host, "prompt negotiated");
        self.state = SessionState::Ready;
        Ok(())
    }

    async fn negotiation_step(
        &mut self,
        pattern: &Regex,
        timeout: Option<Duration>,
        what: &str,
    ) -> Result<ExpectMatch> {
        match self.expect.expect(pattern, timeout).await {
            Ok(found) => Ok(found),
            Err(e) => Err(self.negotiation_failure(e, what)),
        }
    }

    fn negotiation_failure(&self, err: ExpectError, what: &str) -> FleetError {
        let message = match err {
            ExpectError::Timeout { .. } => format!("timed out waiting for {what}"),
            ExpectError::Closed { .. } => format!("connection closed while waiting for {what}"),
            ExpectError::Io(e) => e.to_string(),
        };
        FleetError::Connection {
            host: self.host.to_string(),
            message,
        }
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn shell(&self) -> Option<ShellKind> {
        self.shell
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Ready && self.expect.is_connected()
    }

    pub fn log(&self) -> &OutputLog {
        self.expect.log()
    }

    /// Completion pattern used when a descriptor sets none.
    pub fn prompt(&self) -> &Regex {
        &PROMPT_RE
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// `None` means wait indefinitely.
    pub fn effective_timeout(&self, policy: TimeoutPolicy) -> Option<Duration> {
        policy.resolve(self.default_timeout)
    }

    /// Tracked long-lived executions, in start order.
    pub fn executions(&self) -> &[ExecutionDescriptor] {
        &self.executions
    }

    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        self.expect
            .send_line(line)
            .await
            .map_err(|e| FleetError::Connection {
                host: self.host.to_string(),
                message: e.to_string(),
            })
    }

    pub async fn expect(
        &mut self,
        pattern: &Regex,
        timeout: Option<Duration>,
    ) -> std::result::Result<ExpectMatch, ExpectError> {
        self.expect.expect(pattern, timeout).await
    }

    /// Wait for the distinguished prompt, classifying failures.
    pub async fn wait_for_prompt(&mut self, timeout: Option<Duration>) -> Result<ExpectMatch> {
        match self.expect.expect(&PROMPT_RE, timeout).await {
            Ok(found) => Ok(found),
            Err(e) => Err(self.expect_failure(e, PROMPT_DESCRIPTION)),
        }
    }

    /// Map an expect failure on an established session to a crate error.
    pub fn expect_failure(&self, err: ExpectError, pattern: &str) -> FleetError {
        match err {
            ExpectError::Timeout { .. } => FleetError::OperationTimeout {
                pattern: pattern.to_string(),
                host: self.host.to_string(),
            },
            ExpectError::Closed { .. } => FleetError::Connection {
                host: self.host.to_string(),
                message: format!("connection closed while waiting for {pattern}"),
            },
            ExpectError::Io(e) => FleetError::Connection {
                host: self.host.to_string(),
                message: e.to_string(),
            },
        }
    }

    pub async fn execute(&mut self, descriptor: &CommandDescriptor) -> Result<String> {
        self.run(descriptor, false).await
    }

    /// Like [`execute`](Self::execute) but without success/error progress events.
    pub async fn execute_quietly(&mut self, descriptor: &CommandDescriptor) -> Result<String> {
        self.run(descriptor, true).await
    }

    async fn run(&mut self, descriptor: &CommandDescriptor, quiet: bool) -> Result<String> {
        if self.state != SessionState::Ready {
            return Err(FleetError::Connection {
                host: self.host.to_string(),
                message: format!("session is not ready ({:?})", self.state),
            });
        }

        debug!(host = %self.host, command = %descriptor.command(), "executing command");
        let strategy = Arc::clone(descriptor.strategy());
        let result = strategy.execute(self, descriptor, quiet).await;

        match result {
            Ok(output) => {
                if descriptor.is_execution() {
                    let execution = ExecutionDescriptor::from_descriptor(descriptor);
                    debug!(host = %self.host, component = %execution.composite_name, "tracking execution");
                    self.executions.push(execution);
                }
                Ok(output)
            }
            Err(e) => {
                if e.is_fatal() {
                    self.state = SessionState::Disconnected;
                }
                Err(e)
            }
        }
    }

    /// Stop every tracked execution, most recently started first.
    pub async fn stop_all_executions(&mut self) -> Result<()> {
        self.stop_executions(&ExecutionFilter::all()).await.map(|_| ())
    }

    /// Stop tracked executions matching `filter`, most recently started first.
    ///
    /// An entry is removed only after its stop succeeded; the first failure
    /// aborts the walk. Returns the names of the stopped components.
    pub async fn stop_executions(&mut self, filter: &ExecutionFilter) -> Result<Vec<String>> {
        let mut stopped = Vec::new();
        let mut index = self.executions.len();

        let outcome = loop {
            if index == 0 {
                break Ok(());
            }
            index -= 1;
            if !filter.matches(&self.executions[index]) {
                continue;
            }

            let execution = self.executions[index].clone();
            match self.stop_one(&execution).await {
                Ok(()) => {
                    self.executions.remove(index);
                    stopped.push(execution.composite_name);
                }
                Err(e) => break Err(e),
            }
        };

        if !stopped.is_empty() {
            self.reporter.emit(ProgressEvent::ComponentsStopped {
                host: self.host.clone(),
                components: stopped.clone(),
            });
        }

        outcome.map(|()| stopped)
    }

    async fn stop_one(&mut self, execution: &ExecutionDescriptor) -> Result<()> {
        info!(host = %self.host, component = %execution.composite_name, "stopping component");
        self.send_line(&execution.kill_command()).await?;
        self.wait_for_prompt(Some(self.default_timeout)).await?;
        Ok(())
    }

    /// Release the transcript and the transport.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.state = SessionState::Closed;
        info!(host = %self.host, "closing session");
        self.expect.close().await.map_err(FleetError::from)
    }
}

fn unknown_shell(buffer: &str) -> String {
    let trimmed = buffer.trim();
    if trimmed.is_empty() {
        "unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

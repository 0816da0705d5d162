use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};

use shellfleet::config::Settings;
use shellfleet::errors::{FleetError, Result};
use shellfleet::shell::prompt::{DISABLE_ECHO, EXIT_CODE_PROBE, PROMPT_MARKER, SHELL_QUERY};
use shellfleet::shell::transport::BoxFuture;
use shellfleet::shell::{Connector, ShellTransport};
use shellfleet::types::Host;

/// Prompt printed before the distinguished prompt is negotiated.
pub const LOGIN_PROMPT: &str = "deploy@fake:~$ ";

/// What the fake shell prints for one command.
#[derive(Debug, Clone)]
pub struct Reply {
    output: String,
    exit_code: i32,
    prompt: bool,
}

impl Reply {
    pub fn output(text: impl Into<String>) -> Self {
        Self {
            output: text.into(),
            exit_code: 0,
            prompt: true,
        }
    }

    pub fn exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    /// Never return to the prompt (a hung foreground command).
    pub fn without_prompt(mut self) -> Self {
        self.prompt = false;
        self
    }
}

/// Scripted behavior of a [`FakeShell`].
#[derive(Debug, Clone)]
pub struct ShellScript {
    shell_name: String,
    replies: HashMap<String, Reply>,
    close_on: HashSet<String>,
    silent: bool,
}

impl ShellScript {
    pub fn bash() -> Self {
        Self::named("-bash")
    }

    pub fn zsh() -> Self {
        Self::named("zsh")
    }

    /// A shell reporting `name` from `ps`.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            shell_name: name.into(),
            replies: HashMap::new(),
            close_on: HashSet::new(),
            silent: false,
        }
    }

    /// A shell that never prints anything, not even a login prompt.
    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::bash()
        }
    }

    pub fn reply(mut self, command: impl Into<String>, reply: Reply) -> Self {
        self.replies.insert(command.into(), reply);
        self
    }

    /// Drop the connection when `command` is received.
    pub fn close_on(mut self, command: impl Into<String>) -> Self {
        self.close_on.insert(command.into());
        self
    }
}

/// Inspection handle shared with a [`FakeShell`].
#[derive(Debug, Clone, Default)]
pub struct ShellHandle {
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<bool>>,
}

impl ShellHandle {
    /// Every line received, in order.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Received lines that are not part of prompt negotiation, the flush
    /// round trip or the exit-code probe.
    pub fn commands(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|line| !is_protocol_line(line))
            .collect()
    }

    pub fn was_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

fn is_protocol_line(line: &str) -> bool {
    line.is_empty()
        || line == DISABLE_ECHO
        || line == SHELL_QUERY
        || line == EXIT_CODE_PROBE
        || is_prompt_command(line)
}

fn is_prompt_command(line: &str) -> bool {
    line.contains(PROMPT_MARKER)
}

/// An in-memory interactive shell.
///
/// Echoes input until `stty -echo`, answers the shell query, switches to
/// the distinguished prompt once asked to, and replays scripted command
/// output followed by a prompt. Unscripted commands print nothing and exit
/// with 0. When there is nothing to read, `recv` waits forever.
#[derive(Debug)]
pub struct FakeShell {
    script: ShellScript,
    handle: ShellHandle,
    outbox: VecDeque<Vec<u8>>,
    echo: bool,
    negotiated: bool,
    last_exit: i32,
    connected: bool,
}

impl FakeShell {
    pub fn new(script: ShellScript) -> Self {
        let mut shell = Self {
            script,
            handle: ShellHandle::default(),
            outbox: VecDeque::new(),
            echo: true,
            negotiated: false,
            last_exit: 0,
            connected: true,
        };
        if !shell.script.silent {
            shell.prompt();
        }
        shell
    }

    pub fn handle(&self) -> ShellHandle {
        self.handle.clone()
    }

    fn print(&mut self, text: &str) {
        if !self.script.silent && !text.is_empty() {
            self.outbox.push_back(text.as_bytes().to_vec());
        }
    }

    fn prompt(&mut self) {
        if self.negotiated {
            self.print(&format!("{PROMPT_MARKER}\n"));
        } else {
            self.print(LOGIN_PROMPT);
        }
    }

    fn handle_line(&mut self, line: &str) {
        self.handle.sent.lock().unwrap().push(line.to_string());

        if self.echo {
            self.print(&format!("{line}\n"));
        }

        if self.script.close_on.contains(line) {
            self.connected = false;
            return;
        }

        if line == DISABLE_ECHO {
            self.echo = false;
        } else if line == SHELL_QUERY {
            let name = self.script.shell_name.clone();
            self.print(&format!("__shell={name}\n"));
        } else if is_prompt_command(line) {
            self.negotiated = true;
        } else if line == EXIT_CODE_PROBE {
            let code = self.last_exit;
            self.print(&format!("--{code}--\n"));
        } else if !line.is_empty() && !line.starts_with("pkill ") {
            match self.script.replies.get(line).cloned() {
                Some(reply) => {
                    self.print(&reply.output);
                    self.last_exit = reply.exit_code;
                    if !reply.prompt {
                        return;
                    }
                }
                None => self.last_exit = 0,
            }
        }

        self.prompt();
    }
}

impl ShellTransport for FakeShell {
    fn send<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            if !self.connected {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "fake shell closed"));
            }
            let text = String::from_utf8_lossy(data).into_owned();
            for line in text.split_terminator('\n') {
                self.handle_line(line);
            }
            Ok(())
        })
    }

    fn recv(&mut self) -> BoxFuture<'_, io::Result<Option<Vec<u8>>>> {
        Box::pin(async move {
            if let Some(chunk) = self.outbox.pop_front() {
                return Ok(Some(chunk));
            }
            if !self.connected {
                return Ok(None);
            }
            std::future::pending().await
        })
    }

    fn close(&mut self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            self.connected = false;
            *self.handle.closed.lock().unwrap() = true;
            Ok(())
        })
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Connector handing out [`FakeShell`]s.
///
/// Hosts use their own script if one was registered, otherwise the default
/// one. Handles of every opened shell are kept for inspection.
#[derive(Debug)]
pub struct FakeConnector {
    default_script: ShellScript,
    scripts: HashMap<Host, ShellScript>,
    unreachable: HashSet<Host>,
    opened: Mutex<Vec<(Host, ShellHandle)>>,
}

impl FakeConnector {
    pub fn new(default_script: ShellScript) -> Self {
        Self {
            default_script,
            scripts: HashMap::new(),
            unreachable: HashSet::new(),
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn with_script(mut self, host: Host, script: ShellScript) -> Self {
        self.scripts.insert(host, script);
        self
    }

    /// Connecting to `host` fails with a connection error.
    pub fn unreachable(mut self, host: Host) -> Self {
        self.unreachable.insert(host);
        self
    }

    /// Handle of the most recent shell opened for `host`.
    pub fn handle(&self, host: &Host) -> Option<ShellHandle> {
        self.opened
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(h, _)| h == host)
            .map(|(_, handle)| handle.clone())
    }

    pub fn connection_count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }
}

impl Connector for FakeConnector {
    fn connect<'a>(
        &'a self,
        host: &'a Host,
        _settings: &'a Settings,
    ) -> BoxFuture<'a, Result<Box<dyn ShellTransport>>> {
        Box::pin(async move {
            if self.unreachable.contains(host) {
                return Err(FleetError::Connection {
                    host: host.to_string(),
                    message: "connection refused".to_string(),
                });
            }
            let script = self
                .scripts
                .get(host)
                .cloned()
                .unwrap_or_else(|| self.default_script.clone());
            let shell = FakeShell::new(script);
            self.opened
                .lock()
                .unwrap()
                .push((host.clone(), shell.handle()));
            Ok(Box::new(shell) as Box<dyn ShellTransport>)
        })
    }
}

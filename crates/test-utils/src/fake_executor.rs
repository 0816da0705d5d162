use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use shellfleet::dag::ScheduledCommand;
use shellfleet::engine::{CommandOutcome, RuntimeEvent};
use shellfleet::errors::{FleetError, Result};
use shellfleet::exec::ExecutorBackend;
use shellfleet::shell::transport::BoxFuture;
use shellfleet::shell::{ExecutionDescriptor, ExecutionFilter};
use shellfleet::types::Host;

/// Scripted result for one command text.
#[derive(Debug, Clone)]
pub enum FakeOutcome {
    Succeed(String),
    Fail(String),
}

/// A fake executor that:
/// - records every dispatched (command, host) pair in dispatch order
/// - answers from a per-command script (unscripted commands succeed with
///   empty output), honoring execution guards like the real queue does
/// - remembers successful executions per host so stop ordering can be
///   asserted.
#[derive(Debug, Default)]
pub struct FakeBackend {
    outcomes: HashMap<String, FakeOutcome>,
    delays: HashMap<String, Duration>,
    unreachable: Vec<Host>,
    prepared: Mutex<Vec<Host>>,
    dispatched: Mutex<Vec<(String, Host)>>,
    executions: Arc<Mutex<Vec<(Host, ExecutionDescriptor)>>>,
    stopped: Mutex<Vec<(Host, String)>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outcome(mut self, command: impl Into<String>, outcome: FakeOutcome) -> Self {
        self.outcomes.insert(command.into(), outcome);
        self
    }

    pub fn failing(self, command: impl Into<String>) -> Self {
        let command = command.into();
        let message = format!("{command} failed");
        self.outcome(command, FakeOutcome::Fail(message))
    }

    /// Delay the completion of `command` on every host.
    pub fn delay(mut self, command: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(command.into(), delay);
        self
    }

    /// `prepare` fails for this host.
    pub fn unreachable(mut self, host: Host) -> Self {
        self.unreachable.push(host);
        self
    }

    pub fn prepared(&self) -> Vec<Host> {
        self.prepared.lock().unwrap().clone()
    }

    pub fn dispatched(&self) -> Vec<(String, Host)> {
        self.dispatched.lock().unwrap().clone()
    }

    /// Dispatched command texts, in order, ignoring hosts.
    pub fn dispatched_commands(&self) -> Vec<String> {
        self.dispatched().into_iter().map(|(c, _)| c).collect()
    }

    pub fn stopped(&self) -> Vec<(Host, String)> {
        self.stopped.lock().unwrap().clone()
    }

    pub fn running(&self) -> Vec<(Host, String)> {
        self.executions
            .lock()
            .unwrap()
            .iter()
            .map(|(h, e)| (h.clone(), e.composite_name.clone()))
            .collect()
    }
}

impl ExecutorBackend for FakeBackend {
    fn prepare<'a>(&'a self, hosts: &'a [Host]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if let Some(host) = hosts.iter().find(|h| self.unreachable.contains(h)) {
                return Err(FleetError::Connection {
                    host: host.to_string(),
                    message: "connection refused".to_string(),
                });
            }
            self.prepared.lock().unwrap().extend(hosts.iter().cloned());
            Ok(())
        })
    }

    fn dispatch<'a>(
        &'a self,
        commands: Vec<ScheduledCommand>,
        events: mpsc::UnboundedSender<RuntimeEvent>,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            for command in commands {
                let id = command.id();
                let host = command.host.clone();
                let descriptor = Arc::clone(&command.descriptor);
                let text = descriptor.command().to_string();

                self.dispatched
                    .lock()
                    .unwrap()
                    .push((text.clone(), host.clone()));

                let result = if !descriptor.should_execute() {
                    Ok(CommandOutcome::Skipped)
                } else {
                    match self.outcomes.get(&text) {
                        Some(FakeOutcome::Fail(message)) => Err(FleetError::CommandFailed {
                            host: host.to_string(),
                            message: message.clone(),
                        }),
                        Some(FakeOutcome::Succeed(output)) => {
                            Ok(CommandOutcome::Executed(output.clone()))
                        }
                        None => Ok(CommandOutcome::Executed(String::new())),
                    }
                };

                let delay = self.delays.get(&text).copied();
                let executions = Arc::clone(&self.executions);
                let events = events.clone();
                tokio::spawn(async move {
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                    }
                    if matches!(result, Ok(CommandOutcome::Executed(_)))
                        && descriptor.is_execution()
                    {
                        executions.lock().unwrap().push((
                            host.clone(),
                            ExecutionDescriptor::from_descriptor(&descriptor),
                        ));
                    }
                    let _ = events.send(RuntimeEvent::CommandCompleted { id, host, result });
                });
            }
        })
    }

    fn stop_executions<'a>(
        &'a self,
        hosts: &'a [Host],
        filter: ExecutionFilter,
    ) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(async move {
            let mut executions = self.executions.lock().unwrap();
            let mut stopped = Vec::new();

            for host in hosts {
                let mut index = executions.len();
                while index > 0 {
                    index -= 1;
                    let (h, execution) = &executions[index];
                    if h != host || !filter.matches(execution) {
                        continue;
                    }
                    let name = execution.composite_name.clone();
                    self.stopped.lock().unwrap().push((host.clone(), name.clone()));
                    stopped.push(name);
                    executions.remove(index);
                }
            }
            Ok(stopped)
        })
    }
}

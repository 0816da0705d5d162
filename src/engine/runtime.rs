// src/engine/runtime.rs

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::dag::{ScheduledCommand, Scheduler, TaskRunState};
use crate::descriptor::DescriptorId;
use crate::errors::{FleetError, Result};
use crate::exec::ExecutorBackend;
use crate::types::Host;

use super::{CommandOutcome, RuntimeEvent, TaskOutcome};

/// Output captured for one descriptor on one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRecord {
    pub id: DescriptorId,
    pub host: Host,
    pub output: String,
}

/// Summary of one graph execution.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Captured outputs, in completion order.
    pub outputs: Vec<CommandRecord>,
    pub succeeded: Vec<DescriptorId>,
    /// Skipped by guards on every host.
    pub skipped: Vec<DescriptorId>,
    pub failed: Vec<DescriptorId>,
    /// Never sent: a dependency failed or the graph was shutting down.
    pub blocked: Vec<DescriptorId>,
}

impl RunReport {
    pub fn output(&self, id: DescriptorId, host: &Host) -> Option<&str> {
        self.outputs
            .iter()
            .find(|r| r.id == id && &r.host == host)
            .map(|r| r.output.as_str())
    }
}

/// Drives one run of a [`Scheduler`], delegating execution to an
/// [`ExecutorBackend`].
///
/// The loop ends once nothing is in flight; the scheduler guarantees that
/// at that point every descriptor is terminal.
pub struct Runtime {
    scheduler: Scheduler,
    backend: Arc<dyn ExecutorBackend>,
    shutting_down: Arc<AtomicBool>,
    event_tx: mpsc::UnboundedSender<RuntimeEvent>,
    event_rx: mpsc::UnboundedReceiver<RuntimeEvent>,
    in_flight: usize,
    outputs: Vec<CommandRecord>,
    first_error: Option<FleetError>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("scheduler", &self.scheduler)
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    pub fn new(
        scheduler: Scheduler,
        backend: Arc<dyn ExecutorBackend>,
        shutting_down: Arc<AtomicBool>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            scheduler,
            backend,
            shutting_down,
            event_tx,
            event_rx,
            in_flight: 0,
            outputs: Vec::new(),
            first_error: None,
        }
    }

    /// Run to completion.
    ///
    /// Waits for every dispatched command, then returns the first failure if
    /// there was one, otherwise the report.
    pub async fn run(mut self) -> Result<RunReport> {
        info!("command graph runtime started");

        let step = self.scheduler.start();
        self.dispatch(step.newly_scheduled).await;

        while self.in_flight > 0 {
            let Some(event) = self.event_rx.recv().await else {
                break;
            };
            self.handle_event(event).await;
        }

        info!("command graph runtime exiting");
        match self.first_error.take() {
            Some(e) => Err(e),
            None => Ok(self.report()),
        }
    }

    async fn handle_event(&mut self, event: RuntimeEvent) {
        debug!(?event, "runtime received event");

        match event {
            RuntimeEvent::CommandCompleted { id, host, result } => {
                self.in_flight = self.in_flight.saturating_sub(1);

                let outcome = match result {
                    Ok(CommandOutcome::Executed(output)) => {
                        self.outputs.push(CommandRecord {
                            id,
                            host: host.clone(),
                            output,
                        });
                        TaskOutcome::Success
                    }
                    Ok(CommandOutcome::Skipped) => TaskOutcome::Skipped,
                    Err(e) => {
                        error!(host = %host, id = %id, error = %e, "command failed");
                        self.first_error.get_or_insert(e);
                        TaskOutcome::Failed
                    }
                };

                let step = self.scheduler.step_completion(id, &host, outcome);
                self.dispatch(step.newly_scheduled).await;
            }
        }
    }

    async fn dispatch(&mut self, commands: Vec<ScheduledCommand>) {
        if commands.is_empty() {
            return;
        }

        if self.shutting_down.load(Ordering::SeqCst) {
            let mut abandoned: Vec<DescriptorId> = Vec::new();
            for c in &commands {
                if !abandoned.contains(&c.id()) {
                    abandoned.push(c.id());
                }
            }
            info!(count = abandoned.len(), "shutting down; not dispatching ready commands");
            for id in abandoned {
                self.scheduler.step_abandon(id);
            }
            return;
        }

        let summary: Vec<String> = commands
            .iter()
            .map(|c| format!("{} on {}", c.descriptor.command(), c.host))
            .collect();
        debug!(?summary, "dispatching ready commands");

        self.in_flight += commands.len();
        self.backend
            .dispatch(commands, self.event_tx.clone())
            .await;
    }

    fn report(&self) -> RunReport {
        let done = self.scheduler.ids_in_state(TaskRunState::DoneSuccess);
        let (skipped, succeeded): (Vec<_>, Vec<_>) =
            done.into_iter().partition(|id| self.scheduler.was_skipped(*id));

        RunReport {
            outputs: self.outputs.clone(),
            succeeded,
            skipped,
            failed: self.scheduler.ids_in_state(TaskRunState::DoneFailed),
            blocked: self.scheduler.ids_in_state(TaskRunState::Blocked),
        }
    }
}

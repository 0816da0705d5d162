// src/dag/scheduler.rs

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::dag::graph::DagGraph;
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::state_manager::{ReadOnlyStateManager, StateManager};
use crate::dag::task_info::{RunState, TaskInfo, TaskRunState};
use crate::descriptor::{CommandDescriptor, DescriptorId};
use crate::engine::TaskOutcome;
use crate::errors::Result;
use crate::types::Host;

/// The validated graph plus per-run state.
///
/// Responsibilities:
/// - decide when a descriptor is ready (all in-graph deps succeeded)
/// - fan a ready descriptor out to its hosts
/// - fold per-host completions into a per-descriptor outcome
/// - block dependents of failed descriptors
#[derive(Debug)]
pub struct Scheduler {
    graph: DagGraph,
    tasks: HashMap<DescriptorId, TaskInfo>,
    started: bool,
}

impl Scheduler {
    pub fn from_descriptors(descriptors: &[Arc<CommandDescriptor>]) -> Result<Self> {
        let graph = DagGraph::build(descriptors)?;

        let mut tasks = HashMap::new();
        for d in descriptors {
            let deps = graph.dependencies_of(d.id()).to_vec();
            tasks.insert(d.id(), TaskInfo::new(Arc::clone(d), deps));
        }

        Ok(Self {
            graph,
            tasks,
            started: false,
        })
    }

    pub fn graph(&self) -> &DagGraph {
        &self.graph
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn run_state_of(&self, id: DescriptorId) -> Option<TaskRunState> {
        let info = self.tasks.get(&id)?;
        Some(info.run_state.into())
    }

    /// `None` if the descriptor is unknown.
    pub fn deps_satisfied(&self, id: DescriptorId) -> Option<bool> {
        let info = self.tasks.get(&id)?;
        Some(ReadOnlyStateManager::new(&self.tasks).deps_satisfied_for_info(info))
    }

    /// Descriptors currently in `state`, in graph order.
    pub fn ids_in_state(&self, state: TaskRunState) -> Vec<DescriptorId> {
        self.graph
            .ids()
            .iter()
            .copied()
            .filter(|id| self.run_state_of(*id) == Some(state))
            .collect()
    }

    /// Whether `id` was skipped by its guards on every host.
    pub fn was_skipped(&self, id: DescriptorId) -> bool {
        self.tasks.get(&id).is_some_and(|info| {
            matches!(info.run_state, Some(RunState::DoneSuccess))
                && info.skipped_hosts == info.descriptor.hosts().len()
        })
    }

    pub fn is_finished(&self) -> bool {
        self.started && self.all_terminal()
    }

    fn all_terminal(&self) -> bool {
        !self.tasks.values().any(|info| {
            matches!(
                info.run_state,
                None | Some(RunState::Pending) | Some(RunState::Running)
            )
        })
    }

    /// Put every descriptor into the run and return the initially ready ones.
    pub fn start(&mut self) -> SchedulerStep {
        self.started = true;
        debug!(descriptors = self.tasks.len(), "scheduler: starting run");

        let mut manager = StateManager::new(&self.graph, &mut self.tasks);
        manager.mark_all_pending();
        let newly_scheduled = manager.collect_new_ready();

        SchedulerStep {
            newly_scheduled,
            newly_failed: Vec::new(),
            run_just_finished: self.all_terminal(),
        }
    }

    /// Fold in the outcome of `id` on `host`.
    pub fn step_completion(
        &mut self,
        id: DescriptorId,
        host: &Host,
        outcome: TaskOutcome,
    ) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        let Some(info) = self.tasks.get_mut(&id) else {
            warn!(id = %id, host = %host, "completion for unknown descriptor; ignoring");
            return step;
        };

        match info.run_state {
            Some(RunState::Running) => {
                info.outstanding_hosts = info.outstanding_hosts.saturating_sub(1);
                match outcome {
                    TaskOutcome::Failed => {
                        warn!(
                            command = %info.descriptor.command(),
                            host = %host,
                            "command failed; blocking dependents"
                        );
                        info.run_state = Some(RunState::DoneFailed);
                        step.newly_failed.push(id);
                        let mut manager = StateManager::new(&self.graph, &mut self.tasks);
                        step.newly_failed.extend(manager.mark_dependents_blocked(id));
                    }
                    TaskOutcome::Success | TaskOutcome::Skipped => {
                        if outcome == TaskOutcome::Skipped {
                            info.skipped_hosts += 1;
                        }
                        if info.outstanding_hosts == 0 {
                            debug!(command = %info.descriptor.command(), "command done on all hosts");
                            info.run_state = Some(RunState::DoneSuccess);
                            let mut manager = StateManager::new(&self.graph, &mut self.tasks);
                            step.newly_scheduled = manager.collect_new_ready();
                        }
                    }
                }
            }
            Some(RunState::DoneFailed) => {
                // Other hosts still report back after the first failure.
                info.outstanding_hosts = info.outstanding_hosts.saturating_sub(1);
                debug!(
                    command = %info.descriptor.command(),
                    host = %host,
                    ?outcome,
                    "late completion for failed command"
                );
            }
            other => {
                warn!(id = %id, host = %host, state = ?other, "unexpected completion; ignoring");
            }
        }

        step.run_just_finished = self.all_terminal();
        if step.run_just_finished {
            info!("scheduler: all commands terminal");
        }
        step
    }

    /// Give back a descriptor that was scheduled but never dispatched, and
    /// block everything depending on it.
    pub fn step_abandon(&mut self, id: DescriptorId) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        if let Some(info) = self.tasks.get_mut(&id) {
            if matches!(info.run_state, Some(RunState::Running | RunState::Pending)) {
                info.run_state = Some(RunState::Blocked);
                info.outstanding_hosts = 0;
                step.newly_failed.push(id);
                let mut manager = StateManager::new(&self.graph, &mut self.tasks);
                step.newly_failed.extend(manager.mark_dependents_blocked(id));
            }
        }

        step.run_just_finished = self.all_terminal();
        step
    }
}

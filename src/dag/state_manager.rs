// src/dag/state_manager.rs

//! Per-run state transitions for descriptors in the scheduler.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::dag::DagGraph;
use crate::dag::task_info::{RunState, ScheduledCommand, TaskInfo};
use crate::descriptor::DescriptorId;

/// Mutating view over the scheduler's task map.
pub struct StateManager<'a> {
    graph: &'a DagGraph,
    tasks: &'a mut HashMap<DescriptorId, TaskInfo>,
}

impl<'a> StateManager<'a> {
    pub fn new(graph: &'a DagGraph, tasks: &'a mut HashMap<DescriptorId, TaskInfo>) -> Self {
        Self { graph, tasks }
    }

    /// Put every descriptor of the graph into the run.
    pub fn mark_all_pending(&mut self) {
        for info in self.tasks.values_mut() {
            info.run_state = Some(RunState::Pending);
            info.outstanding_hosts = 0;
            info.skipped_hosts = 0;
        }
    }

    pub fn deps_satisfied_for_info(&self, info: &TaskInfo) -> bool {
        ReadOnlyStateManager::new(self.tasks).deps_satisfied_for_info(info)
    }

    /// Block every pending dependent (transitively) of a failed descriptor.
    ///
    /// Returns the newly blocked descriptors, not including `failed` itself.
    pub fn mark_dependents_blocked(&mut self, failed: DescriptorId) -> Vec<DescriptorId> {
        let mut stack: Vec<DescriptorId> = self.graph.dependents_of(failed).to_vec();
        let mut newly_blocked = Vec::new();

        while let Some(id) = stack.pop() {
            if let Some(info) = self.tasks.get_mut(&id) {
                if matches!(info.run_state, Some(RunState::Pending)) {
                    info.run_state = Some(RunState::Blocked);
                    debug!(
                        command = %info.descriptor.command(),
                        "blocked by upstream failure"
                    );
                    newly_blocked.push(id);
                    stack.extend(self.graph.dependents_of(id).iter().copied());
                }
            }
        }

        newly_blocked
    }

    /// Move pending descriptors whose dependencies all succeeded to
    /// `Running` and return one command per target host.
    ///
    /// Descriptors are visited in graph insertion order.
    pub fn collect_new_ready(&mut self) -> Vec<ScheduledCommand> {
        let candidates: Vec<DescriptorId> = self
            .graph
            .ids()
            .iter()
            .copied()
            .filter(|id| {
                self.tasks.get(id).is_some_and(|info| {
                    matches!(info.run_state, Some(RunState::Pending))
                        && self.deps_satisfied_for_info(info)
                })
            })
            .collect();

        let mut ready = Vec::new();
        for id in candidates {
            if let Some(info) = self.tasks.get_mut(&id) {
                info!(
                    command = %info.descriptor.command(),
                    hosts = info.descriptor.hosts().len(),
                    "scheduling command"
                );
                info.run_state = Some(RunState::Running);
                info.outstanding_hosts = info.descriptor.hosts().len();
                ready.extend(ScheduledCommand::for_each_host(&info.descriptor));
            } else {
                warn!(id = %id, "node in graph not present in tasks map");
            }
        }

        ready
    }

    pub fn all_tasks_terminal(&self) -> bool {
        !self.tasks.values().any(|info| {
            matches!(
                info.run_state,
                None | Some(RunState::Pending) | Some(RunState::Running)
            )
        })
    }
}

/// Read-only counterpart of [`StateManager`].
pub struct ReadOnlyStateManager<'a> {
    tasks: &'a HashMap<DescriptorId, TaskInfo>,
}

impl<'a> ReadOnlyStateManager<'a> {
    pub fn new(tasks: &'a HashMap<DescriptorId, TaskInfo>) -> Self {
        Self { tasks }
    }

    /// Whether every in-graph dependency finished successfully.
    pub fn deps_satisfied_for_info(&self, info: &TaskInfo) -> bool {
        info.deps.iter().all(|dep| match self.tasks.get(dep) {
            Some(d) => matches!(d.run_state, Some(RunState::DoneSuccess)),
            None => {
                warn!(
                    command = %info.descriptor.command(),
                    dep = %dep,
                    "dependency missing from tasks map"
                );
                false
            }
        })
    }
}

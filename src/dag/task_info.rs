// src/dag/task_info.rs

//! Per-descriptor scheduling state and the unit of work handed to backends.

use std::sync::Arc;

use crate::descriptor::{CommandDescriptor, DescriptorId};
use crate::types::Host;

/// Per-run state of a descriptor (internal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Waiting on dependencies.
    Pending,
    /// Dispatched to its hosts; some have not reported back yet.
    Running,
    /// Succeeded (or was skipped by a guard) on every host.
    DoneSuccess,
    /// Failed on at least one host.
    DoneFailed,
    /// Never sent because a dependency failed or the graph is shutting down.
    Blocked,
}

/// Public, read-only view of a descriptor's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRunState {
    NotStarted,
    Pending,
    Running,
    DoneSuccess,
    DoneFailed,
    Blocked,
}

impl From<Option<RunState>> for TaskRunState {
    fn from(state: Option<RunState>) -> Self {
        match state {
            None => TaskRunState::NotStarted,
            Some(RunState::Pending) => TaskRunState::Pending,
            Some(RunState::Running) => TaskRunState::Running,
            Some(RunState::DoneSuccess) => TaskRunState::DoneSuccess,
            Some(RunState::DoneFailed) => TaskRunState::DoneFailed,
            Some(RunState::Blocked) => TaskRunState::Blocked,
        }
    }
}

/// Static descriptor data plus per-run state.
#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub descriptor: Arc<CommandDescriptor>,
    /// In-graph dependencies.
    pub deps: Vec<DescriptorId>,
    pub run_state: Option<RunState>,
    /// Hosts that have not reported back for the current dispatch.
    pub outstanding_hosts: usize,
    /// Hosts on which the command was skipped by a guard.
    pub skipped_hosts: usize,
}

impl TaskInfo {
    pub fn new(descriptor: Arc<CommandDescriptor>, deps: Vec<DescriptorId>) -> Self {
        Self {
            descriptor,
            deps,
            run_state: None,
            outstanding_hosts: 0,
            skipped_hosts: 0,
        }
    }

    pub fn id(&self) -> DescriptorId {
        self.descriptor.id()
    }
}

/// One descriptor bound to one host, ready to be queued.
#[derive(Debug, Clone)]
pub struct ScheduledCommand {
    pub descriptor: Arc<CommandDescriptor>,
    pub host: Host,
}

impl ScheduledCommand {
    /// One command per target host, in host order.
    pub fn for_each_host(descriptor: &Arc<CommandDescriptor>) -> Vec<Self> {
        descriptor
            .hosts()
            .iter()
            .map(|host| Self {
                descriptor: Arc::clone(descriptor),
                host: host.clone(),
            })
            .collect()
    }

    pub fn id(&self) -> DescriptorId {
        self.descriptor.id()
    }
}

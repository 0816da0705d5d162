// src/engine/mod.rs

//! Orchestration engine.
//!
//! - [`runtime`] is the event loop that drives one run of the scheduler,
//!   dispatching ready commands to an [`ExecutorBackend`] and folding
//!   completions back in.
//! - [`descriptor_graph`] is the per-subsystem entry point: it validates the
//!   graph, executes it and stops what it started.
//!
//! [`ExecutorBackend`]: crate::exec::ExecutorBackend

use crate::descriptor::DescriptorId;
use crate::errors::FleetError;
use crate::types::Host;

/// What happened to a command on one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Sent and succeeded; carries the captured output.
    Executed(String),
    /// Not sent because an execution guard was false.
    Skipped,
}

/// Outcome of a command on one host, as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    Skipped,
    Failed,
}

/// Events flowing into the runtime from executor backends.
#[derive(Debug)]
pub enum RuntimeEvent {
    /// A dispatched command finished on one host.
    CommandCompleted {
        id: DescriptorId,
        host: Host,
        result: Result<CommandOutcome, FleetError>,
    },
}

pub mod descriptor_graph;
pub mod runtime;

pub use descriptor_graph::DescriptorGraph;
pub use runtime::{CommandRecord, RunReport, Runtime};

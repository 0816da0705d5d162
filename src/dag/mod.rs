// src/dag/mod.rs

//! Command graph representation and scheduling.
//!
//! - [`graph`] holds the validated adjacency of a subsystem's descriptors.
//! - [`scheduler`] contains the per-run state machine that decides which
//!   descriptors are ready and folds per-host completions back in.
//! - [`task_info`] provides per-descriptor state and the scheduled command type.
//! - [`scheduler_step`] defines the result type for scheduler steps.
//! - [`state_manager`] manages per-run state transitions.

pub mod graph;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;
pub mod task_info;

pub use graph::DagGraph;
pub use scheduler::Scheduler;
pub use scheduler_step::SchedulerStep;
pub use task_info::{ScheduledCommand, TaskRunState};

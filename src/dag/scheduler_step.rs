// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use crate::dag::task_info::ScheduledCommand;
use crate::descriptor::DescriptorId;

/// Structured result of a single scheduler "step".
///
/// Tests can drive the scheduler by hand and assert on what changed.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Commands (one per target host) that became ready in this step.
    pub newly_scheduled: Vec<ScheduledCommand>,
    /// Descriptors newly marked as failed, the failing one first, followed
    /// by the dependents it blocked.
    pub newly_failed: Vec<DescriptorId>,
    /// Whether every descriptor is now in a terminal state.
    pub run_just_finished: bool,
}

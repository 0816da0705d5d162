// src/exec/mod.rs

//! Command execution layer.
//!
//! - [`queue`] is the single-flight FIFO queue that owns a host's session.
//! - [`strategy`] holds the execution protocol trait and the default
//!   send/capture/classify algorithm; [`compile`] adds the build-step variant.
//! - [`backend`] provides the `ExecutorBackend` trait and the
//!   `RealExecutorBackend` that the runtime uses in production, and which
//!   tests replace with a fake implementation.

pub mod backend;
pub mod compile;
pub mod queue;
pub mod strategy;

pub use backend::{ExecutorBackend, RealExecutorBackend};
pub use compile::CompileStrategy;
pub use queue::{HostQueue, Pending, TaskQueue};
pub use strategy::{DefaultStrategy, ExecutionStrategy};

// src/shell/mod.rs

//! Remote shell layer.
//!
//! - [`transport`] abstracts the byte stream (SSH in production).
//! - [`expect`] matches patterns over the filtered stream and keeps the
//!   line log in [`log`].
//! - [`prompt`] holds the negotiation and shutdown commands.
//! - [`session`] is the per-host state machine; [`executions`] tracks the
//!   long-lived components it started.
//! - [`pool`] keeps one session and task queue per host.

pub mod executions;
pub mod expect;
pub mod log;
pub mod pool;
pub mod prompt;
pub mod session;
pub mod transport;

pub use executions::{ExecutionDescriptor, ExecutionFilter};
pub use log::OutputLog;
pub use pool::SessionPool;
pub use session::{RemoteSession, SessionState};
pub use transport::{Connector, ShellTransport, SshConnector};

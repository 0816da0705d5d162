// src/descriptor/mod.rs

//! Command descriptors: what to run, how to judge the result, where, and
//! after what.
//!
//! - [`command`] holds [`CommandDescriptor`] and its builder.
//! - [`guard`] provides lazily evaluated execution guards.
//! - [`augment`] fuses two descriptors into one `&&`-chained command.

pub mod augment;
pub mod command;
pub mod guard;

pub use augment::augment;
pub use command::{CommandDescriptor, CommandDescriptorBuilder, DescriptorId};
pub use guard::ExecutionGuard;

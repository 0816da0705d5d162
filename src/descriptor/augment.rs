// src/descriptor/augment.rs

//! Fusing two descriptors into one chained remote invocation.

use std::ops::Add;

use crate::descriptor::command::CommandDescriptor;

/// `left.command && right.command`, configured like `left`.
///
/// Error texts, messages, release pattern, timeout, dependencies and hosts
/// come from `left` only; nothing of `right` is merged besides its text.
pub fn augment(left: &CommandDescriptor, right: &CommandDescriptor) -> CommandDescriptor {
    left.augment_with(right)
}

impl Add<&CommandDescriptor> for &CommandDescriptor {
    type Output = CommandDescriptor;

    fn add(self, rhs: &CommandDescriptor) -> CommandDescriptor {
        augment(self, rhs)
    }
}

// src/shell/executions.rs

//! Bookkeeping for long-lived components started through a session.

use std::collections::HashSet;

use crate::descriptor::{CommandDescriptor, DescriptorId};
use crate::shell::prompt::kill_command;

/// One started long-lived command, as remembered by its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionDescriptor {
    pub composite_name: String,
    pub search_criterion: String,
    /// Descriptor that started this execution.
    pub origin: DescriptorId,
}

impl ExecutionDescriptor {
    pub fn from_descriptor(descriptor: &CommandDescriptor) -> Self {
        Self {
            composite_name: descriptor.execution_name().to_string(),
            search_criterion: descriptor.search_criterion().to_string(),
            origin: descriptor.id(),
        }
    }

    pub fn kill_command(&self) -> String {
        kill_command(&self.search_criterion)
    }
}

/// Which tracked executions a stop request applies to.
///
/// Both criteria must hold when set; an empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    origins: Option<HashSet<DescriptorId>>,
    names: Option<HashSet<String>>,
}

impl ExecutionFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Only executions started by one of these descriptors.
    pub fn started_by<I>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = DescriptorId>,
    {
        self.origins = Some(origins.into_iter().collect());
        self
    }

    /// Only executions with one of these composite names.
    pub fn named<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn matches(&self, execution: &ExecutionDescriptor) -> bool {
        let origin_ok = self
            .origins
            .as_ref()
            .is_none_or(|o| o.contains(&execution.origin));
        let name_ok = self
            .names
            .as_ref()
            .is_none_or(|n| n.contains(&execution.composite_name));
        origin_ok && name_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn execution(name: &str) -> (CommandDescriptor, ExecutionDescriptor) {
        let d = CommandDescriptor::builder()
            .command(format!("nohup ./{name} &"))
            .is_execution()
            .execution_name(name)
            .search_criterion(format!("./{name}"))
            .build()
            .unwrap();
        let e = ExecutionDescriptor::from_descriptor(&d);
        (d, e)
    }

    #[test]
    fn records_name_criterion_and_origin() {
        let (d, e) = execution("api");
        assert_eq!(e.composite_name, "api");
        assert_eq!(e.search_criterion, "./api");
        assert_eq!(e.origin, d.id());
        assert_eq!(e.kill_command(), "pkill -f -- './api'");
    }

    #[test]
    fn defaults_fall_back_to_command_text() {
        let d = CommandDescriptor::builder()
            .command("redis-server")
            .is_execution()
            .build()
            .unwrap();
        let e = ExecutionDescriptor::from_descriptor(&d);
        assert_eq!(e.composite_name, "redis-server");
        assert_eq!(e.search_criterion, "redis-server");
    }

    #[test]
    fn filter_combines_origin_and_name() {
        let (d_api, api) = execution("api");
        let (_, db) = execution("db");

        assert!(ExecutionFilter::all().matches(&api));
        assert!(ExecutionFilter::all().matches(&db));

        let by_origin = ExecutionFilter::all().started_by([d_api.id()]);
        assert!(by_origin.matches(&api));
        assert!(!by_origin.matches(&db));

        let by_name = ExecutionFilter::all().named(["db"]);
        assert!(!by_name.matches(&api));
        assert!(by_name.matches(&db));

        let both = ExecutionFilter::all().started_by([d_api.id()]).named(["db"]);
        assert!(!both.matches(&api));
        assert!(!both.matches(&db));
    }
}

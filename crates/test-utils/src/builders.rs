#![allow(dead_code)]

use std::sync::Arc;

use shellfleet::config::Settings;
use shellfleet::descriptor::{CommandDescriptor, CommandDescriptorBuilder};
use shellfleet::types::Host;

/// `deploy@<name>:22` with default-identity credentials.
pub fn host(name: &str) -> Host {
    Host::new(name, 22, "deploy")
}

/// Settings with short timeouts suitable for fake shells.
pub fn fast_settings() -> Settings {
    Settings::new(500, 500)
}

/// Builder for `CommandDescriptor`s targeting a fixed set of hosts.
pub struct DescriptorBuilder {
    inner: CommandDescriptorBuilder,
    hosts: Vec<Host>,
}

impl DescriptorBuilder {
    pub fn new(command: &str) -> Self {
        Self {
            inner: CommandDescriptor::builder().command(command),
            hosts: Vec::new(),
        }
    }

    pub fn on(mut self, host: Host) -> Self {
        self.hosts.push(host);
        self
    }

    /// Customize the underlying builder.
    pub fn with(mut self, f: impl FnOnce(CommandDescriptorBuilder) -> CommandDescriptorBuilder) -> Self {
        self.inner = f(self.inner);
        self
    }

    pub fn build(self) -> CommandDescriptor {
        let mut descriptor = self
            .inner
            .build()
            .expect("Failed to build valid descriptor from builder");
        descriptor.runs_on(self.hosts);
        descriptor
    }

    pub fn shared(self) -> Arc<CommandDescriptor> {
        Arc::new(self.build())
    }
}

/// A descriptor for `command` on `host`.
pub fn command_on(command: &str, host: &Host) -> CommandDescriptor {
    DescriptorBuilder::new(command).on(host.clone()).build()
}

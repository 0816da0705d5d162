// src/descriptor/command.rs

//! Command descriptors and their builder.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use regex::Regex;
use tracing::debug;

use crate::descriptor::guard::ExecutionGuard;
use crate::errors::{FleetError, Result};
use crate::exec::strategy::{DefaultStrategy, ExecutionStrategy};
use crate::types::{Host, TimeoutPolicy};

static NEXT_DESCRIPTOR_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of a [`CommandDescriptor`].
///
/// Identities are handed out from a process-wide monotonic counter; two
/// descriptors with the same command text are still distinct nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DescriptorId(u64);

impl DescriptorId {
    fn next() -> Self {
        DescriptorId(NEXT_DESCRIPTOR_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for DescriptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Description of one remote operation.
///
/// Everything about *how* the command runs is fixed at [`build`] time.
/// Dependencies, target hosts and guards are bookkeeping that is filled in
/// afterwards while the deployment is being assembled.
///
/// [`build`]: CommandDescriptorBuilder::build
pub struct CommandDescriptor {
    id: DescriptorId,
    command: String,
    release_pattern: Option<Regex>,
    timeout: TimeoutPolicy,
    error_texts: Vec<String>,
    error_message: String,
    success_message: Option<String>,
    strategy: Arc<dyn ExecutionStrategy>,
    execution: bool,
    execution_name: Option<String>,
    search_criterion: Option<String>,
    dependencies: Vec<DescriptorId>,
    hosts: Vec<Host>,
    guards: Vec<ExecutionGuard>,
}

impl CommandDescriptor {
    pub fn builder() -> CommandDescriptorBuilder {
        CommandDescriptorBuilder::default()
    }

    pub fn id(&self) -> DescriptorId {
        self.id
    }

    /// Full command text: base command plus space-joined arguments.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Custom completion pattern, or `None` for the session's distinguished prompt.
    pub fn release_pattern(&self) -> Option<&Regex> {
        self.release_pattern.as_ref()
    }

    pub fn timeout(&self) -> TimeoutPolicy {
        self.timeout
    }

    pub fn error_texts(&self) -> &[String] {
        &self.error_texts
    }

    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    pub fn success_message(&self) -> &str {
        self.success_message.as_deref().unwrap_or(&self.command)
    }

    pub fn strategy(&self) -> &Arc<dyn ExecutionStrategy> {
        &self.strategy
    }

    /// Whether this command starts a long-lived component.
    pub fn is_execution(&self) -> bool {
        self.execution
    }

    /// Component name recorded when this command starts a long-lived component.
    pub fn execution_name(&self) -> &str {
        self.execution_name.as_deref().unwrap_or(&self.command)
    }

    /// Process search pattern used to stop the component later.
    pub fn search_criterion(&self) -> &str {
        self.search_criterion.as_deref().unwrap_or(&self.command)
    }

    pub fn dependencies(&self) -> &[DescriptorId] {
        &self.dependencies
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    /// Whether `output` contains any configured error text.
    pub fn matches_error_text(&self, output: &str) -> bool {
        self.error_texts
            .iter()
            .any(|text| !text.is_empty() && output.contains(text.as_str()))
    }

    /// Add dependencies, keeping insertion order and skipping duplicates.
    ///
    /// Returns `Ok(false)` if any of them was already present. Depending on
    /// itself is an error and leaves the list untouched.
    pub fn depends_on<I>(&mut self, dependencies: I) -> Result<bool>
    where
        I: IntoIterator<Item = DescriptorId>,
    {
        let dependencies: Vec<DescriptorId> = dependencies.into_iter().collect();

        if dependencies.contains(&self.id) {
            return Err(FleetError::SelfDependency(format!(
                "command '{}'",
                self.command
            )));
        }

        let mut all_new = true;
        for dep in dependencies {
            if self.dependencies.contains(&dep) {
                debug!(command = %self.command, dependency = %dep, "dependency already present");
                all_new = false;
                continue;
            }
            self.dependencies.push(dep);
        }
        Ok(all_new)
    }

    /// Add target hosts, keeping insertion order and skipping duplicates.
    ///
    /// Returns `false` if any of them was already present.
    pub fn runs_on<I>(&mut self, hosts: I) -> bool
    where
        I: IntoIterator<Item = Host>,
    {
        let mut all_new = true;
        for host in hosts {
            if self.hosts.contains(&host) {
                all_new = false;
                continue;
            }
            self.hosts.push(host);
        }
        all_new
    }

    pub fn add_execution_guard(&mut self, guard: impl Into<ExecutionGuard>) {
        self.guards.push(guard.into());
    }

    /// Evaluate guards in insertion order, stopping at the first `false`.
    pub fn should_execute(&self) -> bool {
        self.guards.iter().all(ExecutionGuard::evaluate)
    }

    /// New descriptor running `self` then `other` in one remote invocation.
    ///
    /// The result keeps this descriptor's error/success configuration,
    /// timeout, execution flag, dependencies and hosts; `other` only
    /// contributes its command text. See [`crate::descriptor::augment`].
    pub fn augment_with(&self, other: &CommandDescriptor) -> CommandDescriptor {
        CommandDescriptor {
            id: DescriptorId::next(),
            command: format!("{} && {}", self.command, other.command),
            release_pattern: self.release_pattern.clone(),
            timeout: self.timeout,
            error_texts: self.error_texts.clone(),
            error_message: self.error_message.clone(),
            success_message: self.success_message.clone(),
            strategy: Arc::new(DefaultStrategy),
            execution: self.execution,
            execution_name: self.execution_name.clone(),
            search_criterion: self.search_criterion.clone(),
            dependencies: self.dependencies.clone(),
            hosts: self.hosts.clone(),
            guards: Vec::new(),
        }
    }
}

impl PartialEq for CommandDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for CommandDescriptor {}

impl Hash for CommandDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("id", &self.id)
            .field("command", &self.command)
            .field("execution", &self.execution)
            .field("dependencies", &self.dependencies)
            .field("hosts", &self.hosts)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command)
    }
}

/// Fluent configuration for a [`CommandDescriptor`].
#[derive(Debug, Default)]
pub struct CommandDescriptorBuilder {
    command: String,
    arguments: Vec<String>,
    release_pattern: Option<String>,
    timeout: TimeoutPolicy,
    error_texts: Vec<String>,
    error_message: Option<String>,
    success_message: Option<String>,
    strategy: Option<Arc<dyn ExecutionStrategy>>,
    execution: bool,
    execution_name: Option<String>,
    search_criterion: Option<String>,
}

impl CommandDescriptorBuilder {
    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    pub fn arguments<I, S>(mut self, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments.extend(arguments.into_iter().map(Into::into));
        self
    }

    /// Regular expression signalling completion instead of the distinguished prompt.
    pub fn release_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.release_pattern = Some(pattern.into());
        self
    }

    /// `0` uses the session default, `-1` waits indefinitely, anything
    /// positive is a bound in milliseconds.
    pub fn timeout(mut self, millis: i64) -> Self {
        self.timeout = TimeoutPolicy::from_millis(millis);
        self
    }

    pub fn without_timeout(mut self) -> Self {
        self.timeout = TimeoutPolicy::Infinite;
        self
    }

    pub fn error_texts<I, S>(mut self, texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.error_texts.extend(texts.into_iter().map(Into::into));
        self
    }

    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn success_message(mut self, message: impl Into<String>) -> Self {
        self.success_message = Some(message.into());
        self
    }

    pub fn execution_strategy(mut self, strategy: Arc<dyn ExecutionStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Mark the command as starting a long-lived component.
    pub fn is_execution(mut self) -> Self {
        self.execution = true;
        self
    }

    pub fn execution_name(mut self, name: impl Into<String>) -> Self {
        self.execution_name = Some(name.into());
        self
    }

    pub fn search_criterion(mut self, criterion: impl Into<String>) -> Self {
        self.search_criterion = Some(criterion.into());
        self
    }

    pub fn build(self) -> Result<CommandDescriptor> {
        let command = if self.arguments.is_empty() {
            self.command
        } else {
            format!("{} {}", self.command, self.arguments.join(" "))
        };

        if command.trim().is_empty() {
            return Err(FleetError::ConfigError(
                "command descriptor requires a non-empty command".to_string(),
            ));
        }

        let release_pattern = match self.release_pattern {
            Some(pattern) => Some(Regex::new(&pattern).map_err(|e| {
                FleetError::ConfigError(format!(
                    "invalid release pattern for command '{command}': {e}"
                ))
            })?),
            None => None,
        };

        let error_message = self
            .error_message
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| command.clone());
        let success_message = self.success_message.filter(|m| !m.is_empty());

        Ok(CommandDescriptor {
            id: DescriptorId::next(),
            command,
            release_pattern,
            timeout: self.timeout,
            error_texts: self.error_texts,
            error_message,
            success_message,
            strategy: self.strategy.unwrap_or_else(|| Arc::new(DefaultStrategy)),
            execution: self.execution,
            execution_name: self.execution_name,
            search_criterion: self.search_criterion,
            dependencies: Vec::new(),
            hosts: Vec::new(),
            guards: Vec::new(),
        })
    }
}

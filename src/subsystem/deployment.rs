// src/subsystem/deployment.rs

//! Deployment capability of a subsystem.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error};

use crate::descriptor::CommandDescriptor;
use crate::engine::{DescriptorGraph, RunReport};
use crate::errors::{FleetError, Result};
use crate::exec::ExecutorBackend;
use crate::shell::transport::BoxFuture;
use crate::subsystem::Subsystem;

/// Shared state every deployment carries: the graph of its last deploy.
#[derive(Debug, Default)]
pub struct DeploymentBase {
    graph: Mutex<Option<Arc<DescriptorGraph>>>,
}

impl DeploymentBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_graph(&self, graph: Arc<DescriptorGraph>) {
        *self.graph.lock().unwrap_or_else(PoisonError::into_inner) = Some(graph);
    }

    pub fn graph(&self) -> Option<Arc<DescriptorGraph>> {
        self.graph
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// How a subsystem is deployed.
///
/// Implementations supply [`deploy`](Deployment::deploy) and expose their
/// [`DeploymentBase`]; shutdown behavior is shared.
pub trait Deployment: Send + Sync {
    fn base(&self) -> &DeploymentBase;

    fn deploy<'a>(
        &'a self,
        subsystem: &'a str,
        dependencies: &'a [Arc<Subsystem>],
    ) -> BoxFuture<'a, Result<()>>;

    fn shutdown(&self, stop_all_executed: bool) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            match self.base().graph() {
                Some(graph) => graph.shutdown(stop_all_executed).await,
                None => Ok(()),
            }
        })
    }

    fn shutdown_and_stop_components<'a>(
        &'a self,
        names: &'a [&'a str],
    ) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(async move {
            match self.base().graph() {
                Some(graph) => graph.shutdown_components(names).await,
                None => Ok(Vec::new()),
            }
        })
    }

    /// True if nothing was deployed yet or the graph is shutting down.
    fn is_shutdown(&self) -> bool {
        self.base()
            .graph()
            .is_none_or(|graph| graph.is_shutting_down())
    }

    /// Shut down (stopping their executions) every dependency that is not
    /// shut down already. All are attempted; the first failure is returned.
    fn release_dependencies<'a>(
        &'a self,
        dependencies: &'a [Arc<Subsystem>],
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut first_error: Option<FleetError> = None;
            for dependency in dependencies {
                if dependency.deployment().is_shutdown() {
                    debug!(subsystem = %dependency.alias(), "dependency already released");
                    continue;
                }
                if let Err(e) = dependency.deployment().shutdown(true).await {
                    error!(subsystem = %dependency.alias(), error = %e, "failed to release dependency");
                    first_error.get_or_insert(e);
                }
            }
            match first_error {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })
    }
}

/// Deploys a fixed set of command descriptors as one graph.
pub struct CommandDeployment {
    base: DeploymentBase,
    descriptors: Vec<Arc<CommandDescriptor>>,
    backend: Arc<dyn ExecutorBackend>,
    last_report: Mutex<Option<RunReport>>,
}

impl std::fmt::Debug for CommandDeployment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDeployment")
            .field("descriptors", &self.descriptors)
            .finish_non_exhaustive()
    }
}

impl CommandDeployment {
    pub fn new<I>(descriptors: I, backend: Arc<dyn ExecutorBackend>) -> Self
    where
        I: IntoIterator<Item = CommandDescriptor>,
    {
        Self::from_shared(descriptors.into_iter().map(Arc::new).collect(), backend)
    }

    pub fn from_shared(
        descriptors: Vec<Arc<CommandDescriptor>>,
        backend: Arc<dyn ExecutorBackend>,
    ) -> Self {
        Self {
            base: DeploymentBase::new(),
            descriptors,
            backend,
            last_report: Mutex::new(None),
        }
    }

    pub fn descriptors(&self) -> &[Arc<CommandDescriptor>] {
        &self.descriptors
    }

    /// Report of the last successful deploy.
    pub fn last_report(&self) -> Option<RunReport> {
        self.last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Deployment for CommandDeployment {
    fn base(&self) -> &DeploymentBase {
        &self.base
    }

    fn deploy<'a>(
        &'a self,
        subsystem: &'a str,
        dependencies: &'a [Arc<Subsystem>],
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            debug!(
                subsystem,
                dependencies = dependencies.len(),
                commands = self.descriptors.len(),
                "deploying commands"
            );

            let graph = Arc::new(DescriptorGraph::new(
                self.descriptors.clone(),
                Arc::clone(&self.backend),
            )?);
            self.base.set_graph(Arc::clone(&graph));

            let report = graph.execute().await?;
            *self
                .last_report
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(report);
            Ok(())
        })
    }
}

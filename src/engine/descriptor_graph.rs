// src/engine/descriptor_graph.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

use crate::dag::{DagGraph, Scheduler};
use crate::descriptor::CommandDescriptor;
use crate::errors::{FleetError, Result};
use crate::exec::ExecutorBackend;
use crate::shell::executions::ExecutionFilter;
use crate::types::Host;

use super::runtime::{RunReport, Runtime};

/// A subsystem's commands, scheduled across their hosts.
///
/// Validated at construction (hosts present, no cycles). Shutdown only
/// touches executions started by this graph's own descriptors.
pub struct DescriptorGraph {
    descriptors: Vec<Arc<CommandDescriptor>>,
    hosts: Vec<Host>,
    backend: Arc<dyn ExecutorBackend>,
    shutting_down: Arc<AtomicBool>,
}

impl std::fmt::Debug for DescriptorGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorGraph")
            .field("descriptors", &self.descriptors)
            .field("hosts", &self.hosts)
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}

impl DescriptorGraph {
    pub fn new(
        descriptors: Vec<Arc<CommandDescriptor>>,
        backend: Arc<dyn ExecutorBackend>,
    ) -> Result<Self> {
        DagGraph::build(&descriptors)?;

        let mut hosts: Vec<Host> = Vec::new();
        for d in &descriptors {
            for host in d.hosts() {
                if !hosts.contains(host) {
                    hosts.push(host.clone());
                }
            }
        }

        Ok(Self {
            descriptors,
            hosts,
            backend,
            shutting_down: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn descriptors(&self) -> &[Arc<CommandDescriptor>] {
        &self.descriptors
    }

    /// Every target host, in first-use order.
    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    /// Run every descriptor, respecting dependencies.
    pub async fn execute(&self) -> Result<RunReport> {
        if self.is_shutting_down() {
            return Err(FleetError::Deployment(
                "cannot execute a graph that is shutting down".to_string(),
            ));
        }

        let scheduler = Scheduler::from_descriptors(&self.descriptors)?;
        self.backend.prepare(&self.hosts).await?;

        Runtime::new(
            scheduler,
            Arc::clone(&self.backend),
            Arc::clone(&self.shutting_down),
        )
        .run()
        .await
    }

    /// Mark the graph as shutting down; optionally stop every execution it
    /// started, most recent first on each host.
    pub async fn shutdown(&self, stop_all_executed: bool) -> Result<()> {
        self.shutting_down.store(true, Ordering::SeqCst);
        info!(hosts = self.hosts.len(), stop_all_executed, "shutting down command graph");

        if stop_all_executed {
            self.backend
                .stop_executions(&self.hosts, self.own_executions())
                .await?;
        }
        Ok(())
    }

    /// Mark the graph as shutting down and stop only the named components.
    pub async fn shutdown_components(&self, names: &[&str]) -> Result<Vec<String>> {
        self.shutting_down.store(true, Ordering::SeqCst);
        info!(?names, "stopping components");

        let filter = self.own_executions().named(names.iter().copied());
        self.backend.stop_executions(&self.hosts, filter).await
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    fn own_executions(&self) -> ExecutionFilter {
        ExecutionFilter::all().started_by(self.descriptors.iter().map(|d| d.id()))
    }
}

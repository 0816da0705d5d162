// src/subsystem/mod.rs

//! Subsystems: named, dependency-aware deployable units.
//!
//! - [`deployment`] holds the `Deployment` capability and the
//!   command-graph implementation.
//! - [`graph`] deploys a set of subsystems in dependency order and tears
//!   them down in reverse.

pub mod deployment;
pub mod graph;

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::errors::{FleetError, Result};
use crate::progress::{ProgressEvent, Reporter};

pub use deployment::{CommandDeployment, Deployment, DeploymentBase};
pub use graph::SubsystemGraph;

static NEXT_SUBSYSTEM_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubsystemId(u64);

impl fmt::Display for SubsystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subsystem#{}", self.0)
    }
}

pub struct Subsystem {
    id: SubsystemId,
    alias: String,
    deployment: Arc<dyn Deployment>,
    dependencies: Mutex<Vec<Arc<Subsystem>>>,
    reporter: Reporter,
}

impl Subsystem {
    pub fn new(alias: impl Into<String>, deployment: Arc<dyn Deployment>) -> Arc<Self> {
        Self::with_reporter(alias, deployment, Reporter::silent())
    }

    pub fn with_reporter(
        alias: impl Into<String>,
        deployment: Arc<dyn Deployment>,
        reporter: Reporter,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: SubsystemId(NEXT_SUBSYSTEM_ID.fetch_add(1, Ordering::Relaxed)),
            alias: alias.into(),
            deployment,
            dependencies: Mutex::new(Vec::new()),
            reporter,
        })
    }

    pub fn id(&self) -> SubsystemId {
        self.id
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn deployment(&self) -> &Arc<dyn Deployment> {
        &self.deployment
    }

    /// Snapshot of the direct dependencies, in insertion order.
    pub fn dependencies(&self) -> Vec<Arc<Subsystem>> {
        self.dependencies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Add dependencies, skipping duplicates.
    ///
    /// Returns `Ok(false)` if any was already present. Depending on itself,
    /// or on a subsystem that already depends on this one, is an error and
    /// leaves the list untouched.
    pub fn depends_on(&self, others: &[Arc<Subsystem>]) -> Result<bool> {
        for other in others {
            if other.id == self.id {
                return Err(FleetError::SelfDependency(format!(
                    "subsystem '{}'",
                    self.alias
                )));
            }
            if other.reaches(self.id) {
                return Err(FleetError::DependencyCycle(format!(
                    "subsystem '{}' already depends on '{}'",
                    other.alias, self.alias
                )));
            }
        }

        let mut deps = self
            .dependencies
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut all_new = true;
        for other in others {
            if deps.iter().any(|d| d.id == other.id) {
                debug!(subsystem = %self.alias, dependency = %other.alias, "dependency already present");
                all_new = false;
                continue;
            }
            deps.push(Arc::clone(other));
        }
        Ok(all_new)
    }

    /// Whether `target` is this subsystem or one of its transitive dependencies.
    fn reaches(&self, target: SubsystemId) -> bool {
        let mut stack: Vec<Arc<Subsystem>> = self.dependencies();
        let mut visited: HashSet<SubsystemId> = HashSet::from([self.id]);
        if self.id == target {
            return true;
        }

        while let Some(next) = stack.pop() {
            if next.id == target {
                return true;
            }
            if visited.insert(next.id) {
                stack.extend(next.dependencies());
            }
        }
        false
    }

    /// Deploy, reporting start, error and completion.
    pub async fn deploy(&self) -> Result<()> {
        self.reporter.emit(ProgressEvent::StageStarted {
            subsystem: self.alias.clone(),
        });

        let dependencies = self.dependencies();
        match self.deployment.deploy(&self.alias, &dependencies).await {
            Ok(()) => {
                self.reporter.emit(ProgressEvent::StageFinished {
                    subsystem: self.alias.clone(),
                });
                Ok(())
            }
            Err(e) => {
                self.reporter.emit(ProgressEvent::StageFailed {
                    subsystem: self.alias.clone(),
                });
                Err(e)
            }
        }
    }

    pub async fn shutdown(&self, stop_all_executed: bool) -> Result<()> {
        self.deployment.shutdown(stop_all_executed).await
    }

    pub fn is_shutdown(&self) -> bool {
        self.deployment.is_shutdown()
    }
}

impl PartialEq for Subsystem {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Subsystem {}

impl Hash for Subsystem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let deps: Vec<String> = self
            .dependencies()
            .iter()
            .map(|d| d.alias.clone())
            .collect();
        f.debug_struct("Subsystem")
            .field("id", &self.id)
            .field("alias", &self.alias)
            .field("dependencies", &deps)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.alias)
    }
}

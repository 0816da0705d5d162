// src/subsystem/graph.rs

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::{error, info, warn};

use crate::errors::{FleetError, Result};
use crate::subsystem::{Subsystem, SubsystemId};

/// A set of subsystems deployed in dependency order.
///
/// Dependencies on subsystems that were never registered are treated as
/// already deployed.
#[derive(Debug, Default)]
pub struct SubsystemGraph {
    subsystems: Vec<Arc<Subsystem>>,
    deployed: Mutex<Vec<Arc<Subsystem>>>,
}

impl SubsystemGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subsystem. Returns false if it was already registered.
    pub fn register(&mut self, subsystem: Arc<Subsystem>) -> bool {
        if self.subsystems.iter().any(|s| s.id() == subsystem.id()) {
            return false;
        }
        self.subsystems.push(subsystem);
        true
    }

    pub fn subsystems(&self) -> &[Arc<Subsystem>] {
        &self.subsystems
    }

    /// Subsystems that deployed successfully, in deployment order.
    pub fn deployed(&self) -> Vec<Arc<Subsystem>> {
        self.deployed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Registered subsystems, dependencies first.
    pub fn deployment_order(&self) -> Result<Vec<Arc<Subsystem>>> {
        let by_id: HashMap<SubsystemId, &Arc<Subsystem>> =
            self.subsystems.iter().map(|s| (s.id(), s)).collect();

        let mut graph: DiGraphMap<SubsystemId, ()> = DiGraphMap::new();
        for s in &self.subsystems {
            graph.add_node(s.id());
        }
        for s in &self.subsystems {
            for dep in s.dependencies() {
                if by_id.contains_key(&dep.id()) {
                    graph.add_edge(dep.id(), s.id(), ());
                }
            }
        }

        let order = toposort(&graph, None).map_err(|cycle| {
            let alias = by_id
                .get(&cycle.node_id())
                .map(|s| s.alias().to_string())
                .unwrap_or_else(|| cycle.node_id().to_string());
            FleetError::DependencyCycle(format!("subsystem '{alias}' is part of a cycle"))
        })?;

        Ok(order
            .into_iter()
            .filter_map(|id| by_id.get(&id).map(|s| Arc::clone(s)))
            .collect())
    }

    /// Deploy every subsystem after its dependencies.
    ///
    /// A failure does not stop unrelated subsystems, but everything that
    /// depends on the failed one (directly or not) is skipped. The first
    /// error is returned.
    pub async fn deploy_all(&self) -> Result<()> {
        let order = self.deployment_order()?;
        info!(subsystems = order.len(), "deploying subsystems");

        let mut failed: HashSet<SubsystemId> = HashSet::new();
        let mut first_error: Option<FleetError> = None;

        for subsystem in order {
            let blocked_by = subsystem
                .dependencies()
                .into_iter()
                .find(|d| failed.contains(&d.id()));
            if let Some(dep) = blocked_by {
                warn!(
                    subsystem = %subsystem.alias(),
                    dependency = %dep.alias(),
                    "skipping subsystem; dependency failed"
                );
                failed.insert(subsystem.id());
                continue;
            }

            match subsystem.deploy().await {
                Ok(()) => self
                    .deployed
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(subsystem),
                Err(e) => {
                    error!(subsystem = %subsystem.alias(), error = %e, "subsystem deployment failed");
                    failed.insert(subsystem.id());
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Shut down deployed subsystems, most recently deployed first.
    pub async fn shutdown_all(&self, stop_all_executed: bool) -> Result<()> {
        let mut first_error: Option<FleetError> = None;

        for subsystem in self.deployed().into_iter().rev() {
            if subsystem.is_shutdown() {
                continue;
            }
            if let Err(e) = subsystem.shutdown(stop_all_executed).await {
                error!(subsystem = %subsystem.alias(), error = %e, "subsystem shutdown failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::transport::BoxFuture;
    use crate::subsystem::{Deployment, DeploymentBase};

    struct Recording {
        base: DeploymentBase,
        fail: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Deployment for Recording {
        fn base(&self) -> &DeploymentBase {
            &self.base
        }

        fn deploy<'a>(
            &'a self,
            subsystem: &'a str,
            _dependencies: &'a [Arc<Subsystem>],
        ) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                self.log.lock().unwrap().push(subsystem.to_string());
                if self.fail {
                    Err(FleetError::Deployment(format!("{subsystem} broke")))
                } else {
                    Ok(())
                }
            })
        }
    }

    fn subsystem(alias: &str, fail: bool, log: &Arc<Mutex<Vec<String>>>) -> Arc<Subsystem> {
        Subsystem::new(
            alias,
            Arc::new(Recording {
                base: DeploymentBase::new(),
                fail,
                log: Arc::clone(log),
            }),
        )
    }

    #[tokio::test]
    async fn deploys_dependencies_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let db = subsystem("db", false, &log);
        let api = subsystem("api", false, &log);
        let web = subsystem("web", false, &log);
        web.depends_on(&[Arc::clone(&api)]).unwrap();
        api.depends_on(&[Arc::clone(&db)]).unwrap();

        let mut graph = SubsystemGraph::new();
        graph.register(Arc::clone(&web));
        graph.register(Arc::clone(&api));
        graph.register(Arc::clone(&db));
        assert!(!graph.register(Arc::clone(&db)));

        graph.deploy_all().await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["db", "api", "web"]);
        assert_eq!(graph.deployed().len(), 3);
    }

    #[tokio::test]
    async fn failure_skips_dependents_only() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let db = subsystem("db", true, &log);
        let api = subsystem("api", false, &log);
        let cache = subsystem("cache", false, &log);
        api.depends_on(&[Arc::clone(&db)]).unwrap();

        let mut graph = SubsystemGraph::new();
        graph.register(Arc::clone(&db));
        graph.register(Arc::clone(&api));
        graph.register(Arc::clone(&cache));

        let err = graph.deploy_all().await.unwrap_err();
        assert!(matches!(err, FleetError::Deployment(_)));

        let log = log.lock().unwrap();
        assert!(log.contains(&"db".to_string()));
        assert!(log.contains(&"cache".to_string()));
        assert!(!log.contains(&"api".to_string()));
        assert_eq!(graph.deployed().len(), 1);
    }
}

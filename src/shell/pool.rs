// src/shell/pool.rs

//! One session and task queue per host.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::config::Settings;
use crate::errors::{FleetError, Result};
use crate::exec::queue::{HostQueue, TaskQueue};
use crate::progress::Reporter;
use crate::shell::session::RemoteSession;
use crate::shell::transport::{Connector, SshConnector};
use crate::types::Host;

/// Sessions keyed by host value, each behind its own [`HostQueue`].
pub struct SessionPool {
    settings: Arc<Settings>,
    reporter: Reporter,
    connector: Arc<dyn Connector>,
    queues: Mutex<HashMap<Host, HostQueue>>,
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SessionPool {
    /// Pool connecting over SSH.
    pub fn new(settings: Settings, reporter: Reporter) -> Self {
        Self::with_connector(settings, reporter, Arc::new(SshConnector))
    }

    pub fn with_connector(
        settings: Settings,
        reporter: Reporter,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            reporter,
            connector,
            queues: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Open sessions for every host that has none (or whose queue died).
    ///
    /// Connections are opened concurrently; the first failure aborts the
    /// remaining attempts and is returned.
    pub async fn connect_all(&self, hosts: &[Host]) -> Result<()> {
        let mut queues = self.queues.lock().await;

        let mut missing: Vec<Host> = Vec::new();
        for host in hosts {
            let live = queues.get(host).is_some_and(|q| !q.is_closed());
            if !live && !missing.contains(host) {
                missing.push(host.clone());
            }
        }
        if missing.is_empty() {
            return Ok(());
        }

        info!(count = missing.len(), "opening sessions");
        let mut attempts = JoinSet::new();
        for host in missing {
            let settings = Arc::clone(&self.settings);
            let connector = Arc::clone(&self.connector);
            let reporter = self.reporter.clone();
            attempts.spawn(async move {
                let result =
                    RemoteSession::open(host.clone(), &settings, reporter, connector.as_ref())
                        .await;
                (host, result)
            });
        }

        while let Some(joined) = attempts.join_next().await {
            let (host, result) = joined.map_err(|e| FleetError::Other(anyhow::Error::new(e)))?;
            match result {
                Ok(session) => {
                    debug!(host = %host, "session registered");
                    let queue = TaskQueue::spawn(host.to_string(), session);
                    queues.insert(host, queue);
                }
                Err(e) => {
                    error!(host = %host, error = %e, "failed to open session");
                    attempts.abort_all();
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    /// The queue for `host`; fails if no session was opened for it.
    pub async fn queue(&self, host: &Host) -> Result<HostQueue> {
        self.queues
            .lock()
            .await
            .get(host)
            .cloned()
            .ok_or_else(|| FleetError::QueueClosed {
                host: host.to_string(),
            })
    }

    pub async fn hosts(&self) -> Vec<Host> {
        self.queues.lock().await.keys().cloned().collect()
    }

    /// Close every session, each independently; returns the first failure.
    pub async fn close_all(&self) -> Result<()> {
        let drained: Vec<(Host, HostQueue)> = self.queues.lock().await.drain().collect();
        let mut first_error = None;

        for (host, queue) in drained {
            if let Err(e) = queue.close().await {
                error!(host = %host, error = %e, "failed to close session");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

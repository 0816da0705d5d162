// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of host queues
//! directly, so tests can swap in a fake that records dispatches and
//! answers with scripted outcomes.
//!
//! - `RealExecutorBackend` is the production implementation, wrapping a
//!   [`SessionPool`].
//! - A backend must send exactly one `RuntimeEvent::CommandCompleted` per
//!   dispatched command, otherwise the runtime waits forever.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::dag::ScheduledCommand;
use crate::engine::RuntimeEvent;
use crate::errors::{FleetError, Result};
use crate::shell::executions::ExecutionFilter;
use crate::shell::pool::SessionPool;
use crate::shell::transport::BoxFuture;
use crate::types::Host;

/// How scheduled commands reach remote hosts.
pub trait ExecutorBackend: Send + Sync {
    /// Make sure every host can accept commands.
    fn prepare<'a>(&'a self, hosts: &'a [Host]) -> BoxFuture<'a, Result<()>>;

    /// Queue the commands, in order, and report each completion on `events`.
    fn dispatch<'a>(
        &'a self,
        commands: Vec<ScheduledCommand>,
        events: mpsc::UnboundedSender<RuntimeEvent>,
    ) -> BoxFuture<'a, ()>;

    /// Stop tracked executions matching `filter` on each host, most recent
    /// first per host. Returns the stopped component names.
    fn stop_executions<'a>(
        &'a self,
        hosts: &'a [Host],
        filter: ExecutionFilter,
    ) -> BoxFuture<'a, Result<Vec<String>>>;
}

/// Production backend: one task queue per host from a [`SessionPool`].
#[derive(Debug, Clone)]
pub struct RealExecutorBackend {
    pool: Arc<SessionPool>,
}

impl RealExecutorBackend {
    pub fn new(pool: Arc<SessionPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }
}

impl ExecutorBackend for RealExecutorBackend {
    fn prepare<'a>(&'a self, hosts: &'a [Host]) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.pool.connect_all(hosts))
    }

    fn dispatch<'a>(
        &'a self,
        commands: Vec<ScheduledCommand>,
        events: mpsc::UnboundedSender<RuntimeEvent>,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            for command in commands {
                let id = command.id();
                let host = command.host.clone();

                let queue = match self.pool.queue(&host).await {
                    Ok(queue) => queue,
                    Err(e) => {
                        let _ = events.send(RuntimeEvent::CommandCompleted {
                            id,
                            host,
                            result: Err(e),
                        });
                        continue;
                    }
                };

                // Enqueue synchronously so per-host order follows dispatch order.
                let pending = queue.enqueue_guarded(command.descriptor);
                let events = events.clone();
                tokio::spawn(async move {
                    let result = pending.wait().await;
                    if events
                        .send(RuntimeEvent::CommandCompleted { id, host, result })
                        .is_err()
                    {
                        debug!("runtime gone before command completed");
                    }
                });
            }
        })
    }

    fn stop_executions<'a>(
        &'a self,
        hosts: &'a [Host],
        filter: ExecutionFilter,
    ) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(async move {
            let mut stops = JoinSet::new();
            for host in hosts {
                let queue = match self.pool.queue(host).await {
                    Ok(queue) => queue,
                    Err(_) => {
                        debug!(host = %host, "no session; nothing to stop");
                        continue;
                    }
                };
                let filter = filter.clone();
                let host = host.clone();
                stops.spawn(async move { (host, queue.stop_executions(filter).await) });
            }

            let mut stopped = Vec::new();
            let mut first_error: Option<FleetError> = None;
            while let Some(joined) = stops.join_next().await {
                match joined {
                    Ok((_, Ok(names))) => stopped.extend(names),
                    Ok((host, Err(e))) => {
                        error!(host = %host, error = %e, "failed to stop executions");
                        first_error.get_or_insert(e);
                    }
                    Err(e) => {
                        first_error.get_or_insert(FleetError::Other(anyhow::Error::new(e)));
                    }
                }
            }

            match first_error {
                Some(e) => Err(e),
                None => Ok(stopped),
            }
        })
    }
}

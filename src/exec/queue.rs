// src/exec/queue.rs

//! Single-flight FIFO task queue bound to one owned resource.
//!
//! A dedicated worker task owns the resource (in production a
//! [`RemoteSession`]) and runs submitted jobs one at a time, in submission
//! order. Submitters from any number of tasks get their job's result back
//! through a oneshot channel.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::descriptor::CommandDescriptor;
use crate::engine::CommandOutcome;
use crate::errors::{FleetError, Result};
use crate::shell::executions::ExecutionFilter;
use crate::shell::session::RemoteSession;
use crate::shell::transport::BoxFuture;

/// Boxed job; resolves to `true` if the worker must stop afterwards.
type Job<R> = Box<dyn for<'a> FnOnce(&'a mut R) -> BoxFuture<'a, bool> + Send>;

fn job<R, F>(f: F) -> Job<R>
where
    F: for<'a> FnOnce(&'a mut R) -> BoxFuture<'a, bool> + Send + 'static,
{
    Box::new(f)
}

/// Result of a job that has been queued but maybe not run yet.
#[derive(Debug)]
pub struct Pending<T> {
    rx: oneshot::Receiver<Result<T>>,
    label: Arc<str>,
}

impl<T> Pending<T> {
    /// Wait for the job to finish.
    ///
    /// Fails with [`FleetError::QueueClosed`] if the worker stopped before
    /// running it.
    pub async fn wait(self) -> Result<T> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(FleetError::QueueClosed {
                host: self.label.to_string(),
            }),
        }
    }
}

/// Handle to a queue worker. Cloning shares the same worker.
pub struct TaskQueue<R> {
    tx: mpsc::UnboundedSender<Job<R>>,
    label: Arc<str>,
}

impl<R> Clone for TaskQueue<R> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            label: Arc::clone(&self.label),
        }
    }
}

impl<R> std::fmt::Debug for TaskQueue<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("label", &self.label)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl<R: Send + 'static> TaskQueue<R> {
    /// Spawn the worker owning `resource`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(label: impl Into<String>, resource: R) -> Self {
        let label: Arc<str> = Arc::from(label.into());
        let (tx, mut rx) = mpsc::unbounded_channel::<Job<R>>();

        let worker_label = Arc::clone(&label);
        tokio::spawn(async move {
            info!(queue = %worker_label, "task queue worker started");
            let mut resource = resource;

            while let Some(job) = rx.recv().await {
                if job(&mut resource).await {
                    warn!(
                        queue = %worker_label,
                        "fatal failure; task queue stops accepting work"
                    );
                    break;
                }
            }

            debug!(queue = %worker_label, "task queue worker finished");
        });

        Self { tx, label }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether the worker is gone (after a fatal failure).
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Queue `task` without waiting for it.
    ///
    /// Jobs run in the order `enqueue` was called. A fatal error returned by
    /// the task stops the worker after delivering the error.
    pub fn enqueue<T, F>(&self, task: F) -> Pending<T>
    where
        T: Send + 'static,
        F: for<'a> FnOnce(&'a mut R) -> BoxFuture<'a, Result<T>> + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();

        let queued = job(move |resource: &mut R| {
            let fut = task(resource);
            Box::pin(async move {
                let result = fut.await;
                let fatal = matches!(&result, Err(e) if e.is_fatal());
                // The submitter may have stopped waiting; nothing to do then.
                let _ = done_tx.send(result);
                fatal
            })
        });

        if self.tx.send(queued).is_err() {
            debug!(queue = %self.label, "enqueue on closed task queue");
        }

        Pending {
            rx: done_rx,
            label: Arc::clone(&self.label),
        }
    }

    /// Queue `task` and wait for its result.
    pub async fn submit<T, F>(&self, task: F) -> Result<T>
    where
        T: Send + 'static,
        F: for<'a> FnOnce(&'a mut R) -> BoxFuture<'a, Result<T>> + Send + 'static,
    {
        self.enqueue(task).wait().await
    }
}

/// Queue serializing all access to one host's session.
pub type HostQueue = TaskQueue<RemoteSession>;

impl TaskQueue<RemoteSession> {
    pub async fn execute(&self, descriptor: Arc<CommandDescriptor>) -> Result<String> {
        self.submit(move |session| Box::pin(async move { session.execute(&descriptor).await }))
            .await
    }

    /// Queue `descriptor`, evaluating its guards right before sending.
    pub fn enqueue_guarded(&self, descriptor: Arc<CommandDescriptor>) -> Pending<CommandOutcome> {
        self.enqueue(move |session| {
            Box::pin(async move {
                if !descriptor.should_execute() {
                    debug!(
                        host = %session.host(),
                        command = %descriptor.command(),
                        "execution guard is false; skipping"
                    );
                    return Ok(CommandOutcome::Skipped);
                }
                session
                    .execute(&descriptor)
                    .await
                    .map(CommandOutcome::Executed)
            })
        })
    }

    pub async fn stop_executions(&self, filter: ExecutionFilter) -> Result<Vec<String>> {
        self.submit(move |session| {
            Box::pin(async move { session.stop_executions(&filter).await })
        })
        .await
    }

    pub async fn stop_all_executions(&self) -> Result<()> {
        self.submit(|session| Box::pin(async move { session.stop_all_executions().await }))
            .await
    }

    /// Close the session. A queue whose worker already stopped counts as closed.
    pub async fn close(&self) -> Result<()> {
        match self
            .submit(|session| Box::pin(async move { session.close().await }))
            .await
        {
            Err(FleetError::QueueClosed { .. }) => Ok(()),
            other => other,
        }
    }
}

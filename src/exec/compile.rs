// src/exec/compile.rs

//! Strategy for build steps run inside a remote source tree.

use tracing::debug;

use crate::descriptor::CommandDescriptor;
use crate::errors::{FleetError, Result};
use crate::exec::strategy::ExecutionStrategy;
use crate::progress::ProgressEvent;
use crate::shell::session::RemoteSession;
use crate::shell::transport::BoxFuture;

const MISSING_PATH: &str = "No such file or directory";

/// Runs a compilation command and fails with a deployment error when the
/// shell reports that the source directory does not exist.
#[derive(Debug, Clone)]
pub struct CompileStrategy {
    source_directory: String,
}

impl CompileStrategy {
    pub fn new(source_directory: impl Into<String>) -> Self {
        Self {
            source_directory: source_directory.into(),
        }
    }

    pub fn source_directory(&self) -> &str {
        &self.source_directory
    }
}

impl ExecutionStrategy for CompileStrategy {
    fn execute<'a>(
        &'a self,
        session: &'a mut RemoteSession,
        descriptor: &'a CommandDescriptor,
        quiet: bool,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let timeout = session.effective_timeout(descriptor.timeout());
            let from = session.log().len();

            session.send_line(descriptor.command()).await?;
            let response = session.wait_for_prompt(timeout).await?;

            if response.before.contains(MISSING_PATH) {
                if !quiet {
                    session.reporter().emit(ProgressEvent::CommandFailed {
                        host: session.host().clone(),
                        message: descriptor.error_message().to_string(),
                    });
                }
                return Err(FleetError::Deployment(format!(
                    "{MISSING_PATH} \"{}\"",
                    self.source_directory
                )));
            }

            debug!(host = %session.host(), dir = %self.source_directory, "compilation finished");
            if !quiet {
                session.reporter().emit(ProgressEvent::CommandSucceeded {
                    host: session.host().clone(),
                    message: descriptor.success_message().to_string(),
                });
            }
            Ok(response.capture(session.log(), from))
        })
    }
}

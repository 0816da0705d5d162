// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod descriptor;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod progress;
pub mod shell;
pub mod subsystem;
pub mod types;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{Settings, load_settings};
use crate::descriptor::CommandDescriptor;
use crate::exec::RealExecutorBackend;
use crate::progress::Reporter;
use crate::shell::SessionPool;
use crate::subsystem::{CommandDeployment, Subsystem};
use crate::types::{Credential, Host};

/// Subsystem name used for the single command run from the command line.
const CLI_SUBSYSTEM: &str = "cli";

/// High-level entry point used by `main.rs`.
///
/// Loads settings, opens one session, runs the command through the host's
/// task queue, prints progress lines and the captured output, then closes
/// the session.
pub async fn run(args: CliArgs) -> Result<()> {
    let settings = load_settings(&args.settings)
        .with_context(|| format!("loading settings from {}", args.settings.display()))?;
    let host = resolve_host(&args)?;
    let descriptor = build_descriptor(&args, &host)?;

    if args.dry_run {
        print_dry_run(&settings, &host, &descriptor);
        return Ok(());
    }

    let (reporter, mut events) = Reporter::channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("{event}");
        }
    });

    let pool = Arc::new(SessionPool::new(settings, reporter.clone()));
    let backend = Arc::new(RealExecutorBackend::new(Arc::clone(&pool)));
    let deployment = Arc::new(CommandDeployment::new([descriptor], backend));
    let subsystem = Subsystem::with_reporter(CLI_SUBSYSTEM, deployment.clone(), reporter);

    let outcome = subsystem.deploy().await;

    if let Err(e) = subsystem.shutdown(false).await {
        warn!(error = %e, "shutdown failed");
    }
    let closed = pool.close_all().await;
    let report = deployment.last_report();

    // The printer stops once every reporter clone is gone.
    drop(subsystem);
    drop(deployment);
    drop(pool);
    if printer.await.is_err() {
        debug!("progress printer ended abnormally");
    }

    outcome?;
    closed?;

    if let Some(report) = report {
        for record in &report.outputs {
            print!("{}", record.output);
        }
        info!(
            succeeded = report.succeeded.len(),
            skipped = report.skipped.len(),
            "command finished"
        );
    }
    Ok(())
}

fn resolve_host(args: &CliArgs) -> Result<Host> {
    let mut host = args.host.clone();

    if let Some(var) = &args.password_env {
        let password = std::env::var(var)
            .with_context(|| format!("reading password from environment variable {var}"))?;
        host = host.with_password(password);
    } else if let Some(identity) = &args.identity {
        host = host.with_credential(Credential::KeyFile(identity.clone()));
    }

    Ok(host)
}

fn build_descriptor(args: &CliArgs, host: &Host) -> Result<CommandDescriptor> {
    let mut descriptor = CommandDescriptor::builder()
        .command(args.command.join(" "))
        .timeout(args.timeout)
        .error_texts(args.error_texts.iter().cloned())
        .build()?;
    descriptor.runs_on([host.clone()]);
    Ok(descriptor)
}

fn print_dry_run(settings: &Settings, host: &Host, descriptor: &CommandDescriptor) {
    println!("shellfleet dry-run");
    println!("  connection_timeout = {:?}", settings.connection_timeout);
    println!("  execution_timeout = {:?}", settings.execution_timeout);
    if let Some(dir) = &settings.sessions_dir {
        println!("  sessions_dir = {}", dir.display());
    }
    println!();
    println!("host: {host} ({:?})", host.credential);
    println!("command: {}", descriptor.command());
    println!("timeout: {:?}", descriptor.timeout());
    if !descriptor.error_texts().is_empty() {
        println!("error texts: {:?}", descriptor.error_texts());
    }

    debug!("dry-run complete (no connection)");
}

//! Run command implementation.

use super::{open_journal, open_lakehouse};
use crate::ExitCode;
use anyhow::{Context, Result};
use std::path::Path;
use tokio::sync::broadcast;
use tracing::info;
use wapflow_core::source::read_batch;
use wapflow_core::wap::{CoordinatorConfig, Outcome, RunReport};
use wapflow_core::{BranchName, Config, RunRequest, TableName, WapCoordinatorBuilder};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Stage, audit and publish the batch at `source` into `table`.
pub async fn run(
    config: Config,
    table: &str,
    branch: Option<&str>,
    source: &Path,
) -> Result<ExitCode> {
    let table = TableName::new(table)?;
    let branch = branch.map(BranchName::new).transpose()?;

    let batch = read_batch(source)
        .with_context(|| format!("Failed to read batch from {}", source.display()))?;
    info!(
        table = %table,
        source = %source.display(),
        rows = batch.len(),
        batch_id = batch.batch_id(),
        "Loaded batch"
    );

    let lakehouse = open_lakehouse(&config)?;
    let mut builder = WapCoordinatorBuilder::new()
        .lakehouse(lakehouse)
        .config(CoordinatorConfig::from(&config))
        .schema_policy(config.staging.schema_policy)
        .auto_create_table(config.staging.auto_create_table);
    if let Some(journal) = open_journal(&config)? {
        builder = builder.journal(journal);
    }
    let coordinator = builder.build()?;

    let (cancel_tx, cancel_rx) = broadcast::channel(1);
    let signals = tokio::spawn(async move {
        wait_for_signal().await;
        let _ = cancel_tx.send(());
    });

    let mut request =
        RunRequest::new(table, batch, config.audit.checks.clone()).cancel_on(cancel_rx);
    if let Some(branch) = branch {
        request = request.with_branch(branch);
    }

    let report = coordinator.run(request).await;
    signals.abort();

    print_report(&report);

    Ok(match report.outcome {
        Outcome::Published(_) => ExitCode::Success,
        Outcome::Rejected(_) => ExitCode::Rejected,
        Outcome::Aborted(_) => ExitCode::Aborted,
    })
}

/// Resolve on SIGINT or SIGTERM.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received SIGINT (Ctrl+C), cancelling run");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, cancelling run");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                info!("Received SIGINT (Ctrl+C), cancelling run");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, cancelling run");
    }
}

fn print_report(report: &RunReport) {
    println!("Run:         {}", report.run_id);
    println!("Destination: {}", report.destination);
    if let Some(branch) = &report.branch {
        println!("Branch:      {}", branch);
    }
    println!("Duration:    {} ms", report.duration().num_milliseconds());

    println!("\n--- Transitions ---");
    for transition in &report.transitions {
        match &transition.detail {
            Some(detail) => println!(
                "  {} {} -> {} ({})",
                transition.at.to_rfc3339(),
                transition.from,
                transition.to,
                detail
            ),
            None => println!(
                "  {} {} -> {}",
                transition.at.to_rfc3339(),
                transition.from,
                transition.to
            ),
        }
    }

    println!();
    match &report.outcome {
        Outcome::Published(commit) => {
            println!("PUBLISHED {}", commit);
            println!("  Rows in table: {}", commit.row_count);
        }
        Outcome::Rejected(rejection) => {
            println!("REJECTED");
            for diagnostic in &rejection.diagnostics {
                let status = if diagnostic.passed { "PASS" } else { "FAIL" };
                println!("  [{}] {}: {}", status, diagnostic.check, diagnostic.message);
            }
        }
        Outcome::Aborted(err) => {
            println!("ABORTED in {}: {}", err.state, err.source);
        }
    }

    if let Some(cleanup) = &report.cleanup_error {
        println!(
            "\nWarning: staging branch was not discarded ({}). Run `wapflow sweep`.",
            cleanup
        );
    }
}

//! Sweep command implementation.

use super::{open_journal, open_lakehouse};
use crate::ExitCode;
use anyhow::Result;
use tracing::info;
use wapflow_core::journal::{compact, sweep, RecoveryState, RunJournal};
use wapflow_core::wap::BranchPublisher;
use wapflow_core::Config;

/// Discard every staging branch the journal reports as leaked.
pub async fn run(config: Config) -> Result<ExitCode> {
    let Some(journal) = open_journal(&config)? else {
        println!("Run journal is disabled, nothing to sweep");
        return Ok(ExitCode::Success);
    };

    let state = RecoveryState::recover_from(&journal)?;
    info!(
        entries = state.entries_processed,
        finished_runs = state.finished_runs,
        leaked = state.leaked_branches.len(),
        "Recovered run journal"
    );
    if !state.needs_cleanup() {
        println!("No leaked staging branches");
        compact_journal(&journal)?;
        return Ok(ExitCode::Success);
    }

    let lakehouse = open_lakehouse(&config)?;
    let publisher = BranchPublisher::new(lakehouse, config.lakehouse.main_branch.clone());
    let report = sweep(&publisher, &journal).await?;

    for leaked in &report.swept {
        println!(
            "Discarded {} (run {}, {})",
            leaked.branch, leaked.run_id, leaked.reason
        );
    }
    for (leaked, error) in &report.failed {
        println!("FAILED    {} (run {}): {}", leaked.branch, leaked.run_id, error);
    }
    compact_journal(&journal)?;

    if report.failed.is_empty() {
        Ok(ExitCode::Success)
    } else {
        Ok(ExitCode::RuntimeError)
    }
}

/// Remove journal files whose runs are all settled.
fn compact_journal(journal: &RunJournal) -> Result<()> {
    let removed = compact(journal)?;
    if removed > 0 {
        println!("Removed {} settled journal file(s)", removed);
    }
    Ok(())
}

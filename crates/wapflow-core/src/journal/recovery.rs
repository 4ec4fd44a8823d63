//! Crash recovery from the run journal.
//!
//! A run that started but never finished (process killed, host crash) or
//! whose cleanup failed may have left its staging branch behind. Recovery
//! replays the journal to find those branches; [`sweep`] discards them and
//! [`compact`] drops the records of runs that are settled.
//!
//! A caller-named branch may predate its run. Such a run owns the branch
//! only once it reached `STAGED`; before that it is never reported.

use super::entries::JournalEntry;
use super::log::RunJournal;
use crate::error::{CleanupError, Error};
use crate::model::{BranchName, StagingHandle, TableName};
use crate::wap::{Publisher, RunState};
use crate::Result;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use tracing::{debug, info, warn};

/// Why a branch is considered leaked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeakReason {
    /// Run started but never recorded a terminal outcome
    IncompleteRun,
    /// Run finished but could not discard its branch
    CleanupFailed,
}

impl fmt::Display for LeakReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeakReason::IncompleteRun => f.write_str("incomplete run"),
            LeakReason::CleanupFailed => f.write_str("cleanup failed"),
        }
    }
}

/// A staging branch that may still exist.
#[derive(Debug, Clone, PartialEq)]
pub struct LeakedBranch {
    pub run_id: String,
    pub destination: TableName,
    pub branch: BranchName,
    pub reason: LeakReason,
}

#[derive(Debug)]
struct RunTrack {
    destination: TableName,
    branch: BranchName,
    owned: bool,
    cleanup_failed: bool,
    finished: bool,
}

/// State recovered from the run journal.
#[derive(Debug, Default)]
pub struct RecoveryState {
    /// Branches to discard, ordered by branch name
    pub leaked_branches: Vec<LeakedBranch>,
    /// Runs with a terminal outcome
    pub finished_runs: usize,
    /// Total entries processed
    pub entries_processed: u64,
}

impl RecoveryState {
    /// Recover state from a run journal.
    pub fn recover_from(journal: &RunJournal) -> Result<Self> {
        info!("Starting recovery from run journal");

        Ok(Self::replay(journal.read_all_entries()?))
    }

    fn replay(mut entries: Vec<JournalEntry>) -> Self {
        // Stable: entries with equal timestamps keep file order.
        entries.sort_by_key(|e| e.timestamp());

        let mut state = RecoveryState::default();
        let mut runs: HashMap<String, RunTrack> = HashMap::new();

        for entry in entries {
            state.entries_processed += 1;

            match entry {
                JournalEntry::RunStarted {
                    run_id,
                    destination,
                    branch,
                    branch_owned,
                    ..
                } => {
                    runs.insert(
                        run_id,
                        RunTrack {
                            destination,
                            branch,
                            owned: branch_owned,
                            cleanup_failed: false,
                            finished: false,
                        },
                    );
                }
                JournalEntry::CleanupFailed { run_id, .. } => {
                    if let Some(track) = runs.get_mut(&run_id) {
                        track.cleanup_failed = true;
                    }
                }
                JournalEntry::RunFinished { run_id, .. } => {
                    if let Some(track) = runs.get_mut(&run_id) {
                        track.finished = true;
                    }
                    state.finished_runs += 1;
                }
                JournalEntry::BranchSwept { branch, .. } => {
                    runs.retain(|_, track| track.branch != branch);
                }
                JournalEntry::StateTransition {
                    run_id,
                    to: RunState::Staged,
                    ..
                } => {
                    if let Some(track) = runs.get_mut(&run_id) {
                        track.owned = true;
                    }
                }
                JournalEntry::StateTransition { .. } => {}
            }
        }

        let mut leaked: BTreeMap<(BranchName, String), LeakedBranch> = BTreeMap::new();
        for (run_id, track) in runs {
            if !track.owned {
                debug!(
                    run_id = %run_id,
                    branch = %track.branch,
                    "Run never staged into its named branch, not a leak"
                );
                continue;
            }
            let reason = match (track.finished, track.cleanup_failed) {
                (false, _) => LeakReason::IncompleteRun,
                (true, true) => LeakReason::CleanupFailed,
                (true, false) => continue,
            };

            warn!(
                run_id = %run_id,
                branch = %track.branch,
                reason = %reason,
                "Found leaked staging branch"
            );

            leaked.insert(
                (track.branch.clone(), run_id.clone()),
                LeakedBranch {
                    run_id,
                    destination: track.destination,
                    branch: track.branch,
                    reason,
                },
            );
        }
        state.leaked_branches = leaked.into_values().collect();

        info!(
            entries = state.entries_processed,
            finished_runs = state.finished_runs,
            leaked_branches = state.leaked_branches.len(),
            "Recovery complete"
        );

        state
    }

    /// Check if there are branches that need cleanup.
    pub fn needs_cleanup(&self) -> bool {
        !self.leaked_branches.is_empty()
    }
}

/// Result of a sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Branches discarded (or already gone)
    pub swept: Vec<LeakedBranch>,
    /// Branches whose discard failed
    pub failed: Vec<(LeakedBranch, CleanupError)>,
}

/// Discard every leaked branch found in the journal.
///
/// Discarding is idempotent, so branches that were cleaned up by other means
/// count as swept. Each successful discard is journaled as `BranchSwept`.
/// Must not run concurrently with active runs writing to the same journal
/// directory: their branches would look leaked.
pub async fn sweep(publisher: &dyn Publisher, journal: &RunJournal) -> Result<SweepReport> {
    let recovery = RecoveryState::recover_from(journal)?;
    let mut report = SweepReport::default();

    if !recovery.needs_cleanup() {
        debug!("No leaked staging branches to sweep");
        return Ok(report);
    }

    for leaked in recovery.leaked_branches {
        let handle = StagingHandle::reserve(
            leaked.run_id.clone(),
            leaked.destination.clone(),
            leaked.branch.clone(),
        );

        match publisher.discard(&handle).await {
            Ok(()) => {
                debug!(branch = %leaked.branch, run_id = %leaked.run_id, "Swept staging branch");
                journal.append(JournalEntry::BranchSwept {
                    branch: leaked.branch.clone(),
                    timestamp: Utc::now(),
                })?;
                report.swept.push(leaked);
            }
            Err(e) => {
                let cleanup = match e {
                    Error::Cleanup(cleanup) => cleanup,
                    other => CleanupError::Discard {
                        branch: leaked.branch.to_string(),
                        message: other.to_string(),
                    },
                };
                warn!(
                    branch = %leaked.branch,
                    run_id = %leaked.run_id,
                    error = %cleanup,
                    "Failed to sweep staging branch"
                );
                report.failed.push((leaked, cleanup));
            }
        }
    }

    info!(
        swept = report.swept.len(),
        failed = report.failed.len(),
        "Sweep complete"
    );

    Ok(report)
}

/// Drop journal records of settled runs.
///
/// Entries of runs that may still have leaked a branch are carried into a
/// fresh journal file and every other journal file is removed. Returns the
/// number of files removed. The same rule as [`sweep`] applies: no run may
/// be writing to the journal directory meanwhile.
pub fn compact(journal: &RunJournal) -> Result<usize> {
    let entries = journal.read_all_entries()?;
    let recovery = RecoveryState::replay(entries.clone());
    let open: HashSet<&str> = recovery
        .leaked_branches
        .iter()
        .map(|leaked| leaked.run_id.as_str())
        .collect();

    let carry: Vec<JournalEntry> = entries
        .into_iter()
        .filter(|entry| entry.run_id().map_or(false, |id| open.contains(id)))
        .collect();

    journal.checkpoint(&carry)
}

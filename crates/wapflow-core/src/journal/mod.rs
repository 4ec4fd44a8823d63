//! Run journal for crash recovery.
//!
//! The journal provides:
//! - Append-only JSON-lines records of every run and state transition
//! - Recovery of staging branches leaked by crashed or failed runs
//! - An idempotent sweep that discards leaked branches
//! - Compaction that drops the records of settled runs

mod entries;
mod log;
mod recovery;

pub use entries::JournalEntry;
pub use log::RunJournal;
pub use recovery::{compact, sweep, LeakReason, LeakedBranch, RecoveryState, SweepReport};

//! Journal entry types.
//!
//! Each entry records one step of a run and is replayed by recovery.

use crate::model::{BranchName, TableName};
use crate::wap::RunState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A run journal entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JournalEntry {
    /// Run reserved its staging branch (recorded before staging starts)
    RunStarted {
        run_id: String,
        destination: TableName,
        branch: BranchName,
        /// False when the caller named a branch that may predate the run;
        /// the run owns it only after a transition to `STAGED`
        #[serde(default = "owned_by_default")]
        branch_owned: bool,
        batch_id: String,
        row_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// State machine transition
    StateTransition {
        run_id: String,
        from: RunState,
        to: RunState,
        detail: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Discarding the staging branch failed; the branch may be leaked
    CleanupFailed {
        run_id: String,
        branch: BranchName,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Run reached a terminal outcome
    RunFinished {
        run_id: String,
        /// `published`, `rejected` or `aborted`
        outcome: String,
        commit_id: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A leaked branch was discarded by a sweep
    BranchSwept {
        branch: BranchName,
        timestamp: DateTime<Utc>,
    },
}

impl JournalEntry {
    /// Get the run ID, if the entry belongs to a run.
    pub fn run_id(&self) -> Option<&str> {
        match self {
            JournalEntry::RunStarted { run_id, .. }
            | JournalEntry::StateTransition { run_id, .. }
            | JournalEntry::CleanupFailed { run_id, .. }
            | JournalEntry::RunFinished { run_id, .. } => Some(run_id),
            JournalEntry::BranchSwept { .. } => None,
        }
    }

    /// Get the timestamp of the entry.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            JournalEntry::RunStarted { timestamp, .. }
            | JournalEntry::StateTransition { timestamp, .. }
            | JournalEntry::CleanupFailed { timestamp, .. }
            | JournalEntry::RunFinished { timestamp, .. }
            | JournalEntry::BranchSwept { timestamp, .. } => *timestamp,
        }
    }
}

fn owned_by_default() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_serialization() {
        let entry = JournalEntry::StateTransition {
            run_id: "run-123".into(),
            from: RunState::Staged,
            to: RunState::Audited,
            detail: Some("verdict PASS".into()),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"type\":\"StateTransition\""));
        assert!(json.contains("\"from\":\"STAGED\""));

        let parsed: JournalEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, entry);
        assert_eq!(parsed.run_id(), Some("run-123"));
    }

    #[test]
    fn test_branch_swept_has_no_run() {
        let entry = JournalEntry::BranchSwept {
            branch: BranchName::new("wap_1").unwrap(),
            timestamp: Utc::now(),
        };
        assert_eq!(entry.run_id(), None);
    }

    #[test]
    fn test_run_started_branch_owned_defaults_to_true() {
        let json = r#"{"type":"RunStarted","run_id":"r1","destination":"orders","branch":"wap_r1","batch_id":"b1","row_count":3,"timestamp":"2024-01-01T00:00:00Z"}"#;

        match serde_json::from_str::<JournalEntry>(json).unwrap() {
            JournalEntry::RunStarted { branch_owned, .. } => assert!(branch_owned),
            other => panic!("unexpected entry: {:?}", other),
        }
    }
}

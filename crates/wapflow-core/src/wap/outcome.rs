//! Terminal outcomes of a run.

use super::state::{RunState, Transition};
use crate::audit::CheckDiagnostic;
use crate::error::{CleanupError, Error};
use crate::model::{BranchName, CommitRef, TableName};
use chrono::{DateTime, Utc};

/// Diagnostics of a run whose audit failed.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub run_id: String,
    /// Every check evaluated, passed or not
    pub diagnostics: Vec<CheckDiagnostic>,
    /// Set when the staging branch could not be discarded
    pub cleanup_error: Option<CleanupError>,
}

impl Rejection {
    /// Diagnostics of the violated checks.
    pub fn failed_checks(&self) -> impl Iterator<Item = &CheckDiagnostic> {
        self.diagnostics.iter().filter(|d| !d.passed)
    }
}

/// A run that ended in `ABORTED`.
///
/// Carries the unmodified collaborator error together with the run it
/// belongs to and the state that failed.
#[derive(Debug, thiserror::Error)]
#[error("run {run_id} aborted in state {state}: {source}")]
pub struct RunError {
    pub run_id: String,
    /// State the run was in when the error occurred
    pub state: RunState,
    #[source]
    pub source: Error,
    /// Set when the staging branch could not be discarded
    pub cleanup_error: Option<CleanupError>,
}

impl RunError {
    /// Whether the run was cancelled by its host.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.source, Error::Cancelled)
    }
}

/// Terminal outcome of a run.
#[derive(Debug)]
pub enum Outcome {
    Published(CommitRef),
    Rejected(Rejection),
    Aborted(RunError),
}

impl Outcome {
    /// The terminal state this outcome corresponds to.
    pub fn state(&self) -> RunState {
        match self {
            Outcome::Published(_) => RunState::Published,
            Outcome::Rejected(_) => RunState::Rejected,
            Outcome::Aborted(_) => RunState::Aborted,
        }
    }

    /// Lower-case label, e.g. `published`.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Published(_) => "published",
            Outcome::Rejected(_) => "rejected",
            Outcome::Aborted(_) => "aborted",
        }
    }

    pub fn is_published(&self) -> bool {
        matches!(self, Outcome::Published(_))
    }

    pub fn commit_ref(&self) -> Option<&CommitRef> {
        match self {
            Outcome::Published(commit) => Some(commit),
            _ => None,
        }
    }

    /// Convert into a `Result`. A rejection becomes a [`RunError`] whose
    /// source is [`Error::AuditRejected`].
    pub fn into_result(self) -> Result<CommitRef, RunError> {
        match self {
            Outcome::Published(commit) => Ok(commit),
            Outcome::Aborted(err) => Err(err),
            Outcome::Rejected(rejection) => Err(RunError {
                source: Error::AuditRejected {
                    failed_checks: rejection
                        .failed_checks()
                        .map(|d| d.check.clone())
                        .collect(),
                },
                run_id: rejection.run_id,
                state: RunState::Audited,
                cleanup_error: rejection.cleanup_error,
            }),
        }
    }
}

/// Full record of a finished run.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: String,
    pub destination: TableName,
    /// Staging branch, `None` when the run aborted before reserving one
    pub branch: Option<BranchName>,
    pub outcome: Outcome,
    pub transitions: Vec<Transition>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Cleanup failure on any exit path, including after a publish
    pub cleanup_error: Option<CleanupError>,
}

impl RunReport {
    /// Final state of the run.
    pub fn state(&self) -> RunState {
        self.outcome.state()
    }

    /// Wall-clock duration of the run.
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StagingError;

    fn diagnostic(check: &str, passed: bool) -> CheckDiagnostic {
        CheckDiagnostic {
            check: check.to_string(),
            passed,
            violating_rows: if passed { 0 } else { 3 },
            message: String::new(),
        }
    }

    #[test]
    fn test_rejection_into_result_names_failed_checks() {
        let outcome = Outcome::Rejected(Rejection {
            run_id: "run-7".into(),
            diagnostics: vec![
                diagnostic("not_null(order_id)", false),
                diagnostic("min_rows(1)", true),
            ],
            cleanup_error: None,
        });
        assert_eq!(outcome.state(), RunState::Rejected);
        assert_eq!(outcome.label(), "rejected");

        let err = outcome.into_result().unwrap_err();
        assert_eq!(err.run_id, "run-7");
        assert_eq!(err.state, RunState::Audited);
        match err.source {
            Error::AuditRejected { failed_checks } => {
                assert_eq!(failed_checks, vec!["not_null(order_id)".to_string()])
            }
            other => panic!("unexpected source: {other}"),
        }
    }

    #[test]
    fn test_run_error_keeps_cause_and_state() {
        let err = RunError {
            run_id: "run-1".into(),
            state: RunState::Init,
            source: StagingError::EmptyBatch.into(),
            cleanup_error: None,
        };
        let message = err.to_string();
        assert!(message.contains("run-1"));
        assert!(message.contains("INIT"));
        assert!(message.contains("Batch is empty"));
        assert!(!err.is_cancelled());

        let outcome = Outcome::Aborted(err);
        assert!(outcome.commit_ref().is_none());
        assert!(!outcome.is_published());
    }
}

//! Error types for wapflow core library.
//!
//! Uses hierarchical domain-specific errors following the thiserror pattern.
//! Each phase of a run (stage, audit, publish, cleanup) has its own error
//! type so callers can tell which collaborator failed without parsing text.

use thiserror::Error;

/// Result type alias for wapflow operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for lakehouse operations.
pub type LakehouseResult<T> = std::result::Result<T, LakehouseError>;

/// Top-level error type for wapflow.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Lakehouse error outside of a run phase
    #[error("Lakehouse error: {0}")]
    Lakehouse(#[from] LakehouseError),

    /// Staging (branch creation or write) failed
    #[error("Staging error: {0}")]
    Staging(#[from] StagingError),

    /// The audit could not be executed (distinct from a failing audit)
    #[error("Audit execution error: {0}")]
    AuditExecution(#[from] AuditExecutionError),

    /// Publishing (merge) failed after a passing audit
    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    /// Discarding a staging area failed
    #[error("Cleanup error: {0}")]
    Cleanup(#[from] CleanupError),

    /// Run journal error
    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    /// Batch source could not be read
    #[error("Source error: {0}")]
    Source(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Staged data failed its audit (a business outcome, surfaced as an
    /// error only when an outcome is converted into a `Result`)
    #[error("Audit rejected the batch: {}", failed_checks.join(", "))]
    AuditRejected { failed_checks: Vec<String> },

    /// The run was cancelled by its host
    #[error("Run cancelled")]
    Cancelled,

    /// A phase exceeded its time limit
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Internal state machine violation
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

/// Errors raised by a lakehouse implementation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LakehouseError {
    /// Branch does not exist
    #[error("Branch not found: {0}")]
    BranchNotFound(String),

    /// Branch already exists
    #[error("Branch already exists: {0}")]
    BranchExists(String),

    /// Table does not exist on the given branch
    #[error("Table {table} not found on branch {branch}")]
    TableNotFound { branch: String, table: String },

    /// Table already exists on the given branch
    #[error("Table {table} already exists on branch {branch}")]
    TableExists { branch: String, table: String },

    /// Rows do not match the table schema
    #[error("Schema mismatch: expected {expected}, actual {actual}")]
    SchemaMismatch { expected: String, actual: String },

    /// Merge rejected by conflict detection
    #[error("Merge conflict merging {from} into {onto}: {reason}")]
    MergeConflict {
        from: String,
        onto: String,
        reason: String,
    },

    /// Connectivity failure talking to the lakehouse
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Persistent storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid table or branch name
    #[error("Invalid name: {0}")]
    InvalidName(String),
}

/// Staging writer errors.
#[derive(Error, Debug)]
pub enum StagingError {
    /// Batches must contain at least one row
    #[error("Batch is empty")]
    EmptyBatch,

    /// Destination table missing and auto-creation disabled
    #[error("Destination table not found: {0}")]
    TableNotFound(String),

    /// Batch columns are not compatible with the destination schema
    #[error("Schema incompatible for {table}: {reason}")]
    SchemaIncompatible { table: String, reason: String },

    /// Staging onto the publish target is refused
    #[error("Refusing to stage onto protected branch {0}")]
    ProtectedBranch(String),

    /// Import planning failed before any branch was created
    #[error("Import planning failed for {table}: {source}")]
    Plan {
        table: String,
        #[source]
        source: LakehouseError,
    },

    /// Branch creation failed
    #[error("Failed to create branch {branch}: {source}")]
    BranchCreation {
        branch: String,
        #[source]
        source: LakehouseError,
    },

    /// Writing the batch into the branch failed
    #[error("Failed to write batch to branch {branch}: {source}")]
    Write {
        branch: String,
        #[source]
        source: LakehouseError,
    },
}

/// Errors executing the audit itself. A failing check is not an error.
#[derive(Error, Debug)]
pub enum AuditExecutionError {
    /// No checks were supplied
    #[error("No quality checks configured")]
    NoChecks,

    /// Reading staged data failed
    #[error("Failed to scan {table} on branch {branch}: {source}")]
    Scan {
        branch: String,
        table: String,
        #[source]
        source: LakehouseError,
    },
}

/// Publisher errors.
#[derive(Error, Debug)]
pub enum PublishError {
    /// Concurrent change on the destination rejected the merge
    #[error("Merge conflict publishing {branch}: {reason}")]
    Conflict { branch: String, reason: String },

    /// The merge failed for another reason
    #[error("Failed to merge {branch}: {source}")]
    Merge {
        branch: String,
        #[source]
        source: LakehouseError,
    },

    /// Reading back the published state failed
    #[error("Published {branch} but could not read back {table}: {source}")]
    ReadBack {
        branch: String,
        table: String,
        #[source]
        source: LakehouseError,
    },
}

/// Failure to discard a staging area.
///
/// Reported alongside an outcome, never in place of one.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CleanupError {
    /// Deleting the branch failed
    #[error("Failed to discard staging branch {branch}: {message}")]
    Discard { branch: String, message: String },

    /// The branch is the publish target and must not be deleted
    #[error("Refusing to discard protected branch {0}")]
    ProtectedBranch(String),
}

/// Run journal errors.
#[derive(Error, Debug)]
pub enum JournalError {
    /// Journal corrupted
    #[error("Journal corrupted at line {line}: {message}")]
    Corrupted { line: u64, message: String },

    /// Entry write failed
    #[error("Entry write failed: {0}")]
    WriteFailed(String),

    /// Reading journal files failed
    #[error("Read failed: {0}")]
    ReadFailed(String),
}

// Conversion implementations for external error types

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl Error {
    /// Short label of the error class, logged as the `kind` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Lakehouse(_) => "lakehouse",
            Error::Staging(_) => "staging",
            Error::AuditExecution(_) => "audit_execution",
            Error::Publish(_) => "publish",
            Error::Cleanup(_) => "cleanup",
            Error::Journal(_) => "journal",
            Error::Source(_) => "source",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
            Error::AuditRejected { .. } => "audit_rejected",
            Error::Cancelled => "cancelled",
            Error::Timeout(_) => "timeout",
            Error::InvalidTransition { .. } => "invalid_transition",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Config("invalid value".into());
        assert_eq!(err.to_string(), "Configuration error: invalid value");

        let staging = StagingError::Write {
            branch: "alice.ingest".into(),
            source: LakehouseError::Connection("reset by peer".into()),
        };
        let err: Error = staging.into();
        assert!(err.to_string().contains("alice.ingest"));
        assert!(err.to_string().contains("reset by peer"));
    }

    #[test]
    fn test_staging_error_source_chain() {
        use std::error::Error as _;

        let err = StagingError::BranchCreation {
            branch: "b".into(),
            source: LakehouseError::BranchExists("b".into()),
        };
        let source = err.source().expect("source");
        assert_eq!(source.to_string(), "Branch already exists: b");
    }

    #[test]
    fn test_merge_conflict_display() {
        let err = LakehouseError::MergeConflict {
            from: "wap_1".into(),
            onto: "main".into(),
            reason: "head moved".into(),
        };
        assert!(err.to_string().contains("Merge conflict"));
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(Error::Cancelled.kind(), "cancelled");
        assert_eq!(
            Error::from(AuditExecutionError::NoChecks).kind(),
            "audit_execution"
        );
        assert_eq!(Error::Timeout("audit".into()).kind(), "timeout");
    }
}

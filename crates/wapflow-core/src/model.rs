//! Core data model: tables, branches, batches and the references a run
//! hands between its phases.

use crate::error::LakehouseError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// A single record: column name to JSON value.
///
/// A `null` value and a missing column are both nulls for that column.
pub type Row = BTreeMap<String, serde_json::Value>;

/// Validated table identifier (`table` or `namespace.table`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableName(String);

impl TableName {
    /// Parse and validate a table name.
    pub fn new(name: impl Into<String>) -> Result<Self, LakehouseError> {
        let name = name.into();
        let valid = !name.is_empty()
            && name.split('.').all(|segment| {
                !segment.is_empty()
                    && segment
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_')
            });
        if !valid {
            return Err(LakehouseError::InvalidName(format!(
                "table name '{}' must be dot-separated [A-Za-z0-9_] segments",
                name
            )));
        }
        Ok(Self(name))
    }

    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TableName {
    type Error = LakehouseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TableName> for String {
    fn from(value: TableName) -> Self {
        value.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validated branch (reference) name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchName(String);

impl BranchName {
    /// Parse and validate a branch name.
    pub fn new(name: impl Into<String>) -> Result<Self, LakehouseError> {
        let name = name.into();
        let charset_ok = name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '/'));
        let valid = !name.is_empty()
            && charset_ok
            && !name.starts_with(['/', '.'])
            && !name.ends_with(['/', '.'])
            && !name.contains("..");
        if !valid {
            return Err(LakehouseError::InvalidName(format!(
                "branch name '{}' is not a valid reference",
                name
            )));
        }
        Ok(Self(name))
    }

    /// The conventional default branch, `main`.
    pub fn main() -> Self {
        Self("main".to_string())
    }

    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BranchName {
    type Error = LakehouseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BranchName> for String {
    fn from(value: BranchName) -> Self {
        value.0
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable set of records ingested by one run.
///
/// Clones share the underlying rows.
#[derive(Debug, Clone)]
pub struct Batch {
    batch_id: String,
    rows: Arc<[Row]>,
}

impl Batch {
    /// Create a batch from rows.
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            batch_id: Uuid::new_v4().to_string(),
            rows: rows.into(),
        }
    }

    /// Unique identifier of this batch.
    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    /// The rows of the batch.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the batch has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Union of the column names used by any row.
    pub fn columns(&self) -> BTreeSet<String> {
        self.rows
            .iter()
            .flat_map(|row| row.keys().cloned())
            .collect()
    }
}

impl From<Vec<Row>> for Batch {
    fn from(rows: Vec<Row>) -> Self {
        Self::new(rows)
    }
}

/// Reference to a run's staging area.
///
/// Created as a reservation before staging (`rows_written == 0`,
/// no `base_commit`) so cleanup knows which branch to discard even when
/// staging fails half way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingHandle {
    /// Run that owns this staging area
    pub run_id: String,
    /// Table the batch is destined for
    pub destination: TableName,
    /// Isolated branch holding the staged data
    pub branch: BranchName,
    /// Commit on the staging branch after the write
    pub base_commit: Option<String>,
    /// Rows written into the staging branch
    pub rows_written: usize,
    /// When the reservation was made
    pub created_at: DateTime<Utc>,
}

impl StagingHandle {
    /// Reserve a staging area for a run.
    pub fn reserve(run_id: impl Into<String>, destination: TableName, branch: BranchName) -> Self {
        Self {
            run_id: run_id.into(),
            destination,
            branch,
            base_commit: None,
            rows_written: 0,
            created_at: Utc::now(),
        }
    }

    /// Whether the batch has been written.
    pub fn is_staged(&self) -> bool {
        self.base_commit.is_some()
    }
}

/// Durable reference to the destination state after a publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRef {
    /// Commit identifier on the publish target
    pub commit_id: String,
    /// Branch the data was published onto
    pub branch: BranchName,
    /// Destination table
    pub table: TableName,
    /// Rows in the destination table after the publish
    pub row_count: usize,
    /// When the merge happened
    pub merged_at: DateTime<Utc>,
}

impl fmt::Display for CommitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({})", self.table, self.branch, self.commit_id)
    }
}

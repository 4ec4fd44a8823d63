//! Lakehouse abstraction with Git-like branch and merge semantics.
//!
//! The coordinator never talks to storage directly: staging, auditing and
//! publishing all go through a [`Lakehouse`]. Branch isolation, atomic
//! appends and merge conflict detection are the lakehouse's job.
//!
//! - [`Lakehouse`] trait for any branch-capable catalog
//! - [`MemoryLakehouse`] in-process implementation with optional
//!   persistence to a warehouse directory

mod memory;

pub use memory::MemoryLakehouse;

use crate::error::LakehouseResult;
use crate::model::{BranchName, Row, TableName};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operations that can be performed on a branch-capable lakehouse.
///
/// Implementations must make `append` and `merge` atomic: either every row
/// becomes visible on the target ref or none does.
#[async_trait]
pub trait Lakehouse: Send + Sync {
    /// Check if the lakehouse is reachable.
    async fn health_check(&self) -> LakehouseResult<LakehouseHealth>;

    /// Create `name` as a copy-on-write branch of `from`.
    async fn create_branch(&self, name: &BranchName, from: &BranchName)
        -> LakehouseResult<BranchInfo>;

    /// Delete a branch. Returns `false` if it did not exist.
    async fn delete_branch(&self, name: &BranchName) -> LakehouseResult<bool>;

    /// Check if a branch exists.
    async fn branch_exists(&self, name: &BranchName) -> LakehouseResult<bool>;

    /// List all branches.
    async fn list_branches(&self) -> LakehouseResult<Vec<BranchInfo>>;

    /// Current head commit of a branch.
    async fn head(&self, branch: &BranchName) -> LakehouseResult<String>;

    /// Check if a table exists on a branch.
    async fn table_exists(&self, branch: &BranchName, table: &TableName) -> LakehouseResult<bool>;

    /// Column names of a table on a branch.
    async fn table_schema(
        &self,
        branch: &BranchName,
        table: &TableName,
    ) -> LakehouseResult<Vec<String>>;

    /// Create an empty table on a branch.
    async fn create_table(
        &self,
        branch: &BranchName,
        table: &TableName,
        columns: &[String],
    ) -> LakehouseResult<String>;

    /// Append rows to a table on a branch. Returns the new head commit.
    async fn append(
        &self,
        branch: &BranchName,
        table: &TableName,
        rows: &[Row],
    ) -> LakehouseResult<String>;

    /// Read a table on a branch, optionally projecting to `columns`.
    async fn scan(
        &self,
        branch: &BranchName,
        table: &TableName,
        columns: Option<&[String]>,
    ) -> LakehouseResult<Vec<Row>>;

    /// Number of rows in a table on a branch.
    async fn row_count(&self, branch: &BranchName, table: &TableName) -> LakehouseResult<usize>;

    /// Merge the changes of `from` into `onto`.
    async fn merge(&self, from: &BranchName, onto: &BranchName) -> LakehouseResult<MergeResult>;
}

/// Health status of a lakehouse connection.
#[derive(Debug, Clone)]
pub struct LakehouseHealth {
    /// Whether the lakehouse is healthy
    pub is_healthy: bool,
    /// Number of branches currently present
    pub branch_count: usize,
    /// Optional message with details
    pub message: Option<String>,
}

/// Description of a branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchInfo {
    /// Branch name
    pub name: BranchName,
    /// Head commit
    pub head: String,
    /// Branch this one was forked from, if any
    pub forked_from: Option<BranchName>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Result of a successful merge.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeResult {
    /// New head commit of the target branch
    pub commit_id: String,
    /// Tables that received changes
    pub tables_changed: Vec<TableName>,
    /// When the merge was applied
    pub merged_at: DateTime<Utc>,
}

/// Conflict detection policy applied by [`MemoryLakehouse::merge`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// Re-apply appended rows on top of the target's current head.
    /// Conflicts only when a touched table was recreated or reshaped.
    #[default]
    Rebase,
    /// Any advance of the target since the fork is a conflict.
    FastForwardOnly,
}

/// Lakehouse operations, used for fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LakehouseOp {
    CreateBranch,
    DeleteBranch,
    ListBranches,
    TableExists,
    TableSchema,
    CreateTable,
    Append,
    Scan,
    Merge,
}

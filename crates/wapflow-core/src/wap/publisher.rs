//! Publisher that merges staging branches into main.

use super::contracts::Publisher;
use crate::error::{CleanupError, LakehouseError, PublishError};
use crate::lakehouse::Lakehouse;
use crate::model::{BranchName, CommitRef, StagingHandle};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// [`Publisher`] backed by lakehouse branch merges.
pub struct BranchPublisher {
    lakehouse: Arc<dyn Lakehouse>,
    main_branch: BranchName,
}

impl BranchPublisher {
    /// Create a publisher merging into `main_branch`.
    pub fn new(lakehouse: Arc<dyn Lakehouse>, main_branch: BranchName) -> Self {
        Self {
            lakehouse,
            main_branch,
        }
    }
}

#[async_trait]
impl Publisher for BranchPublisher {
    async fn publish(&self, handle: &StagingHandle) -> Result<CommitRef> {
        let branch = &handle.branch;
        let merged = self
            .lakehouse
            .merge(branch, &self.main_branch)
            .await
            .map_err(|source| match source {
                LakehouseError::MergeConflict { reason, .. } => PublishError::Conflict {
                    branch: branch.to_string(),
                    reason,
                },
                source => PublishError::Merge {
                    branch: branch.to_string(),
                    source,
                },
            })?;

        let row_count = self
            .lakehouse
            .row_count(&self.main_branch, &handle.destination)
            .await
            .map_err(|source| PublishError::ReadBack {
                branch: self.main_branch.to_string(),
                table: handle.destination.to_string(),
                source,
            })?;

        info!(
            run_id = %handle.run_id,
            branch = %branch,
            onto = %self.main_branch,
            commit = %merged.commit_id,
            row_count = row_count,
            "Merged staging branch"
        );

        Ok(CommitRef {
            commit_id: merged.commit_id,
            branch: self.main_branch.clone(),
            table: handle.destination.clone(),
            row_count,
            merged_at: merged.merged_at,
        })
    }

    async fn discard(&self, handle: &StagingHandle) -> Result<()> {
        let branch = &handle.branch;
        if *branch == self.main_branch {
            return Err(CleanupError::ProtectedBranch(branch.to_string()).into());
        }

        let deleted = self
            .lakehouse
            .delete_branch(branch)
            .await
            .map_err(|e| CleanupError::Discard {
                branch: branch.to_string(),
                message: e.to_string(),
            })?;

        if deleted {
            info!(run_id = %handle.run_id, branch = %branch, "Deleting branch");
        } else {
            debug!(branch = %branch, "Branch does not exist, nothing to delete");
        }
        Ok(())
    }
}

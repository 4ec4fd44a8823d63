//! Staging writer that imports a batch into a fresh lakehouse branch.

use super::contracts::StagingWriter;
use super::guard::StagingGuard;
use super::publisher::BranchPublisher;
use crate::error::StagingError;
use crate::lakehouse::Lakehouse;
use crate::model::{Batch, BranchName, StagingHandle};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How batch columns must relate to the destination table's columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaPolicy {
    /// Batch columns must equal the table columns
    Strict,
    /// Batch columns must be a subset of the table columns
    #[default]
    Subset,
}

impl SchemaPolicy {
    /// Check batch columns against table columns.
    pub fn check(
        self,
        batch: &BTreeSet<String>,
        table: &[String],
    ) -> std::result::Result<(), String> {
        let table: BTreeSet<&String> = table.iter().collect();
        let unknown: Vec<&str> = batch
            .iter()
            .filter(|c| !table.contains(c))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(format!("unknown columns: {}", unknown.join(", ")));
        }

        if self == SchemaPolicy::Strict {
            let missing: Vec<&str> = table
                .iter()
                .filter(|c| !batch.contains(c.as_str()))
                .map(|c| c.as_str())
                .collect();
            if !missing.is_empty() {
                return Err(format!("missing columns: {}", missing.join(", ")));
            }
        }

        Ok(())
    }
}

/// Import plan computed against the main branch before any branch exists.
#[derive(Debug)]
struct ImportPlan {
    /// Columns for a table that must be created on the branch
    create_columns: Option<Vec<String>>,
}

/// [`StagingWriter`] that branches off main and appends the batch there.
pub struct BranchStagingWriter {
    lakehouse: Arc<dyn Lakehouse>,
    main_branch: BranchName,
    schema_policy: SchemaPolicy,
    auto_create_table: bool,
}

impl BranchStagingWriter {
    /// Create a writer staging off `main_branch`.
    pub fn new(lakehouse: Arc<dyn Lakehouse>, main_branch: BranchName) -> Self {
        Self {
            lakehouse,
            main_branch,
            schema_policy: SchemaPolicy::default(),
            auto_create_table: false,
        }
    }

    /// Set the schema compatibility policy.
    pub fn with_schema_policy(mut self, policy: SchemaPolicy) -> Self {
        self.schema_policy = policy;
        self
    }

    /// Create a missing destination table from the batch columns.
    pub fn with_auto_create_table(mut self, enabled: bool) -> Self {
        self.auto_create_table = enabled;
        self
    }

    async fn plan(&self, reservation: &StagingHandle, batch: &Batch) -> Result<ImportPlan> {
        let table = &reservation.destination;
        let plan_err = |source| StagingError::Plan {
            table: table.to_string(),
            source,
        };

        let columns = batch.columns();
        let exists = self
            .lakehouse
            .table_exists(&self.main_branch, table)
            .await
            .map_err(plan_err)?;

        if !exists {
            if !self.auto_create_table {
                return Err(StagingError::TableNotFound(table.to_string()).into());
            }
            debug!(
                table = %table,
                columns = ?columns,
                "Destination missing, will create on branch"
            );
            return Ok(ImportPlan {
                create_columns: Some(columns.into_iter().collect()),
            });
        }

        let schema = self
            .lakehouse
            .table_schema(&self.main_branch, table)
            .await
            .map_err(plan_err)?;
        self.schema_policy
            .check(&columns, &schema)
            .map_err(|reason| StagingError::SchemaIncompatible {
                table: table.to_string(),
                reason,
            })?;

        Ok(ImportPlan {
            create_columns: None,
        })
    }

    async fn write(
        &self,
        reservation: &StagingHandle,
        batch: &Batch,
        plan: ImportPlan,
    ) -> std::result::Result<String, crate::error::LakehouseError> {
        let branch = &reservation.branch;
        let table = &reservation.destination;

        if let Some(columns) = plan.create_columns {
            self.lakehouse.create_table(branch, table, &columns).await?;
        }
        self.lakehouse.append(branch, table, batch.rows()).await
    }
}

#[async_trait]
impl StagingWriter for BranchStagingWriter {
    async fn stage(&self, reservation: &StagingHandle, batch: &Batch) -> Result<StagingHandle> {
        if batch.is_empty() {
            return Err(StagingError::EmptyBatch.into());
        }
        if reservation.branch == self.main_branch {
            return Err(StagingError::ProtectedBranch(reservation.branch.to_string()).into());
        }

        let plan = self.plan(reservation, batch).await?;

        let branch = &reservation.branch;
        self.lakehouse
            .create_branch(branch, &self.main_branch)
            .await
            .map_err(|source| StagingError::BranchCreation {
                branch: branch.to_string(),
                source,
            })?;
        debug!(branch = %branch, from = %self.main_branch, "Created staging branch");

        // The branch is ours from here on; dropping this future mid-write
        // discards it.
        let publisher =
            BranchPublisher::new(Arc::clone(&self.lakehouse), self.main_branch.clone());
        let created = StagingGuard::new(Arc::new(publisher), reservation.clone());

        let commit = match self.write(reservation, batch, plan).await {
            Ok(commit) => {
                created.disarm();
                commit
            }
            Err(source) => {
                if let Err(e) = created.release().await {
                    warn!(
                        branch = %branch,
                        error = %e,
                        "Failed to delete branch after staging failure"
                    );
                }
                return Err(StagingError::Write {
                    branch: branch.to_string(),
                    source,
                }
                .into());
            }
        };

        info!(
            run_id = %reservation.run_id,
            branch = %branch,
            table = %reservation.destination,
            rows = batch.len(),
            commit = %commit,
            "Batch staged"
        );

        Ok(StagingHandle {
            base_commit: Some(commit),
            rows_written: batch.len(),
            ..reservation.clone()
        })
    }
}

//! Auditor that scans the staging branch and evaluates quality checks.

use super::checks::{evaluate_all, QualityCheck, Verdict};
use crate::error::AuditExecutionError;
use crate::lakehouse::Lakehouse;
use crate::model::StagingHandle;
use crate::wap::Auditor;
use crate::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// [`Auditor`] backed by a lakehouse scan of the staging branch.
///
/// Only the columns the checks reference are read.
pub struct CheckAuditor {
    lakehouse: Arc<dyn Lakehouse>,
}

impl CheckAuditor {
    /// Create a new auditor.
    pub fn new(lakehouse: Arc<dyn Lakehouse>) -> Self {
        Self { lakehouse }
    }
}

#[async_trait]
impl Auditor for CheckAuditor {
    async fn audit(&self, handle: &StagingHandle, checks: &[QualityCheck]) -> Result<Verdict> {
        if checks.is_empty() {
            return Err(AuditExecutionError::NoChecks.into());
        }

        let columns: Vec<String> = checks
            .iter()
            .filter_map(|c| c.column().map(str::to_string))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        debug!(
            branch = %handle.branch,
            table = %handle.destination,
            columns = ?columns,
            "Performing columnar scan for audit"
        );

        let rows = self
            .lakehouse
            .scan(&handle.branch, &handle.destination, Some(&columns))
            .await
            .map_err(|source| AuditExecutionError::Scan {
                branch: handle.branch.to_string(),
                table: handle.destination.to_string(),
                source,
            })?;

        let verdict = evaluate_all(checks, &rows);

        info!(
            run_id = %handle.run_id,
            branch = %handle.branch,
            status = %verdict.status,
            rows_scanned = verdict.rows_scanned,
            failed_checks = verdict.failed_checks().count(),
            "Quality checks evaluated"
        );

        Ok(verdict)
    }
}

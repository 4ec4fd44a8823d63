//! CLI command implementations.

pub mod branches;
pub mod inspect;
pub mod run;
pub mod sweep;

use anyhow::{Context, Result};
use std::sync::Arc;
use wapflow_core::journal::RunJournal;
use wapflow_core::lakehouse::MemoryLakehouse;
use wapflow_core::Config;

/// Open the warehouse named by the configuration.
pub(crate) fn open_lakehouse(config: &Config) -> Result<Arc<MemoryLakehouse>> {
    let lakehouse = MemoryLakehouse::open_dir(
        &config.lakehouse.warehouse_dir,
        config.lakehouse.main_branch.clone(),
    )
    .with_context(|| {
        format!(
            "Failed to open warehouse {}",
            config.lakehouse.warehouse_dir.display()
        )
    })?
    .with_merge_mode(config.lakehouse.merge_mode);
    Ok(Arc::new(lakehouse))
}

/// Open the run journal, if enabled.
pub(crate) fn open_journal(config: &Config) -> Result<Option<Arc<RunJournal>>> {
    if !config.journal.enabled {
        return Ok(None);
    }
    let journal = RunJournal::open(config.journal.dir.clone()).with_context(|| {
        format!(
            "Failed to open run journal {}",
            config.journal.dir.display()
        )
    })?;
    Ok(Some(Arc::new(journal)))
}

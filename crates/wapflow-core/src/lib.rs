//! wapflow core - Write-Audit-Publish ingestion for branch-capable lakehouses
//!
//! This library stages each batch on an isolated lakehouse branch, audits it
//! with data quality checks and only then merges it into the main branch:
//!
//! - Destination tables never observe unaudited or partial data
//! - Staging branches are discarded on every exit path
//! - Run journal for recovering branches leaked by crashes

pub mod audit;
pub mod config;
pub mod error;
pub mod journal;
pub mod lakehouse;
pub mod model;
pub mod source;
pub mod wap;

// Re-export commonly used types
pub use config::Config;
pub use error::{
    AuditExecutionError, CleanupError, JournalError, LakehouseError, PublishError, StagingError,
};
pub use error::{Error, Result};
pub use model::{Batch, BranchName, CommitRef, Row, StagingHandle, TableName};
pub use wap::{Outcome, RunError, RunReport, RunRequest, WapCoordinator, WapCoordinatorBuilder};

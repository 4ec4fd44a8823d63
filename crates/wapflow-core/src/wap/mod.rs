//! Write-Audit-Publish coordination.
//!
//! - [`StagingWriter`], [`Auditor`] and [`Publisher`] collaborator contracts
//! - Lakehouse-backed adapters for each role
//! - [`WapCoordinator`] state machine with guaranteed staging cleanup

mod contracts;
mod coordinator;
mod guard;
mod outcome;
mod publisher;
mod staging;
mod state;

pub use contracts::{Auditor, Publisher, StagingWriter};
pub use coordinator::{
    CoordinatorConfig, RunRequest, RunStats, WapCoordinator, WapCoordinatorBuilder,
};
pub use guard::StagingGuard;
pub use outcome::{Outcome, Rejection, RunError, RunReport};
pub use publisher::BranchPublisher;
pub use staging::{BranchStagingWriter, SchemaPolicy};
pub use state::{Run, RunState, Transition};

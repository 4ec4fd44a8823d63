//! Collaborator contracts the coordinator composes.
//!
//! Each role knows nothing about the others: the staging writer only writes,
//! the auditor only reads, and the publisher only merges or discards.

use crate::audit::{QualityCheck, Verdict};
use crate::model::{Batch, CommitRef, StagingHandle};
use crate::Result;
use async_trait::async_trait;

/// Writes a batch into an isolated staging area.
#[async_trait]
pub trait StagingWriter: Send + Sync {
    /// Create the staging area reserved by `reservation` and write `batch`.
    ///
    /// On success the returned handle denotes fully written, isolated data.
    /// On failure nothing is reachable through the reservation.
    async fn stage(&self, reservation: &StagingHandle, batch: &Batch) -> Result<StagingHandle>;
}

/// Runs quality checks against staged data.
#[async_trait]
pub trait Auditor: Send + Sync {
    /// Evaluate `checks` against the staged table.
    ///
    /// Must not mutate anything. A failing check is an `Ok` FAIL verdict;
    /// only an inability to evaluate is an `Err`.
    async fn audit(&self, handle: &StagingHandle, checks: &[QualityCheck]) -> Result<Verdict>;
}

/// Makes staged data visible, or throws it away.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Atomically merge the staging area into the destination.
    async fn publish(&self, handle: &StagingHandle) -> Result<CommitRef>;

    /// Delete the staging area. Discarding an absent area is a no-op.
    async fn discard(&self, handle: &StagingHandle) -> Result<()>;
}

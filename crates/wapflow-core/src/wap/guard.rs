//! Scoped ownership of a run's staging area.
//!
//! A [`StagingGuard`] is created as soon as a run has reserved its branch and
//! lives until the branch has been discarded. Normal exit paths call
//! [`StagingGuard::release`]; if the owning future is dropped instead (the
//! host cancelled the run) the guard schedules the discard on the current
//! Tokio runtime.
//!
//! A guard only discards a branch it owns. Generated branch names are owned
//! from the start; a caller-named branch may already exist, so its guard
//! starts unarmed and is armed once staging succeeds.

use super::contracts::Publisher;
use crate::error::{CleanupError, Error};
use crate::model::StagingHandle;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Owns a staging area until it is discarded.
pub struct StagingGuard {
    publisher: Arc<dyn Publisher>,
    handle: StagingHandle,
    armed: bool,
}

impl StagingGuard {
    /// Take ownership of a reserved (or already staged) area.
    pub fn new(publisher: Arc<dyn Publisher>, handle: StagingHandle) -> Self {
        Self {
            publisher,
            handle,
            armed: true,
        }
    }

    /// Reserve a branch the run does not own yet.
    ///
    /// Nothing is discarded until [`StagingGuard::update`] arms the guard.
    pub fn reserved(publisher: Arc<dyn Publisher>, handle: StagingHandle) -> Self {
        Self {
            publisher,
            handle,
            armed: false,
        }
    }

    /// Whether releasing or dropping the guard discards the branch.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// The guarded staging area.
    pub fn handle(&self) -> &StagingHandle {
        &self.handle
    }

    /// Replace the reservation with the handle returned by staging.
    ///
    /// The branch now holds the run's data, so the guard is armed.
    pub fn update(&mut self, handle: StagingHandle) {
        self.handle = handle;
        self.armed = true;
    }

    /// Discard the staging area and disarm the guard.
    ///
    /// If this future is itself dropped before the discard finishes, the
    /// guard stays armed and `Drop` retries the discard.
    pub async fn release(mut self) -> Result<(), CleanupError> {
        if !self.armed {
            debug!(
                branch = %self.handle.branch,
                "Branch not owned by the run, nothing to discard"
            );
            return Ok(());
        }
        let result = self.publisher.discard(&self.handle).await;
        self.armed = false;
        result.map_err(|e| into_cleanup_error(&self.handle, e))
    }

    /// Give up ownership without discarding, e.g. when the branch belongs to
    /// someone else.
    pub fn disarm(mut self) -> StagingHandle {
        self.armed = false;
        self.handle.clone()
    }
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let publisher = Arc::clone(&self.publisher);
        let handle = self.handle.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!(
                    run_id = %handle.run_id,
                    branch = %handle.branch,
                    "Run dropped before cleanup, discarding staging branch in background"
                );
                runtime.spawn(async move {
                    if let Err(e) = publisher.discard(&handle).await {
                        warn!(
                            run_id = %handle.run_id,
                            branch = %handle.branch,
                            error = %e,
                            "Background discard of staging branch failed"
                        );
                    }
                });
            }
            Err(_) => {
                error!(
                    run_id = %handle.run_id,
                    branch = %handle.branch,
                    "No runtime available to discard staging branch, branch leaked"
                );
            }
        }
    }
}

fn into_cleanup_error(handle: &StagingHandle, err: Error) -> CleanupError {
    match err {
        Error::Cleanup(cleanup) => cleanup,
        other => CleanupError::Discard {
            branch: handle.branch.to_string(),
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BranchName, CommitRef, TableName};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingPublisher {
        discarded: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(&self, _handle: &StagingHandle) -> crate::Result<CommitRef> {
            unreachable!("guard never publishes")
        }

        async fn discard(&self, handle: &StagingHandle) -> crate::Result<()> {
            if self.fail {
                return Err(Error::Io(std::io::Error::other("disk gone")));
            }
            self.discarded.lock().push(handle.branch.to_string());
            Ok(())
        }
    }

    fn handle() -> StagingHandle {
        StagingHandle::reserve(
            "run-1",
            TableName::new("orders").unwrap(),
            BranchName::new("wap_run-1").unwrap(),
        )
    }

    #[tokio::test]
    async fn test_release_discards_once() {
        let publisher = Arc::new(RecordingPublisher::default());
        let guard = StagingGuard::new(publisher.clone(), handle());

        guard.release().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(*publisher.discarded.lock(), vec!["wap_run-1".to_string()]);
    }

    #[tokio::test]
    async fn test_release_maps_failure_to_cleanup_error() {
        let publisher = Arc::new(RecordingPublisher {
            fail: true,
            ..Default::default()
        });
        let guard = StagingGuard::new(publisher, handle());

        let err = guard.release().await.unwrap_err();
        assert!(matches!(err, CleanupError::Discard { ref branch, .. } if branch == "wap_run-1"));
    }

    #[tokio::test]
    async fn test_drop_discards_in_background() {
        let publisher = Arc::new(RecordingPublisher::default());
        drop(StagingGuard::new(publisher.clone(), handle()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(publisher.discarded.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_reserved_guard_never_discards() {
        let publisher = Arc::new(RecordingPublisher::default());
        let guard = StagingGuard::reserved(publisher.clone(), handle());
        assert!(!guard.is_armed());
        guard.release().await.unwrap();

        drop(StagingGuard::reserved(publisher.clone(), handle()));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(publisher.discarded.lock().is_empty());
    }

    #[tokio::test]
    async fn test_update_arms_reserved_guard() {
        let publisher = Arc::new(RecordingPublisher::default());
        let mut guard = StagingGuard::reserved(publisher.clone(), handle());
        guard.update(handle());
        assert!(guard.is_armed());

        guard.release().await.unwrap();
        assert_eq!(publisher.discarded.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_disarm_skips_discard() {
        let publisher = Arc::new(RecordingPublisher::default());
        let handle = StagingGuard::new(publisher.clone(), handle()).disarm();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.run_id, "run-1");
        assert!(publisher.discarded.lock().is_empty());
    }
}

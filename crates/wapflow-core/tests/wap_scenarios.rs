//! End-to-end Write-Audit-Publish runs against the in-process lakehouse.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wapflow_core::audit::{CheckAuditor, QualityCheck, Verdict};
use wapflow_core::lakehouse::{Lakehouse, LakehouseOp, MemoryLakehouse, MergeMode};
use wapflow_core::wap::{
    Auditor, BranchPublisher, Outcome, Publisher, RunRequest, RunState, WapCoordinator,
    WapCoordinatorBuilder,
};
use wapflow_core::{
    AuditExecutionError, Batch, BranchName, CommitRef, Error, PublishError, Row, StagingError,
    StagingHandle, TableName,
};

fn orders_table() -> TableName {
    TableName::new("orders").unwrap()
}

fn order(id: Value) -> Row {
    let mut row = Row::new();
    row.insert("order_id".into(), id);
    row.insert("amount".into(), json!(25));
    row
}

fn orders(range: std::ops::Range<i64>) -> Vec<Row> {
    range.map(|i| order(json!(i))).collect()
}

fn not_null_order_id() -> Vec<QualityCheck> {
    vec![QualityCheck::not_null("order_id")]
}

/// Lakehouse with an `orders` table of `count` rows on main.
fn seeded(count: i64) -> Arc<MemoryLakehouse> {
    let lakehouse = Arc::new(MemoryLakehouse::new());
    lakehouse.seed_table(&orders_table(), orders(0..count)).unwrap();
    lakehouse
}

fn fingerprint(lakehouse: &MemoryLakehouse) -> u32 {
    lakehouse
        .fingerprint(&BranchName::main(), &orders_table())
        .unwrap()
}

async fn main_rows(lakehouse: &MemoryLakehouse) -> usize {
    lakehouse
        .row_count(&BranchName::main(), &orders_table())
        .await
        .unwrap()
}

/// Names of every branch except main.
async fn staging_branches(lakehouse: &MemoryLakehouse) -> Vec<String> {
    lakehouse
        .list_branches()
        .await
        .unwrap()
        .into_iter()
        .map(|b| b.name.to_string())
        .filter(|name| name != "main")
        .collect()
}

fn coordinator(lakehouse: &Arc<MemoryLakehouse>) -> WapCoordinator {
    WapCoordinatorBuilder::new()
        .lakehouse(lakehouse.clone())
        .build()
        .unwrap()
}

/// Auditor that never finishes on its own.
struct StuckAuditor;

#[async_trait]
impl Auditor for StuckAuditor {
    async fn audit(
        &self,
        _handle: &StagingHandle,
        _checks: &[QualityCheck],
    ) -> wapflow_core::Result<Verdict> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Verdict::from_diagnostics(Vec::new(), 0))
    }
}

/// Auditor that lets another writer publish to main while it audits.
struct RacingAuditor {
    inner: CheckAuditor,
    lakehouse: Arc<MemoryLakehouse>,
}

#[async_trait]
impl Auditor for RacingAuditor {
    async fn audit(
        &self,
        handle: &StagingHandle,
        checks: &[QualityCheck],
    ) -> wapflow_core::Result<Verdict> {
        self.lakehouse
            .seed_table(&orders_table(), orders(1000..1001))
            .unwrap();
        self.inner.audit(handle, checks).await
    }
}

/// Publisher whose first `failures` discards fail.
struct FlakyDiscardPublisher {
    inner: BranchPublisher,
    failures: AtomicUsize,
}

#[async_trait]
impl Publisher for FlakyDiscardPublisher {
    async fn publish(&self, handle: &StagingHandle) -> wapflow_core::Result<CommitRef> {
        self.inner.publish(handle).await
    }

    async fn discard(&self, handle: &StagingHandle) -> wapflow_core::Result<()> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Io(std::io::Error::other("delete request timed out")));
        }
        self.inner.discard(handle).await
    }
}

mod properties {
    use super::*;

    /// 100 rows + 10 valid rows = 110 rows, published exactly once.
    #[tokio::test]
    async fn test_valid_batch_is_published() {
        let lakehouse = seeded(100);
        let coordinator = coordinator(&lakehouse);

        let outcome = coordinator
            .run_wap(
                orders_table(),
                Batch::new(orders(100..110)),
                not_null_order_id(),
            )
            .await;

        let commit = outcome.into_result().unwrap();
        assert!(!commit.commit_id.is_empty());
        assert_eq!(commit.row_count, 110);
        assert_eq!(main_rows(&lakehouse).await, 110);

        let ids: std::collections::BTreeSet<i64> = lakehouse
            .scan(&BranchName::main(), &orders_table(), None)
            .await
            .unwrap()
            .iter()
            .map(|row| row["order_id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, (0..110).collect());
        assert!(staging_branches(&lakehouse).await.is_empty());
    }

    /// 3 null order ids: rejected, table untouched, 3 violating rows reported.
    #[tokio::test]
    async fn test_batch_with_nulls_is_rejected() {
        let lakehouse = seeded(100);
        let before = fingerprint(&lakehouse);
        let coordinator = coordinator(&lakehouse);

        let mut batch = orders(100..107);
        batch.extend((0..3).map(|_| order(Value::Null)));

        let report = coordinator
            .run(RunRequest::new(
                orders_table(),
                Batch::new(batch),
                not_null_order_id(),
            ))
            .await;

        let Outcome::Rejected(rejection) = report.outcome else {
            panic!("expected a rejection");
        };
        let failed: Vec<_> = rejection.failed_checks().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].check, "not_null(order_id)");
        assert_eq!(failed[0].violating_rows, 3);
        assert!(rejection.cleanup_error.is_none());

        let path: Vec<_> = report.transitions.iter().map(|t| t.to).collect();
        assert_eq!(
            path,
            vec![RunState::Staged, RunState::Audited, RunState::Rejected]
        );
        assert_eq!(main_rows(&lakehouse).await, 100);
        assert_eq!(fingerprint(&lakehouse), before);
        assert!(staging_branches(&lakehouse).await.is_empty());
    }

    /// Connectivity lost mid-write: aborted, table untouched, no branch left.
    #[tokio::test]
    async fn test_write_failure_aborts() {
        let lakehouse = seeded(100);
        let before = fingerprint(&lakehouse);
        lakehouse.fail_after_rows(4);
        let coordinator = coordinator(&lakehouse);

        let outcome = coordinator
            .run_wap(
                orders_table(),
                Batch::new(orders(100..110)),
                not_null_order_id(),
            )
            .await;

        let err = outcome.into_result().unwrap_err();
        assert_eq!(err.state, RunState::Init);
        assert!(matches!(
            err.source,
            Error::Staging(StagingError::Write { .. })
        ));
        assert!(err.cleanup_error.is_none());
        assert_eq!(fingerprint(&lakehouse), before);
        assert!(staging_branches(&lakehouse).await.is_empty());
    }

    /// Discard stays a no-op after every terminal state.
    #[tokio::test]
    async fn test_discard_twice_after_terminal_states() {
        let lakehouse = seeded(10);
        let coordinator = coordinator(&lakehouse);
        let publisher = BranchPublisher::new(lakehouse.clone(), BranchName::main());

        let mut bad = orders(10..12);
        bad.push(order(Value::Null));
        let batches = vec![orders(10..12), bad];

        for rows in batches {
            let report = coordinator
                .run(RunRequest::new(
                    orders_table(),
                    Batch::new(rows),
                    not_null_order_id(),
                ))
                .await;
            let branch = report.branch.clone().unwrap();
            let handle = StagingHandle::reserve(report.run_id.clone(), orders_table(), branch);

            assert!(!lakehouse.branch_exists(&handle.branch).await.unwrap());
            publisher.discard(&handle).await.unwrap();
            publisher.discard(&handle).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_empty_batch_aborts_in_init() {
        let lakehouse = seeded(10);
        let coordinator = coordinator(&lakehouse);

        let outcome = coordinator
            .run_wap(orders_table(), Batch::new(Vec::new()), not_null_order_id())
            .await;

        let Outcome::Aborted(err) = outcome else {
            panic!("expected an abort");
        };
        assert_eq!(err.state, RunState::Init);
        assert!(matches!(
            err.source,
            Error::Staging(StagingError::EmptyBatch)
        ));
    }
}

mod failures {
    use super::*;

    #[tokio::test]
    async fn test_audit_scan_failure_aborts_in_staged() {
        let lakehouse = seeded(100);
        let before = fingerprint(&lakehouse);
        lakehouse.fail_next(LakehouseOp::Scan, "object store unreachable");
        let coordinator = coordinator(&lakehouse);

        let report = coordinator
            .run(RunRequest::new(
                orders_table(),
                Batch::new(orders(100..110)),
                not_null_order_id(),
            ))
            .await;

        let Outcome::Aborted(err) = report.outcome else {
            panic!("expected an abort");
        };
        assert_eq!(err.state, RunState::Staged);
        assert!(matches!(
            err.source,
            Error::AuditExecution(AuditExecutionError::Scan { .. })
        ));
        assert_eq!(
            report.transitions.last().map(|t| t.to),
            Some(RunState::Aborted)
        );
        assert_eq!(fingerprint(&lakehouse), before);
        assert!(staging_branches(&lakehouse).await.is_empty());
    }

    #[tokio::test]
    async fn test_merge_conflict_is_publish_error() {
        let lakehouse =
            Arc::new(MemoryLakehouse::new().with_merge_mode(MergeMode::FastForwardOnly));
        lakehouse.seed_table(&orders_table(), orders(0..100)).unwrap();
        let coordinator = WapCoordinatorBuilder::new()
            .lakehouse(lakehouse.clone())
            .auditor(Arc::new(RacingAuditor {
                inner: CheckAuditor::new(lakehouse.clone()),
                lakehouse: lakehouse.clone(),
            }))
            .build()
            .unwrap();

        let outcome = coordinator
            .run_wap(
                orders_table(),
                Batch::new(orders(100..110)),
                not_null_order_id(),
            )
            .await;

        let err = outcome.into_result().unwrap_err();
        assert_eq!(err.state, RunState::Audited);
        assert!(matches!(
            err.source,
            Error::Publish(PublishError::Conflict { .. })
        ));
        // Only the concurrent writer's row landed.
        assert_eq!(main_rows(&lakehouse).await, 101);
        assert!(staging_branches(&lakehouse).await.is_empty());
    }

    #[tokio::test]
    async fn test_rebase_merge_keeps_concurrent_write() {
        let lakehouse = seeded(100);
        let coordinator = WapCoordinatorBuilder::new()
            .lakehouse(lakehouse.clone())
            .auditor(Arc::new(RacingAuditor {
                inner: CheckAuditor::new(lakehouse.clone()),
                lakehouse: lakehouse.clone(),
            }))
            .build()
            .unwrap();

        let outcome = coordinator
            .run_wap(
                orders_table(),
                Batch::new(orders(100..110)),
                not_null_order_id(),
            )
            .await;

        assert!(outcome.is_published());
        assert_eq!(main_rows(&lakehouse).await, 111);
    }

    #[tokio::test]
    async fn test_merge_failure_leaves_table_unchanged() {
        let lakehouse = seeded(100);
        let before = fingerprint(&lakehouse);
        lakehouse.fail_next(LakehouseOp::Merge, "connection reset");
        let coordinator = coordinator(&lakehouse);

        let outcome = coordinator
            .run_wap(
                orders_table(),
                Batch::new(orders(100..110)),
                not_null_order_id(),
            )
            .await;

        let err = outcome.into_result().unwrap_err();
        assert!(matches!(
            err.source,
            Error::Publish(PublishError::Merge { .. })
        ));
        assert_eq!(fingerprint(&lakehouse), before);
        assert!(staging_branches(&lakehouse).await.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_failure_does_not_mask_rejection() {
        let lakehouse = seeded(10);
        let coordinator = WapCoordinatorBuilder::new()
            .lakehouse(lakehouse.clone())
            .publisher(Arc::new(FlakyDiscardPublisher {
                inner: BranchPublisher::new(lakehouse.clone(), BranchName::main()),
                failures: AtomicUsize::new(1),
            }))
            .build()
            .unwrap();

        let report = coordinator
            .run(RunRequest::new(
                orders_table(),
                Batch::new(vec![order(Value::Null)]),
                not_null_order_id(),
            ))
            .await;

        let Outcome::Rejected(rejection) = &report.outcome else {
            panic!("expected a rejection");
        };
        assert!(rejection.cleanup_error.is_some());
        assert!(report.cleanup_error.is_some());
        assert_eq!(
            coordinator.stats().cleanup_failures.load(Ordering::Relaxed),
            1
        );
        // The branch leaked, main is untouched.
        assert_eq!(staging_branches(&lakehouse).await.len(), 1);
        assert_eq!(main_rows(&lakehouse).await, 10);
    }

    #[tokio::test]
    async fn test_cleanup_failure_after_merge_failure_keeps_cause() {
        let lakehouse = seeded(10);
        lakehouse.fail_next(LakehouseOp::Merge, "connection reset");
        let coordinator = WapCoordinatorBuilder::new()
            .lakehouse(lakehouse.clone())
            .publisher(Arc::new(FlakyDiscardPublisher {
                inner: BranchPublisher::new(lakehouse.clone(), BranchName::main()),
                failures: AtomicUsize::new(1),
            }))
            .build()
            .unwrap();

        let report = coordinator
            .run(RunRequest::new(
                orders_table(),
                Batch::new(orders(10..15)),
                not_null_order_id(),
            ))
            .await;

        assert!(report.cleanup_error.is_some());
        let Outcome::Aborted(err) = report.outcome else {
            panic!("expected an abort");
        };
        assert_eq!(err.state, RunState::Audited);
        assert!(matches!(
            err.source,
            Error::Publish(PublishError::Merge { .. })
        ));
        assert!(err.cleanup_error.is_some());
        assert_eq!(
            coordinator.stats().cleanup_failures.load(Ordering::Relaxed),
            1
        );
        assert_eq!(staging_branches(&lakehouse).await.len(), 1);
        assert_eq!(main_rows(&lakehouse).await, 10);
    }

    #[tokio::test]
    async fn test_cleanup_failure_after_publish_keeps_published() {
        let lakehouse = seeded(10);
        let coordinator = WapCoordinatorBuilder::new()
            .lakehouse(lakehouse.clone())
            .publisher(Arc::new(FlakyDiscardPublisher {
                inner: BranchPublisher::new(lakehouse.clone(), BranchName::main()),
                failures: AtomicUsize::new(1),
            }))
            .build()
            .unwrap();

        let report = coordinator
            .run(RunRequest::new(
                orders_table(),
                Batch::new(orders(10..15)),
                not_null_order_id(),
            ))
            .await;

        assert_eq!(report.state(), RunState::Published);
        assert!(report.cleanup_error.is_some());
        assert_eq!(main_rows(&lakehouse).await, 15);
    }
}

mod cancellation {
    use super::*;
    use tokio::sync::broadcast;

    fn stuck_coordinator(lakehouse: &Arc<MemoryLakehouse>) -> WapCoordinator {
        WapCoordinatorBuilder::new()
            .lakehouse(lakehouse.clone())
            .auditor(Arc::new(StuckAuditor))
            .audit_timeout(Duration::from_secs(7200))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_audit_timeout_aborts() {
        let lakehouse = seeded(100);
        let before = fingerprint(&lakehouse);
        let coordinator = WapCoordinatorBuilder::new()
            .lakehouse(lakehouse.clone())
            .auditor(Arc::new(StuckAuditor))
            .audit_timeout(Duration::from_millis(50))
            .build()
            .unwrap();

        let outcome = coordinator
            .run_wap(
                orders_table(),
                Batch::new(orders(100..110)),
                not_null_order_id(),
            )
            .await;

        let err = outcome.into_result().unwrap_err();
        assert_eq!(err.state, RunState::Staged);
        assert!(matches!(err.source, Error::Timeout(_)));
        assert_eq!(fingerprint(&lakehouse), before);
        assert!(staging_branches(&lakehouse).await.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_audit() {
        let lakehouse = seeded(100);
        let before = fingerprint(&lakehouse);
        let coordinator = stuck_coordinator(&lakehouse);
        let (tx, rx) = broadcast::channel(1);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let _ = tx.send(());
        });

        let report = coordinator
            .run(
                RunRequest::new(
                    orders_table(),
                    Batch::new(orders(100..110)),
                    not_null_order_id(),
                )
                .cancel_on(rx),
            )
            .await;

        let Outcome::Aborted(err) = report.outcome else {
            panic!("expected an abort");
        };
        assert!(err.is_cancelled());
        assert_eq!(err.state, RunState::Staged);
        assert_eq!(fingerprint(&lakehouse), before);
        assert!(staging_branches(&lakehouse).await.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_staging() {
        let lakehouse = seeded(100);
        let before = fingerprint(&lakehouse);
        lakehouse.delay_next(LakehouseOp::Append, Duration::from_secs(60));
        let coordinator = coordinator(&lakehouse);
        let (tx, rx) = broadcast::channel(1);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let _ = tx.send(());
        });

        let report = tokio::time::timeout(
            Duration::from_secs(10),
            coordinator.run(
                RunRequest::new(
                    orders_table(),
                    Batch::new(orders(100..110)),
                    not_null_order_id(),
                )
                .cancel_on(rx),
            ),
        )
        .await
        .expect("cancellation must interrupt the write");

        assert!(report.transitions.iter().all(|t| t.to != RunState::Staged));
        let Outcome::Aborted(err) = report.outcome else {
            panic!("expected an abort");
        };
        assert!(err.is_cancelled());
        assert_eq!(err.state, RunState::Init);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(staging_branches(&lakehouse).await.is_empty());
        assert_eq!(fingerprint(&lakehouse), before);
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let lakehouse = seeded(10);
        let coordinator = coordinator(&lakehouse);
        let (tx, rx) = broadcast::channel(1);
        tx.send(()).unwrap();

        let outcome = coordinator
            .run(
                RunRequest::new(orders_table(), Batch::new(orders(10..12)), not_null_order_id())
                    .cancel_on(rx),
            )
            .await
            .outcome;

        let err = outcome.into_result().unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.state, RunState::Init);
        assert_eq!(main_rows(&lakehouse).await, 10);
        assert!(staging_branches(&lakehouse).await.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_run_discards_branch() {
        let lakehouse = seeded(100);
        let before = fingerprint(&lakehouse);
        let coordinator = Arc::new(stuck_coordinator(&lakehouse));

        let task = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .run_wap(
                        orders_table(),
                        Batch::new(orders(100..110)),
                        not_null_order_id(),
                    )
                    .await
            })
        };

        // Let the run reach the audit, with its branch staged.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(staging_branches(&lakehouse).await.len(), 1);

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(staging_branches(&lakehouse).await.is_empty());
        assert_eq!(fingerprint(&lakehouse), before);
    }
}

mod concurrency {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_runs_each_publish_once() {
        let lakehouse = seeded(100);
        let coordinator = Arc::new(coordinator(&lakehouse));

        let tasks: Vec<_> = (0..5)
            .map(|i| {
                let coordinator = coordinator.clone();
                let start = 100 + i * 10;
                tokio::spawn(async move {
                    coordinator
                        .run_wap(
                            orders_table(),
                            Batch::new(orders(start..start + 10)),
                            not_null_order_id(),
                        )
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().is_published());
        }

        assert_eq!(main_rows(&lakehouse).await, 150);
        assert!(staging_branches(&lakehouse).await.is_empty());
        assert_eq!(coordinator.stats().runs_published.load(Ordering::Relaxed), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_rejected_run_does_not_affect_concurrent_publish() {
        let lakehouse = seeded(100);
        let coordinator = Arc::new(coordinator(&lakehouse));

        let good = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .run_wap(
                        orders_table(),
                        Batch::new(orders(100..110)),
                        not_null_order_id(),
                    )
                    .await
            })
        };
        let bad = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .run_wap(
                        orders_table(),
                        Batch::new(vec![order(Value::Null)]),
                        not_null_order_id(),
                    )
                    .await
            })
        };

        assert!(good.await.unwrap().is_published());
        assert_eq!(bad.await.unwrap().label(), "rejected");
        assert_eq!(main_rows(&lakehouse).await, 110);
    }
}

mod recovery {
    use super::*;
    use wapflow_core::journal::{
        compact, sweep, JournalEntry, LeakReason, RecoveryState, RunJournal,
    };
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_runs_are_journaled() {
        let temp_dir = TempDir::new().unwrap();
        let journal = Arc::new(RunJournal::open(temp_dir.path()).unwrap());
        let lakehouse = seeded(10);
        let coordinator = WapCoordinatorBuilder::new()
            .lakehouse(lakehouse.clone())
            .journal(journal.clone())
            .build()
            .unwrap();

        let report = coordinator
            .run(RunRequest::new(
                orders_table(),
                Batch::new(orders(10..12)),
                not_null_order_id(),
            ))
            .await;
        assert_eq!(report.state(), RunState::Published);

        let entries = journal.read_all_entries().unwrap();
        assert!(matches!(entries.first(), Some(JournalEntry::RunStarted { .. })));
        let transitions = entries
            .iter()
            .filter(|e| matches!(e, JournalEntry::StateTransition { .. }))
            .count();
        assert_eq!(transitions, 3);
        match entries.last() {
            Some(JournalEntry::RunFinished {
                run_id,
                outcome,
                commit_id,
                ..
            }) => {
                assert_eq!(run_id, &report.run_id);
                assert_eq!(outcome, "published");
                assert!(commit_id.is_some());
            }
            other => panic!("unexpected last entry: {:?}", other),
        }

        let state = RecoveryState::recover_from(&journal).unwrap();
        assert!(!state.needs_cleanup());
    }

    #[tokio::test]
    async fn test_leaked_branch_is_swept() {
        let temp_dir = TempDir::new().unwrap();
        let journal = Arc::new(RunJournal::open(temp_dir.path()).unwrap());
        let lakehouse = seeded(10);
        let coordinator = WapCoordinatorBuilder::new()
            .lakehouse(lakehouse.clone())
            .publisher(Arc::new(FlakyDiscardPublisher {
                inner: BranchPublisher::new(lakehouse.clone(), BranchName::main()),
                failures: AtomicUsize::new(1),
            }))
            .journal(journal.clone())
            .build()
            .unwrap();

        let report = coordinator
            .run(RunRequest::new(
                orders_table(),
                Batch::new(vec![order(Value::Null)]),
                not_null_order_id(),
            ))
            .await;
        assert_eq!(report.state(), RunState::Rejected);
        assert_eq!(staging_branches(&lakehouse).await.len(), 1);

        let state = RecoveryState::recover_from(&journal).unwrap();
        assert_eq!(state.leaked_branches.len(), 1);
        assert_eq!(state.leaked_branches[0].reason, LeakReason::CleanupFailed);
        assert_eq!(Some(&state.leaked_branches[0].branch), report.branch.as_ref());

        let publisher = BranchPublisher::new(lakehouse.clone(), BranchName::main());
        let swept = sweep(&publisher, &journal).await.unwrap();
        assert_eq!(swept.swept.len(), 1);
        assert!(staging_branches(&lakehouse).await.is_empty());
        assert!(!RecoveryState::recover_from(&journal)
            .unwrap()
            .needs_cleanup());

        // Every run is settled, so compaction empties the journal.
        assert!(compact(&journal).unwrap() > 0);
        assert!(journal.read_all_entries().unwrap().is_empty());
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }
}

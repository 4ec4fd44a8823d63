//! Write-Audit-Publish coordinator.
//!
//! Sequences stage, audit and publish for one batch and guarantees that the
//! staging branch is discarded on every exit path. The coordinator holds no
//! locks: concurrent runs against the same table are isolated by their own
//! branches and serialized by the lakehouse's merge conflict detection.
//!
//! Collaborator errors are never retried here.

use super::contracts::{Auditor, Publisher, StagingWriter};
use super::guard::StagingGuard;
use super::outcome::{Outcome, Rejection, RunError, RunReport};
use super::publisher::BranchPublisher;
use super::staging::{BranchStagingWriter, SchemaPolicy};
use super::state::{Run, RunState};
use crate::audit::{CheckAuditor, QualityCheck, Verdict};
use crate::config::Config;
use crate::error::{CleanupError, StagingError};
use crate::journal::{JournalEntry, RunJournal};
use crate::lakehouse::Lakehouse;
use crate::model::{Batch, BranchName, CommitRef, StagingHandle, TableName};
use crate::{Error, Result};
use chrono::Utc;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Configuration for the WAP coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Branch that receives published data
    pub main_branch: BranchName,
    /// Prefix of generated staging branch names
    pub branch_prefix: String,
    /// Upper bound on the audit phase
    pub audit_timeout: Option<Duration>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            main_branch: BranchName::main(),
            branch_prefix: "wap_".to_string(),
            audit_timeout: None,
        }
    }
}

impl From<&Config> for CoordinatorConfig {
    fn from(config: &Config) -> Self {
        Self {
            main_branch: config.lakehouse.main_branch.clone(),
            branch_prefix: config.lakehouse.branch_prefix.clone(),
            audit_timeout: config.audit.timeout(),
        }
    }
}

/// Statistics for the coordinator.
#[derive(Debug, Default)]
pub struct RunStats {
    /// Runs started
    pub runs_started: AtomicU64,
    /// Runs that published
    pub runs_published: AtomicU64,
    /// Runs rejected by the audit
    pub runs_rejected: AtomicU64,
    /// Runs aborted on error or cancellation
    pub runs_aborted: AtomicU64,
    /// Staging branches that could not be discarded
    pub cleanup_failures: AtomicU64,
}

impl RunStats {
    /// Share of finished runs that published; `None` until a run finishes.
    pub fn publish_rate(&self) -> Option<f64> {
        let published = self.runs_published.load(Ordering::Relaxed);
        let finished = published
            + self.runs_rejected.load(Ordering::Relaxed)
            + self.runs_aborted.load(Ordering::Relaxed);
        (finished > 0).then(|| published as f64 / finished as f64)
    }
}

/// Input of a single run.
#[derive(Debug)]
pub struct RunRequest {
    pub destination: TableName,
    pub batch: Batch,
    pub checks: Vec<QualityCheck>,
    /// Staging branch name; generated from the run id when absent
    pub branch: Option<BranchName>,
    cancel: Option<broadcast::Receiver<()>>,
}

impl RunRequest {
    /// Create a request.
    pub fn new(destination: TableName, batch: Batch, checks: Vec<QualityCheck>) -> Self {
        Self {
            destination,
            batch,
            checks,
            branch: None,
            cancel: None,
        }
    }

    /// Stage on a caller-chosen branch.
    pub fn with_branch(mut self, branch: BranchName) -> Self {
        self.branch = Some(branch);
        self
    }

    /// Abort the run when a message arrives on `signal`.
    ///
    /// A closed channel never cancels.
    pub fn cancel_on(mut self, signal: broadcast::Receiver<()>) -> Self {
        self.cancel = Some(signal);
        self
    }
}

/// Host cancellation signal.
struct Cancellation(Option<broadcast::Receiver<()>>);

impl Cancellation {
    /// Resolves once a cancel message arrives; pending forever otherwise.
    async fn cancelled(&mut self) {
        if let Some(rx) = self.0.as_mut() {
            match rx.recv().await {
                Ok(()) | Err(RecvError::Lagged(_)) => return,
                Err(RecvError::Closed) => {}
            }
        }
        self.0 = None;
        std::future::pending::<()>().await
    }

    /// Non-blocking check.
    fn is_cancelled(&mut self) -> bool {
        match self.0.as_mut().map(|rx| rx.try_recv()) {
            Some(Ok(())) | Some(Err(TryRecvError::Lagged(_))) => true,
            Some(Err(TryRecvError::Empty)) | Some(Err(TryRecvError::Closed)) | None => false,
        }
    }

    /// Run `fut` unless cancellation wins the race.
    async fn guard<T>(&mut self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(Error::Cancelled),
            result = fut => result,
        }
    }
}

/// How the phases before cleanup ended.
enum Step {
    Published(CommitRef),
    Rejected(Verdict),
}

/// Write-Audit-Publish coordinator.
pub struct WapCoordinator {
    writer: Arc<dyn StagingWriter>,
    auditor: Arc<dyn Auditor>,
    publisher: Arc<dyn Publisher>,
    config: CoordinatorConfig,
    journal: Option<Arc<RunJournal>>,
    stats: RunStats,
}

impl WapCoordinator {
    /// Create a coordinator from its three collaborators.
    pub fn new(
        writer: Arc<dyn StagingWriter>,
        auditor: Arc<dyn Auditor>,
        publisher: Arc<dyn Publisher>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            writer,
            auditor,
            publisher,
            config,
            journal: None,
            stats: RunStats::default(),
        }
    }

    /// Wire the lakehouse-backed collaborators with default staging options.
    pub fn for_lakehouse(lakehouse: Arc<dyn Lakehouse>, config: CoordinatorConfig) -> Self {
        let main = config.main_branch.clone();
        Self::new(
            Arc::new(BranchStagingWriter::new(lakehouse.clone(), main.clone())),
            Arc::new(CheckAuditor::new(lakehouse.clone())),
            Arc::new(BranchPublisher::new(lakehouse, main)),
            config,
        )
    }

    /// Record runs in a journal for crash recovery.
    pub fn with_journal(mut self, journal: Arc<RunJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Get statistics.
    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// The publisher used for cleanup; also what a sweep should use.
    pub fn publisher(&self) -> Arc<dyn Publisher> {
        Arc::clone(&self.publisher)
    }

    /// Ingest `batch` into `destination` if it passes `checks`.
    pub async fn run_wap(
        &self,
        destination: TableName,
        batch: Batch,
        checks: Vec<QualityCheck>,
    ) -> Outcome {
        self.run(RunRequest::new(destination, batch, checks))
            .await
            .outcome
    }

    /// Execute one run and report every transition.
    ///
    /// Never returns early: every failure ends in an `Aborted` outcome after
    /// cleanup. Dropping the returned future discards the staging branch in
    /// the background.
    pub async fn run(&self, request: RunRequest) -> RunReport {
        let RunRequest {
            destination,
            batch,
            checks,
            branch,
            cancel,
        } = request;

        let mut run = Run::new(Uuid::new_v4().to_string(), destination);
        let mut cancel = Cancellation(cancel);
        self.stats.runs_started.fetch_add(1, Ordering::Relaxed);

        info!(
            run_id = %run.run_id(),
            destination = %run.destination(),
            rows = batch.len(),
            checks = checks.len(),
            "Starting WAP run"
        );

        // A caller-named branch may predate the run; it is owned only once staged.
        let named = branch.is_some();
        let (outcome, branch, cleanup_error) = match self.reserve(&run, &checks, branch) {
            Err(e) => (self.abort(&mut run, e, None), None, None),
            Ok(reservation) => {
                let branch = reservation.branch.clone();
                self.journal(JournalEntry::RunStarted {
                    run_id: run.run_id().to_string(),
                    destination: run.destination().clone(),
                    branch: branch.clone(),
                    branch_owned: !named,
                    batch_id: batch.batch_id().to_string(),
                    row_count: batch.len(),
                    timestamp: Utc::now(),
                });

                let publisher = Arc::clone(&self.publisher);
                let mut guard = if named {
                    StagingGuard::reserved(publisher, reservation)
                } else {
                    StagingGuard::new(publisher, reservation)
                };
                let step = self
                    .drive(&mut run, &mut guard, &batch, &checks, &mut cancel)
                    .await;

                let (outcome, cleanup_error) = match step {
                    Ok(Step::Published(commit)) => {
                        // Published stays published even if the branch lingers.
                        let cleanup_error = self.cleanup(&run, guard).await;
                        self.stats.runs_published.fetch_add(1, Ordering::Relaxed);
                        (Outcome::Published(commit), cleanup_error)
                    }
                    Ok(Step::Rejected(verdict)) => {
                        let cleanup_error = self.cleanup(&run, guard).await;
                        let failed: Vec<_> =
                            verdict.failed_checks().map(|d| d.check.as_str()).collect();
                        self.record(
                            &mut run,
                            RunState::Rejected,
                            Some(format!("failed checks: {}", failed.join(", "))),
                        );
                        self.stats.runs_rejected.fetch_add(1, Ordering::Relaxed);
                        let rejection = Rejection {
                            run_id: run.run_id().to_string(),
                            diagnostics: verdict.diagnostics,
                            cleanup_error: cleanup_error.clone(),
                        };
                        (Outcome::Rejected(rejection), cleanup_error)
                    }
                    Err(e) => {
                        let cleanup_error = self.cleanup(&run, guard).await;
                        (self.abort(&mut run, e, cleanup_error.clone()), cleanup_error)
                    }
                };
                (outcome, Some(branch), cleanup_error)
            }
        };

        self.journal(JournalEntry::RunFinished {
            run_id: run.run_id().to_string(),
            outcome: outcome.label().to_string(),
            commit_id: outcome.commit_ref().map(|c| c.commit_id.clone()),
            timestamp: Utc::now(),
        });

        info!(
            run_id = %run.run_id(),
            outcome = outcome.label(),
            transitions = run.transitions().len(),
            "WAP run finished"
        );

        RunReport {
            run_id: run.run_id().to_string(),
            destination: run.destination().clone(),
            branch,
            started_at: run.started_at(),
            finished_at: Utc::now(),
            transitions: run.into_transitions(),
            outcome,
            cleanup_error,
        }
    }

    /// Validate the request and reserve its staging branch.
    fn reserve(
        &self,
        run: &Run,
        checks: &[QualityCheck],
        branch: Option<BranchName>,
    ) -> Result<StagingHandle> {
        if checks.is_empty() {
            return Err(Error::Config(
                "at least one quality check is required".to_string(),
            ));
        }

        let branch = match branch {
            Some(branch) => branch,
            None => BranchName::new(format!("{}{}", self.config.branch_prefix, run.run_id()))?,
        };
        if branch == self.config.main_branch {
            return Err(StagingError::ProtectedBranch(branch.to_string()).into());
        }

        Ok(StagingHandle::reserve(
            run.run_id(),
            run.destination().clone(),
            branch,
        ))
    }

    /// Stage, audit and (on PASS) publish.
    ///
    /// On error the run is still in the state that failed.
    async fn drive(
        &self,
        run: &mut Run,
        guard: &mut StagingGuard,
        batch: &Batch,
        checks: &[QualityCheck],
        cancel: &mut Cancellation,
    ) -> Result<Step> {
        // INIT -> STAGED
        let staged = cancel.guard(self.writer.stage(guard.handle(), batch)).await?;
        guard.update(staged.clone());
        self.advance(
            run,
            RunState::Staged,
            format!("{} rows on {}", staged.rows_written, staged.branch),
        )?;

        // STAGED -> AUDITED
        let audit = self.auditor.audit(&staged, checks);
        let verdict = match self.config.audit_timeout {
            Some(limit) => {
                cancel
                    .guard(async move {
                        match tokio::time::timeout(limit, audit).await {
                            Ok(result) => result,
                            Err(_) => Err(Error::Timeout(format!(
                                "audit did not finish within {:?}",
                                limit
                            ))),
                        }
                    })
                    .await?
            }
            None => cancel.guard(audit).await?,
        };
        self.advance(
            run,
            RunState::Audited,
            format!(
                "verdict {} over {} rows",
                verdict.status, verdict.rows_scanned
            ),
        )?;

        if !verdict.passed() {
            return Ok(Step::Rejected(verdict));
        }

        // AUDITED -> PUBLISHED. The merge itself is not interruptible.
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let commit = self.publisher.publish(&staged).await?;
        self.advance(run, RunState::Published, format!("commit {}", commit))?;

        Ok(Step::Published(commit))
    }

    /// Transition and journal; fails only on an invalid edge.
    fn advance(&self, run: &mut Run, to: RunState, detail: String) -> Result<()> {
        let transition = run.transition(to, Some(detail))?.clone();
        self.journal(JournalEntry::StateTransition {
            run_id: run.run_id().to_string(),
            from: transition.from,
            to: transition.to,
            detail: transition.detail,
            timestamp: transition.at,
        });
        Ok(())
    }

    /// Terminal transition; an invalid edge here is logged, not raised.
    fn record(&self, run: &mut Run, to: RunState, detail: Option<String>) {
        let from = run.state();
        if let Err(e) = self.advance(run, to, detail.unwrap_or_default()) {
            error!(
                run_id = %run.run_id(),
                from = %from,
                to = %to,
                error = %e,
                "Failed to record terminal state"
            );
        }
    }

    fn abort(&self, run: &mut Run, source: Error, cleanup_error: Option<CleanupError>) -> Outcome {
        let state = run.state();
        warn!(
            run_id = %run.run_id(),
            state = %state,
            kind = source.kind(),
            error = %source,
            "Run aborted"
        );
        self.record(run, RunState::Aborted, Some(source.to_string()));
        self.stats.runs_aborted.fetch_add(1, Ordering::Relaxed);

        Outcome::Aborted(RunError {
            run_id: run.run_id().to_string(),
            state,
            source,
            cleanup_error,
        })
    }

    /// Discard the staging branch; a failure is reported, never raised.
    async fn cleanup(&self, run: &Run, guard: StagingGuard) -> Option<CleanupError> {
        let branch = guard.handle().branch.clone();
        if !guard.is_armed() {
            info!(
                run_id = %run.run_id(),
                branch = %branch,
                "Run never staged into its named branch, leaving it in place"
            );
        }
        match guard.release().await {
            Ok(()) => None,
            Err(e) => {
                warn!(
                    run_id = %run.run_id(),
                    branch = %branch,
                    error = %e,
                    "Failed to discard staging branch, it may be leaked"
                );
                self.stats.cleanup_failures.fetch_add(1, Ordering::Relaxed);
                self.journal(JournalEntry::CleanupFailed {
                    run_id: run.run_id().to_string(),
                    branch,
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                Some(e)
            }
        }
    }

    fn journal(&self, entry: JournalEntry) {
        if let Some(ref journal) = self.journal {
            if let Err(e) = journal.append(entry) {
                warn!(error = %e, "Failed to write run journal entry");
            }
        }
    }
}

/// Builder for WapCoordinator.
pub struct WapCoordinatorBuilder {
    lakehouse: Option<Arc<dyn Lakehouse>>,
    writer: Option<Arc<dyn StagingWriter>>,
    auditor: Option<Arc<dyn Auditor>>,
    publisher: Option<Arc<dyn Publisher>>,
    config: CoordinatorConfig,
    schema_policy: SchemaPolicy,
    auto_create_table: bool,
    journal: Option<Arc<RunJournal>>,
}

impl WapCoordinatorBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            lakehouse: None,
            writer: None,
            auditor: None,
            publisher: None,
            config: CoordinatorConfig::default(),
            schema_policy: SchemaPolicy::default(),
            auto_create_table: false,
            journal: None,
        }
    }

    /// Use lakehouse-backed collaborators for any role not set explicitly.
    pub fn lakehouse(mut self, lakehouse: Arc<dyn Lakehouse>) -> Self {
        self.lakehouse = Some(lakehouse);
        self
    }

    /// Set the staging writer.
    pub fn writer(mut self, writer: Arc<dyn StagingWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Set the auditor.
    pub fn auditor(mut self, auditor: Arc<dyn Auditor>) -> Self {
        self.auditor = Some(auditor);
        self
    }

    /// Set the publisher.
    pub fn publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Set the configuration.
    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the main branch.
    pub fn main_branch(mut self, branch: BranchName) -> Self {
        self.config.main_branch = branch;
        self
    }

    /// Set the staging branch prefix.
    pub fn branch_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.branch_prefix = prefix.into();
        self
    }

    /// Bound the audit phase.
    pub fn audit_timeout(mut self, timeout: Duration) -> Self {
        self.config.audit_timeout = Some(timeout);
        self
    }

    /// Schema policy of the lakehouse-backed staging writer.
    pub fn schema_policy(mut self, policy: SchemaPolicy) -> Self {
        self.schema_policy = policy;
        self
    }

    /// Let the lakehouse-backed staging writer create missing tables.
    pub fn auto_create_table(mut self, enabled: bool) -> Self {
        self.auto_create_table = enabled;
        self
    }

    /// Set the run journal.
    pub fn journal(mut self, journal: Arc<RunJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Build the WapCoordinator.
    pub fn build(self) -> Result<WapCoordinator> {
        BranchName::new(format!("{}0", self.config.branch_prefix)).map_err(|e| {
            Error::Config(format!(
                "branch prefix '{}' does not form valid branch names: {}",
                self.config.branch_prefix, e
            ))
        })?;

        let main = self.config.main_branch.clone();
        let lakehouse = self.lakehouse;
        let missing = |role: &str| {
            Error::Config(format!(
                "WapCoordinator requires a {} or a lakehouse",
                role
            ))
        };

        let writer: Arc<dyn StagingWriter> = match (self.writer, &lakehouse) {
            (Some(writer), _) => writer,
            (None, Some(lakehouse)) => Arc::new(
                BranchStagingWriter::new(Arc::clone(lakehouse), main.clone())
                    .with_schema_policy(self.schema_policy)
                    .with_auto_create_table(self.auto_create_table),
            ),
            (None, None) => return Err(missing("staging writer")),
        };
        let auditor: Arc<dyn Auditor> = match (self.auditor, &lakehouse) {
            (Some(auditor), _) => auditor,
            (None, Some(lakehouse)) => Arc::new(CheckAuditor::new(Arc::clone(lakehouse))),
            (None, None) => return Err(missing("auditor")),
        };
        let publisher: Arc<dyn Publisher> = match (self.publisher, &lakehouse) {
            (Some(publisher), _) => publisher,
            (None, Some(lakehouse)) => {
                Arc::new(BranchPublisher::new(Arc::clone(lakehouse), main.clone()))
            }
            (None, None) => return Err(missing("publisher")),
        };

        let mut coordinator = WapCoordinator::new(writer, auditor, publisher, self.config);
        if let Some(journal) = self.journal {
            coordinator = coordinator.with_journal(journal);
        }

        Ok(coordinator)
    }
}

impl Default for WapCoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

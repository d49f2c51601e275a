//! Runs one batch: enumerate, dispatch, poll, reconcile, report.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::AppError;
use crate::migration::dispatcher::{ImportDispatcher, ImportTemplate};
use crate::migration::enumerator::enumerate_archives;
use crate::migration::ledger::JobLedger;
use crate::migration::model::{BatchResult, StatusCounts};
use crate::migration::ops::{ArchiveSource, ImportService, ProgressSink};
use crate::migration::poller::{PollSettings, StatusPoller, StopReason};
use crate::migration::reconciler::Reconciler;
use crate::migration::scheduler::RequestScheduler;

/// Where to find the archives and how to drive the remote calls.
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub container: String,
    /// Archive extension with its leading dot.
    pub extension: String,
    pub poll: PollSettings,
    /// Maximum concurrent submissions and status queries.
    pub concurrency: usize,
}

pub struct MigrationOrchestrator<A: ArchiveSource, S: ImportService> {
    source: A,
    service: S,
    template: Arc<ImportTemplate>,
    sink: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
    settings: BatchSettings,
}

impl<A: ArchiveSource, S: ImportService> MigrationOrchestrator<A, S> {
    pub fn new(
        source: A,
        service: S,
        template: ImportTemplate,
        sink: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
        settings: BatchSettings,
    ) -> Self {
        Self {
            source,
            service,
            template: Arc::new(template),
            sink,
            cancel,
            settings,
        }
    }

    /// Runs the batch to completion or until a stop condition.
    ///
    /// # Errors
    ///
    /// - Listing errors propagate unchanged
    /// - `AppError::Cancelled` - Cancellation was requested
    /// - `AppError::BatchFailed` - Any import failed, any database is missing,
    ///   or any import was still running when polling stopped
    pub async fn run(&self) -> Result<BatchResult, AppError> {
        let started = Instant::now();

        let archives = enumerate_archives(
            &self.source,
            &self.settings.container,
            &self.settings.extension,
        )
        .await?;

        if archives.is_empty() {
            warn!(
                "[MIGRATE] No *{} archives in container {}",
                self.settings.extension, self.settings.container
            );
            let result = BatchResult {
                total_jobs: 0,
                counts: StatusCounts::default(),
                failed: Vec::new(),
                missing: Vec::new(),
                unresolved: Vec::new(),
                elapsed: started.elapsed(),
            };
            self.sink.emit_result(&result);
            return Ok(result);
        }

        if self.cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let scheduler = RequestScheduler::new(self.settings.concurrency);
        let archive_count = archives.len();

        let jobs = ImportDispatcher::new(
            self.service.clone(),
            self.template.clone(),
            scheduler.clone(),
            self.cancel.clone(),
        )
        .dispatch(archives)
        .await;

        if jobs.len() != archive_count {
            return Err(AppError::Internal(format!(
                "Dispatched {} job(s) for {} archive(s)",
                jobs.len(),
                archive_count
            )));
        }
        let mut ledger = JobLedger::from_jobs(jobs)?;

        let outcome = StatusPoller::new(
            self.service.clone(),
            self.sink.clone(),
            scheduler,
            self.cancel.clone(),
            self.settings.poll.clone(),
        )
        .poll(&mut ledger)
        .await;

        if outcome.stop_reason == StopReason::Cancelled {
            warn!(
                "[MIGRATE] Cancelled; {} started import(s) keep running on the server",
                ledger.jobs().iter().filter(|j| j.handle().is_some()).count()
            );
            return Err(AppError::Cancelled);
        }

        let mut result = Reconciler::new(self.service.clone(), self.template.server.clone())
            .reconcile(ledger.jobs(), outcome.stop_reason)
            .await;
        result.elapsed = started.elapsed();

        info!(
            "[MIGRATE] Batch of {} finished after {} poll iteration(s) in {}s",
            result.total_jobs,
            outcome.iterations,
            result.elapsed.as_secs()
        );
        self.sink.emit_result(&result);

        result.into_result()
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            container: "bacpacs".to_string(),
            extension: ".bacpac".to_string(),
            poll: PollSettings::default(),
            concurrency: 1,
        }
    }
}

impl BatchSettings {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll.interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::fakes::{
        import_template, FakeArchiveSource, FakeImportService, RecordingSink, Status,
    };
    use crate::migration::model::ImportStatus;

    fn settings() -> BatchSettings {
        BatchSettings::default().with_poll_interval(Duration::from_millis(1))
    }

    fn orchestrator(
        names: Vec<&'static str>,
        service: FakeImportService,
        sink: Arc<RecordingSink>,
        settings: BatchSettings,
        cancel: CancellationToken,
    ) -> MigrationOrchestrator<FakeArchiveSource, FakeImportService> {
        MigrationOrchestrator::new(
            FakeArchiveSource { names },
            service,
            import_template(),
            sink,
            cancel,
            settings,
        )
    }

    #[tokio::test]
    async fn clean_batch_succeeds() {
        let service = FakeImportService::new()
            .script(
                "a",
                vec![
                    Status(ImportStatus::InProgress),
                    Status(ImportStatus::Succeeded),
                ],
            )
            .script("b", vec![Status(ImportStatus::Succeeded)])
            .with_database("a")
            .with_database("b");
        let sink = Arc::new(RecordingSink::default());

        let result = orchestrator(
            vec!["a.bacpac", "b.BACPAC", "readme.md"],
            service.clone(),
            sink.clone(),
            settings(),
            CancellationToken::new(),
        )
        .run()
        .await
        .unwrap();

        assert!(result.is_success());
        assert_eq!(result.total_jobs, 2);
        assert_eq!(result.counts.succeeded, 2);
        assert_eq!(sink.snapshots().len(), 2);
        assert_eq!(sink.results(), vec![result]);
    }

    #[tokio::test]
    async fn failed_submission_is_counted_and_excluded_from_existence_check() {
        let service = FakeImportService::new()
            .fail_submission("b")
            .with_database("a")
            .with_database("c");
        let sink = Arc::new(RecordingSink::default());

        let err = orchestrator(
            vec!["a.bacpac", "b.bacpac", "c.bacpac"],
            service.clone(),
            sink.clone(),
            settings(),
            CancellationToken::new(),
        )
        .run()
        .await
        .unwrap_err();

        match err {
            AppError::BatchFailed {
                failed_imports,
                missing_databases,
                unresolved,
            } => assert_eq!((failed_imports, missing_databases, unresolved), (1, 0, 0)),
            other => panic!("Expected BatchFailed, got {:?}", other),
        }

        let result = sink.results().pop().unwrap();
        assert_eq!(result.total_jobs, 3);
        assert_eq!(result.failed_count(), 1);
        assert_eq!(result.failed[0].archive, "b.bacpac");
        assert!(result.failed[0].failed_to_start);
        assert!(result.missing.is_empty());
        assert_eq!(service.status_calls("b"), 0);
        let mut checked = service.exists_calls();
        checked.sort();
        assert_eq!(checked, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn reported_success_without_database_fails_batch() {
        let service = FakeImportService::new().with_database("a");
        let sink = Arc::new(RecordingSink::default());

        let err = orchestrator(
            vec!["a.bacpac", "b.bacpac"],
            service,
            sink.clone(),
            settings(),
            CancellationToken::new(),
        )
        .run()
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            AppError::BatchFailed {
                failed_imports: 0,
                missing_databases: 1,
                unresolved: 0
            }
        ));
        let result = sink.results().pop().unwrap();
        assert_eq!(result.counts.succeeded, 2);
        assert_eq!(result.missing[0].archive, "b.bacpac");
    }

    #[tokio::test]
    async fn pending_import_with_database_present_succeeds() {
        let service = FakeImportService::new()
            .script("a", vec![Status(ImportStatus::Queued)])
            .with_database("a");
        let sink = Arc::new(RecordingSink::default());

        let result = orchestrator(
            vec!["a.bacpac"],
            service,
            sink.clone(),
            settings(),
            CancellationToken::new(),
        )
        .run()
        .await
        .unwrap();

        assert!(result.is_success());
        assert_eq!(result.counts.queued, 1);
        assert!(result.unresolved.is_empty());
        assert_eq!(sink.snapshots().len(), 1);
    }

    #[tokio::test]
    async fn iteration_cap_leaves_unresolved_jobs() {
        let service = FakeImportService::new()
            .script("a", vec![Status(ImportStatus::InProgress)])
            .with_database("a");
        let sink = Arc::new(RecordingSink::default());
        let mut settings = settings();
        settings.poll.max_iterations = Some(2);

        let err = orchestrator(
            vec!["a.bacpac"],
            service,
            sink.clone(),
            settings,
            CancellationToken::new(),
        )
        .run()
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::BatchFailed { unresolved: 1, .. }));
        assert_eq!(sink.snapshots().len(), 2);
    }

    #[tokio::test]
    async fn cancellation_ends_run_without_reconciling() {
        let service = FakeImportService::new().script("a", vec![Status(ImportStatus::InProgress)]);
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();
        let mut settings = settings();
        settings.poll.interval = Duration::from_secs(3600);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            orchestrator(vec!["a.bacpac"], service.clone(), sink.clone(), settings, cancel).run(),
        )
        .await
        .expect("run should stop on cancellation")
        .unwrap_err();

        assert!(matches!(err, AppError::Cancelled));
        assert!(sink.results().is_empty());
        assert!(service.exists_calls().is_empty());
    }

    #[tokio::test]
    async fn empty_container_is_not_an_error() {
        let service = FakeImportService::new();
        let sink = Arc::new(RecordingSink::default());

        let result = orchestrator(
            vec!["notes.txt"],
            service.clone(),
            sink,
            settings(),
            CancellationToken::new(),
        )
        .run()
        .await
        .unwrap();
        assert_eq!(result.total_jobs, 0);
        assert!(service.submitted().is_empty());
    }
}

//! Import dispatch: one asynchronous import per archive.
//!
//! Submission failures are isolated. Every archive yields exactly one
//! `ImportJob`, either submitted with a handle or failed-to-start.

use std::sync::Arc;

use secrecy::SecretString;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use crate::azure::{EditionSettings, ImportRequest, SqlServerTarget};
use crate::credentials::SqlCredentials;
use crate::error::AppError;
use crate::migration::model::{Archive, ImportJob};
use crate::migration::ops::ImportService;
use crate::migration::scheduler::RequestScheduler;

/// Settings shared by every import in the batch.
#[derive(Debug, Clone)]
pub struct ImportTemplate {
    pub server: SqlServerTarget,
    pub edition: EditionSettings,
    pub credentials: SqlCredentials,
    /// URL of the container holding the archives.
    pub container_url: Url,
    pub storage_key: SecretString,
}

impl ImportTemplate {
    /// Absolute URL of an archive's blob.
    pub fn blob_url(&self, archive: &Archive) -> Result<Url, AppError> {
        let mut url = self.container_url.clone();
        url.path_segments_mut()
            .map_err(|_| AppError::InvalidConfig("Container URL cannot be a base URL".into()))?
            .pop_if_empty()
            .extend(archive.name().split('/'));
        Ok(url)
    }

    /// Builds the import request for one archive.
    pub fn request_for(&self, archive: &Archive) -> Result<ImportRequest, AppError> {
        Ok(ImportRequest {
            server: self.server.clone(),
            database_name: archive.database_name(),
            edition: self.edition.clone(),
            administrator_login: self.credentials.username.clone(),
            administrator_password: self.credentials.password.clone(),
            storage_uri: self.blob_url(archive)?,
            storage_key: self.storage_key.clone(),
        })
    }
}

/// Submits imports through an `ImportService`, bounded by a scheduler.
pub struct ImportDispatcher<S: ImportService> {
    service: S,
    template: Arc<ImportTemplate>,
    scheduler: RequestScheduler,
    cancel: CancellationToken,
}

impl<S: ImportService> ImportDispatcher<S> {
    pub fn new(
        service: S,
        template: Arc<ImportTemplate>,
        scheduler: RequestScheduler,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            service,
            template,
            scheduler,
            cancel,
        }
    }

    /// Submits one import per archive and returns the jobs in archive order.
    ///
    /// Does not wait for any import to run. Archives not yet submitted when
    /// cancellation is requested are recorded as failed-to-start.
    pub async fn dispatch(&self, archives: Vec<Archive>) -> Vec<ImportJob> {
        let total = archives.len();
        info!(
            "[DISPATCH] Submitting {} import(s), {} at a time",
            total,
            self.scheduler.limit()
        );

        let mut join_set: JoinSet<(usize, ImportJob)> = JoinSet::new();
        for (index, archive) in archives.iter().cloned().enumerate() {
            let service = self.service.clone();
            let template = self.template.clone();
            let scheduler = self.scheduler.clone();
            let cancel = self.cancel.clone();

            join_set.spawn(async move {
                let job = submit_one(service, template, scheduler, cancel, archive).await;
                (index, job)
            });
        }

        let mut slots: Vec<Option<ImportJob>> = vec![None; total];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, job)) => slots[index] = Some(job),
                Err(e) => warn!("[DISPATCH] Submission task failed: {:?}", e),
            }
        }

        let jobs: Vec<ImportJob> = slots
            .into_iter()
            .zip(archives)
            .map(|(slot, archive)| {
                slot.unwrap_or_else(|| {
                    ImportJob::failed_to_start(archive, "Submission task did not complete")
                })
            })
            .collect();

        let started = jobs.iter().filter(|j| j.handle().is_some()).count();
        info!(
            "[DISPATCH] {} of {} import(s) started, {} failed to start",
            started,
            total,
            total - started
        );
        jobs
    }
}

async fn submit_one<S: ImportService>(
    service: S,
    template: Arc<ImportTemplate>,
    scheduler: RequestScheduler,
    cancel: CancellationToken,
    archive: Archive,
) -> ImportJob {
    let _permit = match scheduler.acquire().await {
        Ok(permit) => permit,
        Err(e) => return ImportJob::failed_to_start(archive, e.to_string()),
    };

    if cancel.is_cancelled() {
        return ImportJob::failed_to_start(archive, "Cancelled before submission");
    }

    let result = match template.request_for(&archive) {
        Ok(request) => service.submit_import(&request).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(handle) => {
            info!(
                "[DISPATCH] {} -> database {} (operation {})",
                archive.name(),
                archive.database_name(),
                handle
            );
            ImportJob::submitted(archive, handle)
        }
        Err(e) => {
            let err = AppError::SubmissionFailed {
                archive: archive.name().to_string(),
                message: e.to_string(),
            };
            warn!("[DISPATCH] {}", err);
            ImportJob::failed_to_start(archive, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::fakes::{import_template as template, FakeImportService};
    use crate::migration::model::{ImportStatus, SubmissionOutcome};
    use std::time::Duration;

    fn archives(names: &[&str]) -> Vec<Archive> {
        names.iter().map(|n| Archive::new(*n, None)).collect()
    }

    fn dispatcher(service: FakeImportService, limit: usize) -> ImportDispatcher<FakeImportService> {
        ImportDispatcher::new(
            service,
            Arc::new(template()),
            RequestScheduler::new(limit),
            CancellationToken::new(),
        )
    }

    #[test]
    fn request_carries_archive_location_and_settings() {
        let request = template()
            .request_for(&Archive::new("exports/Sales.bacpac", None))
            .unwrap();
        assert_eq!(request.database_name, "Sales");
        assert_eq!(
            request.storage_uri.as_str(),
            "https://acct.blob.core.windows.net/bacpacs/exports/Sales.bacpac"
        );
        assert_eq!(request.administrator_login, "sqladmin");
        assert_eq!(request.edition.service_objective, "S0");
        assert_eq!(request.server.server_name, "sql-1");
    }

    #[tokio::test]
    async fn one_job_per_archive_in_order() {
        let service = FakeImportService::new().fail_submission("b");
        let jobs = dispatcher(service.clone(), 1)
            .dispatch(archives(&["a.bacpac", "b.bacpac", "c.bacpac"]))
            .await;

        assert_eq!(jobs.len(), 3);
        let names: Vec<&str> = jobs.iter().map(|j| j.archive().name()).collect();
        assert_eq!(names, vec!["a.bacpac", "b.bacpac", "c.bacpac"]);

        assert!(jobs[0].handle().is_some());
        assert_eq!(jobs[0].status(), ImportStatus::Queued);
        assert!(jobs[1].handle().is_none());
        assert_eq!(jobs[1].status(), ImportStatus::Failed);
        assert!(matches!(jobs[1].outcome(), SubmissionOutcome::FailedToStart { .. }));
        assert!(jobs[1]
            .failed_to_start_reason()
            .unwrap()
            .contains("SubscriptionQuotaExceeded"));
        assert!(jobs[2].handle().is_some());

        let mut submitted = service.submitted();
        submitted.sort();
        assert_eq!(submitted, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn job_count_matches_archive_count_when_everything_fails() {
        let service = FakeImportService::new()
            .fail_submission("a")
            .fail_submission("b");
        let jobs = dispatcher(service, 2)
            .dispatch(archives(&["a.bacpac", "b.bacpac"]))
            .await;
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.handle().is_none()));
    }

    #[tokio::test]
    async fn concurrency_limit_is_respected() {
        let service = FakeImportService::new().with_delay(Duration::from_millis(20));
        let names: Vec<String> = (0..6).map(|i| format!("db{}.bacpac", i)).collect();
        let list: Vec<Archive> = names.iter().map(|n| Archive::new(n.as_str(), None)).collect();

        let jobs = dispatcher(service.clone(), 2).dispatch(list).await;
        assert_eq!(jobs.len(), 6);
        assert!(service.max_in_flight() <= 2);

        let sequential = FakeImportService::new().with_delay(Duration::from_millis(5));
        dispatcher(sequential.clone(), 1)
            .dispatch(archives(&["a.bacpac", "b.bacpac", "c.bacpac"]))
            .await;
        assert_eq!(sequential.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn cancelled_dispatch_records_placeholders() {
        let service = FakeImportService::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let dispatcher = ImportDispatcher::new(
            service.clone(),
            Arc::new(template()),
            RequestScheduler::new(1),
            cancel,
        );

        let jobs = dispatcher.dispatch(archives(&["a.bacpac", "b.bacpac"])).await;
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.handle().is_none()));
        assert!(service.submitted().is_empty());
    }
}

//! Post-polling reconciliation.
//!
//! Runs two independent checks over the final job snapshot: which imports
//! failed, and which archives have no database of the derived name on the
//! server. Both always run and feed one `BatchResult`.

use std::time::Duration;

use tracing::{info, warn};

use crate::azure::SqlServerTarget;
use crate::migration::model::{
    BatchResult, FailedImport, ImportJob, ImportStatus, MissingDatabase, StatusCounts,
};
use crate::migration::ops::ImportService;
use crate::migration::poller::StopReason;

pub struct Reconciler<S: ImportService> {
    service: S,
    server: SqlServerTarget,
}

impl<S: ImportService> Reconciler<S> {
    pub fn new(service: S, server: SqlServerTarget) -> Self {
        Self { service, server }
    }

    /// Builds the batch result from the final job states.
    ///
    /// Jobs still `InProgress` are unresolved only when polling was cut short
    /// by the deadline or the iteration cap. `elapsed` is left at zero for the
    /// caller to fill in.
    pub async fn reconcile(&self, jobs: &[ImportJob], stop_reason: StopReason) -> BatchResult {
        let mut counts = StatusCounts::default();
        for job in jobs {
            counts.add(job.status());
        }

        let failed = failed_imports(jobs);
        if !failed.is_empty() {
            warn!("[RECONCILE] {} import(s) failed", failed.len());
        }

        let unresolved = unresolved_imports(jobs, stop_reason);
        if !unresolved.is_empty() {
            warn!(
                "[RECONCILE] {} import(s) still in progress when polling stopped ({:?})",
                unresolved.len(),
                stop_reason
            );
        }

        let missing = self.missing_databases(jobs).await;
        if missing.is_empty() {
            info!("[RECONCILE] Every started import has a matching database");
        } else {
            warn!(
                "[RECONCILE] {} database(s) missing on {}",
                missing.len(),
                self.server.server_name
            );
        }

        BatchResult {
            total_jobs: jobs.len(),
            counts,
            failed,
            missing,
            unresolved,
            elapsed: Duration::ZERO,
        }
    }

    /// Existence check for every archive whose import was started, regardless
    /// of the status the import reported.
    async fn missing_databases(&self, jobs: &[ImportJob]) -> Vec<MissingDatabase> {
        let mut missing = Vec::new();
        for job in jobs.iter().filter(|job| job.handle().is_some()) {
            let archive = job.archive();
            let database_name = archive.database_name();
            match self
                .service
                .database_exists(&self.server, &database_name)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    if job.status() == ImportStatus::Succeeded {
                        warn!(
                            "[RECONCILE] Import of {} reported success but database {} does not exist",
                            archive.name(),
                            database_name
                        );
                    }
                    missing.push(MissingDatabase {
                        archive: archive.name().to_string(),
                        database_name,
                        check_error: None,
                    });
                }
                Err(e) => {
                    warn!(
                        "[RECONCILE] Could not check database {}: {}",
                        database_name, e
                    );
                    missing.push(MissingDatabase {
                        archive: archive.name().to_string(),
                        database_name,
                        check_error: Some(e.to_string()),
                    });
                }
            }
        }
        missing
    }
}

fn unresolved_imports(jobs: &[ImportJob], stop_reason: StopReason) -> Vec<String> {
    match stop_reason {
        StopReason::DeadlineReached | StopReason::IterationCapReached => jobs
            .iter()
            .filter(|job| job.status() == ImportStatus::InProgress)
            .map(|job| job.archive().name().to_string())
            .collect(),
        StopReason::Completed | StopReason::Cancelled => Vec::new(),
    }
}

fn failed_imports(jobs: &[ImportJob]) -> Vec<FailedImport> {
    jobs.iter()
        .filter(|job| job.status() == ImportStatus::Failed)
        .map(|job| FailedImport {
            archive: job.archive().name().to_string(),
            database_name: job.archive().database_name(),
            handle: job.handle().map(|h| h.to_string()),
            reason: job
                .detail()
                .error_message
                .clone()
                .or_else(|| job.detail().message.clone()),
            failed_to_start: job.failed_to_start_reason().is_some(),
        })
        .collect()
}

//! In-memory collection of the batch's import jobs.
//!
//! The dispatcher creates entries and the poller updates them; nothing else
//! mutates a job. Jobs keep dispatch order.

use std::collections::HashSet;

use crate::azure::OperationHandle;
use crate::error::AppError;
use crate::migration::model::{
    ImportJob, ImportStatus, ProgressSnapshot, SnapshotItem, StatusCounts, StatusObservation,
};

/// Index of a job in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(usize);

#[derive(Debug, Default)]
pub struct JobLedger {
    jobs: Vec<ImportJob>,
    archives: HashSet<String>,
}

impl JobLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a ledger from dispatched jobs.
    ///
    /// # Errors
    /// Returns `AppError::Internal` if two jobs share an archive.
    pub fn from_jobs(jobs: Vec<ImportJob>) -> Result<Self, AppError> {
        let mut ledger = Self::new();
        for job in jobs {
            ledger.insert(job)?;
        }
        Ok(ledger)
    }

    /// Adds a job. Each archive may have at most one job.
    pub fn insert(&mut self, job: ImportJob) -> Result<JobId, AppError> {
        if !self.archives.insert(job.archive().name().to_string()) {
            return Err(AppError::Internal(format!(
                "Archive {} already has an import job",
                job.archive().name()
            )));
        }
        self.jobs.push(job);
        Ok(JobId(self.jobs.len() - 1))
    }

    pub fn jobs(&self) -> &[ImportJob] {
        &self.jobs
    }

    /// Jobs that still need a status query, with their handles.
    pub fn pollable(&self) -> Vec<(JobId, OperationHandle)> {
        self.jobs
            .iter()
            .enumerate()
            .filter(|(_, job)| job.is_pollable())
            .filter_map(|(i, job)| job.handle().map(|h| (JobId(i), h.clone())))
            .collect()
    }

    /// Applies one status query result. Returns `true` if the job changed.
    pub fn apply(&mut self, id: JobId, result: Result<StatusObservation, AppError>) -> bool {
        let Some(job) = self.jobs.get_mut(id.0) else {
            return false;
        };
        match result {
            Ok(observation) => job.observe(observation),
            Err(e) => {
                let before = job.status();
                job.mark_unavailable(&e);
                before != job.status()
            }
        }
    }

    /// Loop continuation predicate: some job reports `InProgress`.
    pub fn any_in_progress(&self) -> bool {
        self.jobs
            .iter()
            .any(|job| job.status() == ImportStatus::InProgress)
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for job in &self.jobs {
            counts.add(job.status());
        }
        counts
    }

    pub fn snapshot(&self, iteration: u32) -> ProgressSnapshot {
        let items: Vec<SnapshotItem> = self
            .jobs
            .iter()
            .filter(|job| job.status() != ImportStatus::Succeeded)
            .map(SnapshotItem::from)
            .collect();
        ProgressSnapshot {
            iteration,
            total_jobs: self.jobs.len(),
            not_succeeded: items.len(),
            items,
        }
    }
}

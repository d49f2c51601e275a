//! Data model for one migration batch.

use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use crate::azure::{ImportOperationInfo, OperationHandle};
use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Archive
// ─────────────────────────────────────────────────────────────────────────────

/// A bacpac blob found in the storage container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Archive {
    name: String,
    size_bytes: Option<u64>,
}

impl Archive {
    pub fn new(name: impl Into<String>, size_bytes: Option<u64>) -> Self {
        Self {
            name: name.into(),
            size_bytes,
        }
    }

    /// Blob name, including any virtual directory prefix.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size_bytes(&self) -> Option<u64> {
        self.size_bytes
    }

    /// Target database name: the file name with its extension removed.
    ///
    /// `exports/Sales.2024.bacpac` becomes `Sales.2024`.
    pub fn database_name(&self) -> String {
        let file = self.name.rsplit('/').next().unwrap_or(&self.name);
        match file.rfind('.') {
            Some(idx) => file[..idx].to_string(),
            None => file.to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ImportStatus
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle status of an import job.
///
/// `Queued → InProgress → {Succeeded | Failed}`. `StatusUnavailable` marks a
/// job whose last status query errored; the job itself may be in any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ImportStatus {
    Queued,
    InProgress,
    Succeeded,
    Failed,
    StatusUnavailable,
}

impl ImportStatus {
    /// Position along the transition graph. `None` for the unavailable marker.
    pub fn rank(self) -> Option<u8> {
        match self {
            ImportStatus::Queued => Some(0),
            ImportStatus::InProgress => Some(1),
            ImportStatus::Succeeded | ImportStatus::Failed => Some(2),
            ImportStatus::StatusUnavailable => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ImportStatus::Succeeded | ImportStatus::Failed)
    }

    /// Maps a service status string, case-insensitively.
    pub fn from_remote(status: &str) -> Option<Self> {
        match status.trim().to_ascii_lowercase().as_str() {
            "pending" | "queued" | "accepted" => Some(ImportStatus::Queued),
            "inprogress" | "running" => Some(ImportStatus::InProgress),
            "succeeded" | "completed" => Some(ImportStatus::Succeeded),
            "failed" | "canceled" | "cancelled" => Some(ImportStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ImportStatus::Queued => "Queued",
            ImportStatus::InProgress => "InProgress",
            ImportStatus::Succeeded => "Succeeded",
            ImportStatus::Failed => "Failed",
            ImportStatus::StatusUnavailable => "StatusUnavailable",
        }
    }
}

impl std::fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Status observations
// ─────────────────────────────────────────────────────────────────────────────

/// Last known detail of a job, as reported by the service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusDetail {
    pub message: Option<String>,
    pub error_message: Option<String>,
    pub queued_time: Option<String>,
    pub last_modified_time: Option<String>,
}

/// One successful status answer for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusObservation {
    pub status: ImportStatus,
    pub detail: StatusDetail,
}

impl StatusObservation {
    pub fn new(status: ImportStatus) -> Self {
        Self {
            status,
            detail: StatusDetail::default(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.detail.message = Some(message.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.detail.error_message = Some(error.into());
        self
    }
}

impl TryFrom<ImportOperationInfo> for StatusObservation {
    type Error = AppError;

    fn try_from(info: ImportOperationInfo) -> Result<Self, Self::Error> {
        let status = ImportStatus::from_remote(&info.status).ok_or_else(|| {
            AppError::AzureError(format!("Unrecognized import status '{}'", info.status))
        })?;
        Ok(Self {
            status,
            detail: StatusDetail {
                message: info.status_message,
                error_message: info.error_message,
                queued_time: info.queued_time,
                last_modified_time: info.last_modified_time,
            },
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ImportJob
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SubmissionOutcome {
    Submitted,
    FailedToStart { reason: String },
}

/// One import job per archive, created at dispatch time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportJob {
    archive: Archive,
    handle: Option<OperationHandle>,
    status: ImportStatus,
    detail: StatusDetail,
    outcome: SubmissionOutcome,
    /// Highest rank ever observed. Survives the unavailable marker.
    highest_rank: u8,
}

impl ImportJob {
    /// A job whose import was accepted by the service.
    pub fn submitted(archive: Archive, handle: OperationHandle) -> Self {
        Self {
            archive,
            handle: Some(handle),
            status: ImportStatus::Queued,
            detail: StatusDetail::default(),
            outcome: SubmissionOutcome::Submitted,
            highest_rank: 0,
        }
    }

    /// Placeholder for an archive whose import could not be started.
    /// It has no handle and counts as failed.
    pub fn failed_to_start(archive: Archive, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            archive,
            handle: None,
            status: ImportStatus::Failed,
            detail: StatusDetail {
                error_message: Some(reason.clone()),
                ..Default::default()
            },
            outcome: SubmissionOutcome::FailedToStart { reason },
            highest_rank: 2,
        }
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    pub fn handle(&self) -> Option<&OperationHandle> {
        self.handle.as_ref()
    }

    pub fn status(&self) -> ImportStatus {
        self.status
    }

    pub fn detail(&self) -> &StatusDetail {
        &self.detail
    }

    pub fn outcome(&self) -> &SubmissionOutcome {
        &self.outcome
    }

    pub fn failed_to_start_reason(&self) -> Option<&str> {
        match &self.outcome {
            SubmissionOutcome::FailedToStart { reason } => Some(reason),
            SubmissionOutcome::Submitted => None,
        }
    }

    /// True while the job still needs status queries.
    pub fn is_pollable(&self) -> bool {
        self.handle.is_some() && !self.status.is_terminal()
    }

    /// Applies a status answer. Returns `false` when it was ignored because it
    /// would move the job backwards or the job is already terminal.
    pub fn observe(&mut self, observation: StatusObservation) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let Some(rank) = observation.status.rank() else {
            return false;
        };
        if rank < self.highest_rank {
            warn!(
                "[POLL] Ignoring regression of {} to {} (already reached rank {})",
                self.archive.name(),
                observation.status,
                self.highest_rank
            );
            return false;
        }
        self.highest_rank = rank;
        self.status = observation.status;
        self.detail = observation.detail;
        true
    }

    /// Records a failed status query. Terminal jobs keep their status.
    pub fn mark_unavailable(&mut self, error: &AppError) {
        if self.status.is_terminal() {
            return;
        }
        self.status = ImportStatus::StatusUnavailable;
        self.detail.error_message = Some(error.to_string());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Snapshots and results
// ─────────────────────────────────────────────────────────────────────────────

/// Per-job line of a progress snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotItem {
    pub archive: String,
    pub handle: Option<String>,
    pub status: ImportStatus,
    pub status_message: Option<String>,
    pub error_message: Option<String>,
    pub queued_time: Option<String>,
    pub last_modified_time: Option<String>,
}

impl From<&ImportJob> for SnapshotItem {
    fn from(job: &ImportJob) -> Self {
        Self {
            archive: job.archive.name().to_string(),
            handle: job.handle.as_ref().map(|h| h.to_string()),
            status: job.status,
            status_message: job.detail.message.clone(),
            error_message: job.detail.error_message.clone(),
            queued_time: job.detail.queued_time.clone(),
            last_modified_time: job.detail.last_modified_time.clone(),
        }
    }
}

/// Progress report emitted once per polling iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub iteration: u32,
    pub total_jobs: usize,
    pub not_succeeded: usize,
    /// Every job not in `Succeeded`.
    pub items: Vec<SnapshotItem>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub queued: usize,
    pub in_progress: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub status_unavailable: usize,
}

impl StatusCounts {
    pub fn add(&mut self, status: ImportStatus) {
        match status {
            ImportStatus::Queued => self.queued += 1,
            ImportStatus::InProgress => self.in_progress += 1,
            ImportStatus::Succeeded => self.succeeded += 1,
            ImportStatus::Failed => self.failed += 1,
            ImportStatus::StatusUnavailable => self.status_unavailable += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.queued + self.in_progress + self.succeeded + self.failed + self.status_unavailable
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedImport {
    pub archive: String,
    pub database_name: String,
    pub handle: Option<String>,
    pub reason: Option<String>,
    pub failed_to_start: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingDatabase {
    pub archive: String,
    pub database_name: String,
    /// Set when the existence query itself failed.
    pub check_error: Option<String>,
}

/// Outcome of a whole batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    pub total_jobs: usize,
    pub counts: StatusCounts,
    /// Jobs whose final status is `Failed`, including those that never started.
    pub failed: Vec<FailedImport>,
    /// Archives with no matching database on the server.
    pub missing: Vec<MissingDatabase>,
    /// Archives still in progress when the deadline or iteration cap stopped polling.
    pub unresolved: Vec<String>,
    pub elapsed: Duration,
}

impl BatchResult {
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.missing.is_empty() && self.unresolved.is_empty()
    }

    /// Converts a failing result into `AppError::BatchFailed`.
    pub fn into_result(self) -> Result<BatchResult, AppError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(AppError::BatchFailed {
                failed_imports: self.failed.len(),
                missing_databases: self.missing.len(),
                unresolved: self.unresolved.len(),
            })
        }
    }
}

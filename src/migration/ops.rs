//! Collaborator seams of the migration engine.
//!
//! The engine only talks to the outside world through these traits so tests
//! can drive it with scripted fakes. Implementations over the Azure clients
//! live in `adapters`.

use std::future::Future;
use std::pin::Pin;

use crate::azure::{BlobItem, ImportRequest, OperationHandle, SqlServerTarget};
use crate::error::AppError;
use crate::migration::model::{BatchResult, ProgressSnapshot, StatusObservation};

/// Lists the blobs of a container.
pub trait ArchiveSource: Send + Sync {
    fn list_blobs<'a>(
        &'a self,
        container: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<BlobItem>, AppError>> + Send + 'a>>;
}

/// Remote import operations.
pub trait ImportService: Send + Sync + Clone + 'static {
    /// Starts an import and returns its handle without waiting for it.
    fn submit_import<'a>(
        &'a self,
        request: &'a ImportRequest,
    ) -> Pin<Box<dyn Future<Output = Result<OperationHandle, AppError>> + Send + 'a>>;

    /// Gets the current status of a submitted import.
    fn get_status<'a>(
        &'a self,
        handle: &'a OperationHandle,
    ) -> Pin<Box<dyn Future<Output = Result<StatusObservation, AppError>> + Send + 'a>>;

    /// Checks whether a database of this name exists on the server.
    fn database_exists<'a>(
        &'a self,
        server: &'a SqlServerTarget,
        database_name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, AppError>> + Send + 'a>>;
}

/// Receives progress reports and the final result.
pub trait ProgressSink: Send + Sync {
    fn emit_progress(&self, snapshot: &ProgressSnapshot);

    fn emit_result(&self, result: &BatchResult);
}

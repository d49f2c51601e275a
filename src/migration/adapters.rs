//! `ops` implementations over the Azure clients.

use std::future::Future;
use std::pin::Pin;

use crate::azure::{
    BlobItem, ImportRequest, OperationHandle, SqlImportClient, SqlServerTarget, StorageClient,
};
use crate::error::AppError;
use crate::migration::model::StatusObservation;
use crate::migration::ops::{ArchiveSource, ImportService};

impl ArchiveSource for StorageClient {
    fn list_blobs<'a>(
        &'a self,
        container: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<BlobItem>, AppError>> + Send + 'a>> {
        Box::pin(StorageClient::list_blobs(self, container))
    }
}

impl ImportService for SqlImportClient {
    fn submit_import<'a>(
        &'a self,
        request: &'a ImportRequest,
    ) -> Pin<Box<dyn Future<Output = Result<OperationHandle, AppError>> + Send + 'a>> {
        Box::pin(SqlImportClient::submit_import(self, request))
    }

    fn get_status<'a>(
        &'a self,
        handle: &'a OperationHandle,
    ) -> Pin<Box<dyn Future<Output = Result<StatusObservation, AppError>> + Send + 'a>> {
        Box::pin(async move {
            let info = self.get_import_status(handle).await?;
            StatusObservation::try_from(info)
        })
    }

    fn database_exists<'a>(
        &'a self,
        server: &'a SqlServerTarget,
        database_name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, AppError>> + Send + 'a>> {
        Box::pin(SqlImportClient::database_exists(self, server, database_name))
    }
}

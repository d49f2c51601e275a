//! Azure HTTP clients and external collaborators.
//!
//! This module wraps the remote services the migration talks to:
//!
//! - **Azure Resource Manager** via a shared authenticated client with safe logging
//! - **Azure AD** token acquisition and subscription selection
//! - **Storage** account key retrieval and blob enumeration
//! - **SQL import** submission, status polling and database lookup
//! - **AzCopy** for the bulk upload of local archives

pub mod auth;
pub mod bulk_copy;
pub mod client;
pub mod sql_import;
pub mod storage;

pub use auth::{login, AzureSession, LoginMethod, ServicePrincipal};
pub use bulk_copy::{BulkCopyTool, UploadRequest};
pub use client::{ArmClient, LoggingMode};
pub use sql_import::{
    EditionSettings, ImportOperationInfo, ImportRequest, OperationHandle, SqlImportClient,
    SqlServerTarget,
};
pub use storage::{BlobItem, StorageClient};

/// API version for `Microsoft.Sql` resources.
pub const SQL_API_VERSION: &str = "2021-11-01";

/// API version for `Microsoft.Storage` resources.
pub const STORAGE_API_VERSION: &str = "2023-01-01";

/// API version for subscription lookups.
pub const SUBSCRIPTION_API_VERSION: &str = "2022-12-01";

/// Blob service REST version sent as `x-ms-version`. Bearer auth needs 2017-11-09 or later.
pub const BLOB_SERVICE_VERSION: &str = "2021-08-06";

/// OAuth scope for Azure Resource Manager.
pub const MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";

/// OAuth scope for the blob data plane.
pub const STORAGE_SCOPE: &str = "https://storage.azure.com/.default";

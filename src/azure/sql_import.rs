//! Azure SQL import client.
//!
//! This module provides functionality to:
//! - Submit a new-database import from a bacpac in blob storage
//! - Poll the status of a submitted import operation
//! - Check whether a database exists on a server
//!
//! # Security
//!
//! - Storage keys and admin passwords are never logged
//! - Only HTTP method, path, and status codes are logged

use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::azure::client::{parse_error_response, ArmClient, WireErrorDetail};
use crate::azure::SQL_API_VERSION;
use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Logical SQL server that receives the imported databases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlServerTarget {
    pub resource_group: String,
    pub server_name: String,
}

/// Edition and service level for newly imported databases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditionSettings {
    /// Edition (e.g., "Standard", "Premium").
    pub edition: String,
    /// Service objective (e.g., "S0", "P1").
    pub service_objective: String,
    /// Maximum database size in bytes.
    pub max_size_bytes: u64,
}

/// Opaque reference to a submitted import operation.
///
/// Holds the absolute status URL returned by the service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationHandle(String);

impl OperationHandle {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for logs and reports: the last path segment of the status URL.
    pub fn short(&self) -> &str {
        let path = self.0.split('?').next().unwrap_or(&self.0);
        path.trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.0)
    }
}

impl std::fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.short())
    }
}

/// Everything needed to start one import.
#[derive(Clone)]
pub struct ImportRequest {
    pub server: SqlServerTarget,
    pub database_name: String,
    pub edition: EditionSettings,
    pub administrator_login: String,
    pub administrator_password: SecretString,
    /// Absolute URL of the bacpac blob.
    pub storage_uri: Url,
    pub storage_key: SecretString,
}

impl std::fmt::Debug for ImportRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportRequest")
            .field("server", &self.server)
            .field("database_name", &self.database_name)
            .field("edition", &self.edition)
            .field("administrator_login", &self.administrator_login)
            .field("administrator_password", &"[REDACTED]")
            .field("storage_uri", &self.storage_uri.as_str())
            .field("storage_key", &"[REDACTED]")
            .finish()
    }
}

/// Status of an import operation as reported by the service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOperationInfo {
    /// Raw status string (e.g., "InProgress", "Succeeded", "Failed").
    #[serde(default)]
    pub status: String,
    /// Human-readable progress (e.g., "Running, Progress = 45%").
    #[serde(default)]
    pub status_message: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub queued_time: Option<String>,
    #[serde(default)]
    pub last_modified_time: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal Wire Types
// ─────────────────────────────────────────────────────────────────────────────

/// Request body for `servers/{server}/import`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireImportDefinition<'a> {
    database_name: &'a str,
    edition: &'a str,
    service_objective_name: &'a str,
    /// ARM expects the size as a string.
    max_size_bytes: String,
    storage_key_type: &'static str,
    storage_key: &'a str,
    storage_uri: &'a str,
    administrator_login: &'a str,
    administrator_login_password: &'a str,
    authentication_type: &'static str,
}

/// Status body. The operation-result URL nests fields under `properties`;
/// the async-operation URL reports `status` and `error` at the top level.
#[derive(Debug, Deserialize)]
struct WireOperationStatus {
    #[serde(default)]
    properties: Option<ImportOperationInfo>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<WireErrorDetail>,
}

impl WireOperationStatus {
    fn into_info(self) -> Option<ImportOperationInfo> {
        if let Some(info) = self.properties {
            if !info.status.is_empty() {
                return Some(info);
            }
        }
        let status = self.status?;
        Some(ImportOperationInfo {
            status,
            error_message: self.error.map(|e| format!("[{}] {}", e.code, e.message)),
            ..Default::default()
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SqlImportClient
// ─────────────────────────────────────────────────────────────────────────────

/// Client for SQL import operations in one subscription.
#[derive(Clone)]
pub struct SqlImportClient {
    arm: ArmClient,
    subscription_id: String,
}

impl SqlImportClient {
    pub fn new(arm: ArmClient, subscription_id: impl Into<String>) -> Self {
        Self {
            arm,
            subscription_id: subscription_id.into(),
        }
    }

    /// URL of a resource under the server, e.g. `["databases", name]`.
    fn server_url(&self, server: &SqlServerTarget, tail: &[&str]) -> Result<Url, AppError> {
        let mut segments = vec![
            "subscriptions",
            self.subscription_id.as_str(),
            "resourceGroups",
            server.resource_group.as_str(),
            "providers",
            "Microsoft.Sql",
            "servers",
            server.server_name.as_str(),
        ];
        segments.extend_from_slice(tail);
        self.arm.resource_url_from_segments(&segments, SQL_API_VERSION)
    }

    /// Submits an asynchronous import into a new database.
    ///
    /// Does not wait for the import to run.
    ///
    /// # Returns
    ///
    /// The operation handle from the `Location` header, or
    /// `Azure-AsyncOperation` when `Location` is absent.
    ///
    /// # Errors
    ///
    /// - `AppError::AzureError` - API error, or no operation reference in the response
    /// - `AppError::RateLimited` - Throttled
    /// - `AppError::NotFound` - Server not found
    /// - `AppError::ConnectionFailed` - Network error
    pub async fn submit_import(&self, req: &ImportRequest) -> Result<OperationHandle, AppError> {
        let url = self.server_url(&req.server, &["import"])?;

        let body = WireImportDefinition {
            database_name: &req.database_name,
            edition: &req.edition.edition,
            service_objective_name: &req.edition.service_objective,
            max_size_bytes: req.edition.max_size_bytes.to_string(),
            storage_key_type: "StorageAccessKey",
            storage_key: req.storage_key.expose_secret(),
            storage_uri: req.storage_uri.as_str(),
            administrator_login: &req.administrator_login,
            administrator_login_password: req.administrator_password.expose_secret(),
            authentication_type: "Sql",
        };
        let body = serde_json::to_value(&body).map_err(|e| {
            AppError::Internal(format!("Failed to serialize import request: {}", e))
        })?;

        info!(
            "[SQL-IMPORT] Submitting import of {} into {}/{}",
            req.storage_uri.path(),
            req.server.server_name,
            req.database_name
        );

        let response = self.arm.send(Method::POST, url, Some(body)).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(parse_error_response(
                response,
                status,
                &format!("Server {} not found", req.server.server_name),
            )
            .await);
        }

        let headers = response.headers();
        let handle = headers
            .get("Location")
            .or_else(|| headers.get("Azure-AsyncOperation"))
            .and_then(|v| v.to_str().ok())
            .map(OperationHandle::new)
            .ok_or_else(|| {
                AppError::AzureError(
                    "Import accepted without an operation reference".to_string(),
                )
            })?;

        info!(
            "[SQL-IMPORT] Import of {} accepted as {}",
            req.database_name, handle
        );
        Ok(handle)
    }

    /// Gets the current status of an import operation.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` - Operation not found
    /// - `AppError::AzureError` - API error or unreadable status body
    /// - `AppError::ConnectionFailed` - Network error
    pub async fn get_import_status(
        &self,
        handle: &OperationHandle,
    ) -> Result<ImportOperationInfo, AppError> {
        let url = Url::parse(handle.as_str()).map_err(|e| {
            AppError::AzureError(format!("Invalid operation handle {}: {}", handle, e))
        })?;

        let response = self.arm.send(Method::GET, url, None).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(parse_error_response(
                response,
                status,
                &format!("Import operation {} not found", handle),
            )
            .await);
        }

        let body: WireOperationStatus = response.json().await.map_err(|e| {
            AppError::AzureError(format!("Failed to parse import status: {}", e))
        })?;

        body.into_info().ok_or_else(|| {
            AppError::AzureError(format!("Import status for {} has no status field", handle))
        })
    }

    /// Checks whether a database exists on the server.
    ///
    /// # Errors
    ///
    /// Any response other than 200 or 404 is an error.
    pub async fn database_exists(
        &self,
        server: &SqlServerTarget,
        database_name: &str,
    ) -> Result<bool, AppError> {
        let url = self.server_url(server, &["databases", database_name])?;

        let response = self.arm.send(Method::GET, url, None).await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !status.is_success() {
            return Err(parse_error_response(
                response,
                status,
                &format!("Server {} not found", server.server_name),
            )
            .await);
        }
        Ok(true)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

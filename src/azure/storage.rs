//! Storage account key retrieval and blob enumeration.
//!
//! Keys come from the ARM `listKeys` action. Blob listings use the blob
//! service data plane with a bearer token; results are XML and paginated
//! with `NextMarker`.

use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::info;
use url::Url;

use crate::azure::client::{parse_error_response, send_logged, ArmClient, LoggingMode};
use crate::azure::{BLOB_SERVICE_VERSION, STORAGE_API_VERSION};
use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// A blob found in a container listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobItem {
    /// Full blob name, including any virtual directory prefix.
    pub name: String,
    /// Blob size in bytes, when reported.
    pub content_length: Option<u64>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal Wire Types
// ─────────────────────────────────────────────────────────────────────────────

/// Response of `listKeys`.
#[derive(Debug, Deserialize)]
struct WireListKeysResponse {
    #[serde(default)]
    keys: Vec<WireStorageKey>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireStorageKey {
    key_name: String,
    value: String,
}

/// Root element of a List Blobs response.
#[derive(Debug, Deserialize)]
struct WireEnumerationResults {
    #[serde(rename = "Blobs", default)]
    blobs: WireBlobs,
    #[serde(rename = "NextMarker", default)]
    next_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireBlobs {
    #[serde(rename = "Blob", default)]
    blob: Vec<WireBlob>,
}

#[derive(Debug, Deserialize)]
struct WireBlob {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Properties", default)]
    properties: Option<WireBlobProperties>,
}

#[derive(Debug, Deserialize)]
struct WireBlobProperties {
    #[serde(rename = "Content-Length", default)]
    content_length: Option<u64>,
}

// ─────────────────────────────────────────────────────────────────────────────
// StorageClient
// ─────────────────────────────────────────────────────────────────────────────

/// Client for one storage account.
#[derive(Clone)]
pub struct StorageClient {
    arm: ArmClient,
    subscription_id: String,
    resource_group: String,
    account_name: String,
    /// Blob service endpoint (e.g., "https://acct.blob.core.windows.net").
    blob_endpoint: Url,
    /// Bearer token for the blob data plane.
    storage_token: Option<SecretString>,
}

impl StorageClient {
    /// Creates a storage client.
    ///
    /// `blob_endpoint` defaults to `https://{account}.blob.core.windows.net` when `None`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidConfig` if the account name does not form a valid URL.
    pub fn new(
        arm: ArmClient,
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        account_name: impl Into<String>,
        blob_endpoint: Option<Url>,
        storage_token: Option<SecretString>,
    ) -> Result<Self, AppError> {
        let account_name = account_name.into();
        let blob_endpoint = match blob_endpoint {
            Some(url) => url,
            None => Url::parse(&format!("https://{}.blob.core.windows.net", account_name))
                .map_err(|e| {
                    AppError::InvalidConfig(format!(
                        "Invalid storage account name {}: {}",
                        account_name, e
                    ))
                })?,
        };

        Ok(Self {
            arm,
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            account_name,
            blob_endpoint,
            storage_token,
        })
    }

    /// Returns the URL of a container on this account.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidConfig` if the container name is not a valid path segment.
    pub fn container_url(&self, container: &str) -> Result<Url, AppError> {
        let mut url = self.blob_endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| AppError::InvalidConfig("Blob endpoint cannot be a base URL".into()))?
            .pop_if_empty()
            .push(container);
        Ok(url)
    }

    /// Retrieves the account's primary access key.
    ///
    /// Prefers the key named `key1`; otherwise the first key listed.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` - Storage account not found
    /// - `AppError::AzureError` - API error, or the account has no keys
    /// - `AppError::ConnectionFailed` - Network error
    pub async fn get_primary_key(&self) -> Result<SecretString, AppError> {
        let path = format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Storage/storageAccounts/{}/listKeys",
            self.subscription_id, self.resource_group, self.account_name
        );
        let url = self.arm.resource_url(&path, STORAGE_API_VERSION)?;

        let response = self.arm.send(Method::POST, url, None).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(parse_error_response(
                response,
                status,
                &format!("Storage account {} not found", self.account_name),
            )
            .await);
        }

        let body: WireListKeysResponse = response.json().await.map_err(|e| {
            AppError::AzureError(format!("Failed to parse listKeys response: {}", e))
        })?;

        let mut keys = body.keys;
        let index = keys
            .iter()
            .position(|k| k.key_name.eq_ignore_ascii_case("key1"))
            .unwrap_or(0);
        if keys.is_empty() {
            return Err(AppError::AzureError(format!(
                "Storage account {} returned no access keys",
                self.account_name
            )));
        }

        info!("[STORAGE] Retrieved access key for {}", self.account_name);
        Ok(SecretString::from(keys.swap_remove(index).value))
    }

    /// Lists every blob in a container, following continuation markers.
    ///
    /// # Errors
    ///
    /// - `AppError::NotAuthenticated` - No storage token in the session
    /// - `AppError::NotFound` - Container not found
    /// - `AppError::AzureError` - API error or malformed listing
    /// - `AppError::ConnectionFailed` - Network error
    pub async fn list_blobs(&self, container: &str) -> Result<Vec<BlobItem>, AppError> {
        let token = self
            .storage_token
            .as_ref()
            .ok_or(AppError::NotAuthenticated)?;
        let container_url = self.container_url(container)?;

        let mut items = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut url = container_url.clone();
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("restype", "container");
                query.append_pair("comp", "list");
                if let Some(ref m) = marker {
                    query.append_pair("marker", m);
                }
            }

            let request = self
                .arm
                .http_client()
                .get(url.as_str())
                .bearer_auth(token.expose_secret())
                .header("x-ms-version", BLOB_SERVICE_VERSION);

            let response = send_logged(
                "STORAGE",
                request,
                &Method::GET,
                &url,
                LoggingMode::PathAndQueryRedacted,
            )
            .await?;

            let status = response.status();
            if !status.is_success() {
                return Err(parse_error_response(
                    response,
                    status,
                    &format!("Container {} not found", container),
                )
                .await);
            }

            let body = response.text().await.map_err(|e| {
                AppError::AzureError(format!("Failed to read blob listing: {}", e))
            })?;
            let page = parse_blob_listing(&body)?;

            items.extend(page.blobs.blob.into_iter().map(|b| BlobItem {
                name: b.name,
                content_length: b.properties.and_then(|p| p.content_length),
            }));

            marker = page.next_marker.filter(|m| !m.trim().is_empty());
            if marker.is_none() {
                break;
            }
        }

        info!(
            "[STORAGE] Listed {} blob(s) in container {}",
            items.len(),
            container
        );
        Ok(items)
    }
}

/// Parses one page of a List Blobs XML response.
fn parse_blob_listing(xml: &str) -> Result<WireEnumerationResults, AppError> {
    quick_xml::de::from_str(xml)
        .map_err(|e| AppError::AzureError(format!("Malformed blob listing: {}", e)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

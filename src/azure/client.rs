//! Azure Resource Manager HTTP client with secure credential handling and safe logging.

use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::info;
use url::Url;

use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// User agent string for all Azure requests.
const CLIENT_USER_AGENT: &str = "bacpac-migrator/0.1.0";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Query parameter keys (case-insensitive) that should have their values redacted.
const SENSITIVE_QUERY_PARAMS: &[&str] = &[
    "sig",
    "code",
    "token",
    "access_token",
    "client_secret",
    "authorization",
];

// ─────────────────────────────────────────────────────────────────────────────
// LoggingMode
// ─────────────────────────────────────────────────────────────────────────────

/// Controls how URLs are sanitized for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoggingMode {
    /// Log only the path component. Strips scheme, host, query, and fragment.
    /// Example: `/subscriptions/xxx/resourceGroups/rg/providers/Microsoft.Sql/servers/s/import`
    #[default]
    PathOnly,

    /// Log path and query parameters, but redact sensitive values.
    /// Example: `/container?restype=container&comp=list&sig=***`
    PathAndQueryRedacted,
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire Types
// ─────────────────────────────────────────────────────────────────────────────

/// ARM error envelope: `{ "error": { "code": "...", "message": "..." } }`.
#[derive(Debug, Deserialize)]
struct WireErrorEnvelope {
    error: WireErrorDetail,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireErrorDetail {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// URL Sanitization
// ─────────────────────────────────────────────────────────────────────────────

/// Determines if a query parameter key is sensitive and should be redacted.
fn is_sensitive_param(key: &str) -> bool {
    let key_lower = key.to_ascii_lowercase();
    SENSITIVE_QUERY_PARAMS
        .iter()
        .any(|&sensitive| key_lower == sensitive)
}

/// Sanitizes a URL for safe logging based on the specified mode.
///
/// The result never contains the scheme, host, or fragment.
pub fn sanitize_url_for_logs(url: &Url, mode: LoggingMode) -> String {
    let path = url.path();

    match mode {
        LoggingMode::PathOnly => path.to_string(),
        LoggingMode::PathAndQueryRedacted => {
            let query_pairs: Vec<_> = url.query_pairs().collect();
            if query_pairs.is_empty() {
                return path.to_string();
            }

            let redacted_pairs: Vec<String> = query_pairs
                .into_iter()
                .map(|(key, value)| {
                    if is_sensitive_param(&key) {
                        format!("{}=***", key)
                    } else {
                        format!("{}={}", key, value)
                    }
                })
                .collect();

            format!("{}?{}", path, redacted_pairs.join("&"))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ArmClient
// ─────────────────────────────────────────────────────────────────────────────

/// Authenticated HTTP client for Azure Resource Manager.
///
/// Cheap to clone: the underlying `reqwest::Client` shares its connection pool.
#[derive(Clone)]
pub struct ArmClient {
    /// The underlying HTTP client.
    http: reqwest::Client,
    /// Management endpoint (e.g., "https://management.azure.com").
    base_url: Url,
    /// Bearer token for the management scope.
    access_token: SecretString,
    /// Controls URL sanitization for logging.
    logging_mode: LoggingMode,
}

impl std::fmt::Debug for ArmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArmClient")
            .field("base_url", &self.base_url.as_str())
            .field("access_token", &"[REDACTED]")
            .field("logging_mode", &self.logging_mode)
            .finish()
    }
}

impl ArmClient {
    /// Creates a new ARM client.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Internal` if the HTTP client fails to initialize.
    pub fn new(base_url: Url, access_token: SecretString) -> Result<Self, AppError> {
        Ok(Self::with_http(build_http_client()?, base_url, access_token))
    }

    /// Creates an ARM client reusing an existing HTTP client.
    pub fn with_http(http: reqwest::Client, base_url: Url, access_token: SecretString) -> Self {
        Self {
            http,
            base_url,
            access_token,
            logging_mode: LoggingMode::default(),
        }
    }

    /// Returns a reference to the underlying HTTP client.
    pub(crate) fn http_client(&self) -> &reqwest::Client {
        &self.http
    }

    /// Builds a resource URL from a path and an `api-version`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Internal` if the path cannot be joined to the endpoint.
    pub fn resource_url(&self, path: &str, api_version: &str) -> Result<Url, AppError> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| AppError::Internal(format!("Invalid resource path {}: {}", path, e)))?;
        url.query_pairs_mut().append_pair("api-version", api_version);
        Ok(url)
    }

    /// Builds a resource URL from individual path segments and an `api-version`.
    ///
    /// Each segment is percent-encoded, so names containing `#`, `?` or `/`
    /// stay inside their own segment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Internal` if the endpoint cannot carry a path.
    pub fn resource_url_from_segments(
        &self,
        segments: &[&str],
        api_version: &str,
    ) -> Result<Url, AppError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AppError::Internal("Management endpoint cannot be a base URL".into()))?
            .pop_if_empty()
            .extend(segments);
        url.query_pairs_mut().append_pair("api-version", api_version);
        Ok(url)
    }

    /// Executes an authenticated request against an absolute URL.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConnectionFailed` for network errors. HTTP error
    /// statuses are returned as responses; callers map them with
    /// [`parse_error_response`].
    pub async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response, AppError> {
        let mut request = self
            .http
            .request(method.clone(), url.as_str())
            .bearer_auth(self.access_token.expose_secret());

        if let Some(body) = body {
            request = request.json(&body);
        }

        send_logged("ARM", request, &method, &url, self.logging_mode).await
    }
}

/// Sends a request with timing and logging.
///
/// Never logs the Authorization header or request bodies. Network errors are
/// replaced with a generic message because reqwest errors embed the full URL.
pub(crate) async fn send_logged(
    component: &str,
    request: reqwest::RequestBuilder,
    method: &Method,
    url: &Url,
    mode: LoggingMode,
) -> Result<reqwest::Response, AppError> {
    let start = Instant::now();
    let sanitized_url = sanitize_url_for_logs(url, mode);

    let result = request.send().await;
    let duration_ms = start.elapsed().as_millis();

    match result {
        Ok(response) => {
            let status = response.status();
            let request_id = response
                .headers()
                .get("x-ms-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-");

            info!(
                "[{}] {} {} {} {}ms {}",
                component,
                method,
                sanitized_url,
                status.as_u16(),
                duration_ms,
                request_id
            );

            Ok(response)
        }
        Err(_) => {
            info!(
                "[{}] {} {} FAILED {}ms",
                component, method, sanitized_url, duration_ms
            );
            Err(AppError::ConnectionFailed(format!(
                "{} request to {} failed",
                method, sanitized_url
            )))
        }
    }
}

/// Parses an error response and maps it to an appropriate `AppError`.
pub(crate) async fn parse_error_response(
    response: reqwest::Response,
    status: reqwest::StatusCode,
    not_found: &str,
) -> AppError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        return AppError::RateLimited {
            retry_after_secs: retry_after,
        };
    }

    if status == reqwest::StatusCode::NOT_FOUND {
        return AppError::NotFound(not_found.to_string());
    }

    if status == reqwest::StatusCode::UNAUTHORIZED {
        return AppError::AuthFailed("Azure rejected the access token".to_string());
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("Unable to read error body"));

    if let Ok(envelope) = serde_json::from_str::<WireErrorEnvelope>(&body) {
        return AppError::AzureError(format!(
            "[{}] {}",
            envelope.error.code, envelope.error.message
        ));
    }

    AppError::AzureError(format!(
        "HTTP {} - {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown error")
    ))
}

/// Builds the configured HTTP client.
pub(crate) fn build_http_client() -> Result<reqwest::Client, AppError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_client(mock_url: &str) -> ArmClient {
        ArmClient::new(
            Url::parse(mock_url).unwrap(),
            SecretString::from("test_token".to_string()),
        )
        .unwrap()
    }

    #[test]
    fn sanitize_strips_scheme_and_host() {
        let url = Url::parse(
            "https://management.azure.com/subscriptions/abc/resourceGroups/rg?api-version=2021-11-01",
        )
        .unwrap();

        let result = sanitize_url_for_logs(&url, LoggingMode::PathOnly);

        assert_eq!(result, "/subscriptions/abc/resourceGroups/rg");
        assert!(!result.contains("management.azure.com"));
    }

    #[test]
    fn path_and_query_redacted_redacts_sas_signature() {
        let url = Url::parse(
            "https://acct.blob.core.windows.net/bacpacs?restype=container&comp=list&sig=abc%2Bdef&SIG=x",
        )
        .unwrap();

        let result = sanitize_url_for_logs(&url, LoggingMode::PathAndQueryRedacted);

        assert!(result.starts_with("/bacpacs?"));
        assert!(result.contains("restype=container"));
        assert!(result.contains("comp=list"));
        assert!(result.contains("sig=***"));
        assert!(result.contains("SIG=***"));
        assert!(!result.contains("abc"));
    }

    #[test]
    fn sanitize_handles_empty_query_string() {
        let url = Url::parse("https://example.com/path").unwrap();
        assert_eq!(
            sanitize_url_for_logs(&url, LoggingMode::PathAndQueryRedacted),
            "/path"
        );
    }

    #[test]
    fn resource_url_appends_api_version() {
        let client = create_test_client("https://management.azure.com");
        let url = client
            .resource_url("/subscriptions/sub-1", "2022-12-01")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://management.azure.com/subscriptions/sub-1?api-version=2022-12-01"
        );
    }

    #[test]
    fn resource_url_from_segments_encodes_each_segment() {
        let client = create_test_client("https://management.azure.com");
        let url = client
            .resource_url_from_segments(
                &["subscriptions", "sub-1", "databases", "Sales#1?x"],
                "2021-11-01",
            )
            .unwrap();
        assert_eq!(url.path(), "/subscriptions/sub-1/databases/Sales%231%3Fx");
        assert_eq!(url.query(), Some("api-version=2021-11-01"));
        assert!(url.fragment().is_none());
    }

    #[test]
    fn debug_redacts_token() {
        let client = create_test_client("https://management.azure.com");
        let debug = format!("{:?}", client);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("test_token"));
    }

    #[tokio::test]
    async fn send_attaches_bearer_token() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        Mock::given(method("GET"))
            .and(path("/subscriptions/sub-1"))
            .and(query_param("api-version", "2022-12-01"))
            .and(header("Authorization", "Bearer test_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let url = client
            .resource_url("/subscriptions/sub-1", "2022-12-01")
            .unwrap();
        let response = client.send(Method::GET, url, None).await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
    }

    #[tokio::test]
    async fn parse_error_response_reads_arm_envelope() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": { "code": "InvalidParameter", "message": "Edition is invalid" }
            })))
            .mount(&mock_server)
            .await;

        let url = client.resource_url("/anything", "2021-11-01").unwrap();
        let response = client.send(Method::GET, url, None).await.unwrap();
        let status = response.status();
        let err = parse_error_response(response, status, "resource").await;

        match err {
            AppError::AzureError(msg) => {
                assert!(msg.contains("InvalidParameter"));
                assert!(msg.contains("Edition is invalid"));
            }
            other => panic!("Expected AzureError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn parse_error_response_maps_throttling() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "17"))
            .mount(&mock_server)
            .await;

        let url = client.resource_url("/anything", "2021-11-01").unwrap();
        let response = client.send(Method::GET, url, None).await.unwrap();
        let status = response.status();
        let err = parse_error_response(response, status, "resource").await;

        assert!(matches!(
            err,
            AppError::RateLimited {
                retry_after_secs: Some(17)
            }
        ));
    }

    #[tokio::test]
    async fn connection_failure_does_not_leak_host() {
        let client = create_test_client("http://127.0.0.1:1");
        let url = client.resource_url("/subscriptions/sub-1", "2022-12-01").unwrap();

        let err = client.send(Method::GET, url, None).await.unwrap_err();
        match err {
            AppError::ConnectionFailed(msg) => {
                assert!(!msg.contains("127.0.0.1"));
                assert!(msg.contains("/subscriptions/sub-1"));
            }
            other => panic!("Expected ConnectionFailed, got {:?}", other),
        }
    }
}

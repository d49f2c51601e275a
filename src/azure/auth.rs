//! Azure AD login and subscription selection.
//!
//! A successful [`login`] yields an [`AzureSession`]: an explicit value that
//! carries the access tokens and the selected subscription, and is threaded
//! into every client that needs them.

use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{error, info};
use url::Url;

use crate::azure::client::{parse_error_response, ArmClient};
use crate::azure::{MANAGEMENT_SCOPE, STORAGE_SCOPE, SUBSCRIPTION_API_VERSION};
use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Login Methods
// ─────────────────────────────────────────────────────────────────────────────

/// Service principal used for the client-credentials grant.
#[derive(Clone)]
pub struct ServicePrincipal {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: SecretString,
}

impl std::fmt::Debug for ServicePrincipal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServicePrincipal")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

/// How the session obtains its tokens.
#[derive(Clone)]
pub enum LoginMethod {
    /// Tokens acquired out of band (e.g. `az account get-access-token`).
    AccessToken {
        management: SecretString,
        storage: Option<SecretString>,
    },
    /// OAuth2 client-credentials grant against Azure AD.
    ServicePrincipal(ServicePrincipal),
}

impl std::fmt::Debug for LoginMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoginMethod::AccessToken { storage, .. } => f
                .debug_struct("AccessToken")
                .field("management", &"[REDACTED]")
                .field("storage", &storage.as_ref().map(|_| "[REDACTED]"))
                .finish(),
            LoginMethod::ServicePrincipal(sp) => {
                f.debug_tuple("ServicePrincipal").field(sp).finish()
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Response Types
// ─────────────────────────────────────────────────────────────────────────────

/// Response from the Azure AD token endpoint.
#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: String,
    #[serde(default)]
    #[allow(dead_code)]
    token_type: String,
    #[serde(default)]
    #[allow(dead_code)]
    expires_in: Option<u64>,
}

// ─────────────────────────────────────────────────────────────────────────────
// AzureSession
// ─────────────────────────────────────────────────────────────────────────────

/// Authenticated Azure context for one run.
#[derive(Clone)]
pub struct AzureSession {
    http: reqwest::Client,
    management_endpoint: Url,
    management_token: SecretString,
    storage_token: Option<SecretString>,
    subscription_id: Option<String>,
}

impl std::fmt::Debug for AzureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureSession")
            .field("management_endpoint", &self.management_endpoint.as_str())
            .field("management_token", &"[REDACTED]")
            .field(
                "storage_token",
                &self.storage_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("subscription_id", &self.subscription_id)
            .finish()
    }
}

impl AzureSession {
    /// Selects the subscription all later calls run against.
    ///
    /// Verifies the subscription is visible to the logged-in identity.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` - Subscription does not exist or is not visible
    /// - `AppError::AuthFailed` - The token was rejected
    /// - `AppError::ConnectionFailed` - Network error
    pub async fn select_context(&mut self, subscription_id: &str) -> Result<(), AppError> {
        let arm = self.arm_client();
        let url = arm.resource_url(
            &format!("/subscriptions/{}", subscription_id),
            SUBSCRIPTION_API_VERSION,
        )?;

        let response = arm.send(Method::GET, url, None).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(parse_error_response(
                response,
                status,
                &format!("Subscription {} not found", subscription_id),
            )
            .await);
        }

        info!("[AUTH] Selected subscription {}", subscription_id);
        self.subscription_id = Some(subscription_id.to_string());
        Ok(())
    }

    /// Returns the selected subscription id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotAuthenticated` if no subscription has been selected.
    pub fn subscription_id(&self) -> Result<&str, AppError> {
        self.subscription_id
            .as_deref()
            .ok_or(AppError::NotAuthenticated)
    }

    /// Returns an ARM client bound to this session's management token.
    pub fn arm_client(&self) -> ArmClient {
        ArmClient::with_http(
            self.http.clone(),
            self.management_endpoint.clone(),
            self.management_token.clone(),
        )
    }

    /// Returns the blob data-plane token, if one was acquired.
    pub fn storage_token(&self) -> Option<&SecretString> {
        self.storage_token.as_ref()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Login
// ─────────────────────────────────────────────────────────────────────────────

/// Establishes an Azure session.
///
/// # Arguments
///
/// * `http` - The HTTP client to use
/// * `authority` - Azure AD authority (e.g., "https://login.microsoftonline.com")
/// * `management_endpoint` - ARM endpoint the session's clients target
/// * `method` - Token source
///
/// # Errors
///
/// - `AppError::AuthFailed` - Azure AD rejected the credentials
/// - `AppError::ConnectionFailed` - Network error during login
pub async fn login(
    http: reqwest::Client,
    authority: &Url,
    management_endpoint: Url,
    method: &LoginMethod,
) -> Result<AzureSession, AppError> {
    let (management_token, storage_token) = match method {
        LoginMethod::AccessToken {
            management,
            storage,
        } => {
            info!("[AUTH] Using pre-acquired access token");
            (management.clone(), storage.clone())
        }
        LoginMethod::ServicePrincipal(sp) => {
            info!(
                "[AUTH] Logging in as service principal {} (tenant {})",
                sp.client_id, sp.tenant_id
            );
            let management = request_token(&http, authority, sp, MANAGEMENT_SCOPE).await?;
            let storage = request_token(&http, authority, sp, STORAGE_SCOPE).await?;
            (management, Some(storage))
        }
    };

    Ok(AzureSession {
        http,
        management_endpoint,
        management_token,
        storage_token,
        subscription_id: None,
    })
}

/// Requests a token for one scope using the client-credentials grant.
///
/// Never logs the client secret or the returned token.
async fn request_token(
    http: &reqwest::Client,
    authority: &Url,
    sp: &ServicePrincipal,
    scope: &str,
) -> Result<SecretString, AppError> {
    let token_url = authority
        .join(&format!("{}/oauth2/v2.0/token", sp.tenant_id))
        .map_err(|e| AppError::InvalidConfig(format!("Invalid authority URL: {}", e)))?;

    let params = [
        ("grant_type", "client_credentials"),
        ("client_id", sp.client_id.as_str()),
        ("client_secret", sp.client_secret.expose_secret()),
        ("scope", scope),
    ];

    let response = http
        .post(token_url)
        .form(&params)
        .send()
        .await
        .map_err(|_| {
            error!("[AUTH] Token request failed");
            AppError::ConnectionFailed("Failed to connect to Azure AD".to_string())
        })?;

    let status = response.status();

    if status.is_success() {
        let token_response: AccessTokenResponse = response.json().await.map_err(|_| {
            error!("[AUTH] Failed to parse token response");
            AppError::Internal("Invalid token response".to_string())
        })?;

        info!("[AUTH] Token acquired for {}", scope);
        Ok(SecretString::from(token_response.access_token))
    } else if status == reqwest::StatusCode::BAD_REQUEST
        || status == reqwest::StatusCode::UNAUTHORIZED
    {
        error!("[AUTH] Token request rejected: {}", status);
        Err(AppError::AuthFailed(format!(
            "Azure AD rejected the service principal ({})",
            status.as_u16()
        )))
    } else {
        error!("[AUTH] Token request failed with status: {}", status);
        Err(AppError::AuthFailed(format!(
            "Token endpoint returned HTTP {}",
            status.as_u16()
        )))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! Command-line surface and validated run configuration.
//!
//! Flags fall back to environment variables (a `.env` file is loaded by the
//! binary before parsing). `MigrationConfig::try_from(Cli)` applies every
//! cross-field rule so the rest of the crate works with checked values.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use secrecy::SecretString;
use url::Url;

use crate::azure::{EditionSettings, LoginMethod, ServicePrincipal, SqlServerTarget};
use crate::error::AppError;

pub const DEFAULT_MANAGEMENT_ENDPOINT: &str = "https://management.azure.com";
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";

#[derive(Parser)]
#[command(name = "bacpac-migrate")]
#[command(about = "Upload bacpac archives and import each one into a new Azure SQL database")]
#[command(version)]
pub struct Cli {
    /// Subscription that owns the storage account and SQL server
    #[arg(long, env = "AZURE_SUBSCRIPTION_ID")]
    pub subscription_id: String,

    /// Resource group of the storage account and SQL server
    #[arg(long, env = "BACPAC_RESOURCE_GROUP")]
    pub resource_group: String,

    /// Storage account receiving the archives
    #[arg(long, env = "BACPAC_STORAGE_ACCOUNT")]
    pub storage_account: String,

    /// Blob container receiving the archives
    #[arg(long, env = "BACPAC_CONTAINER", default_value = "bacpacs")]
    pub container: String,

    /// Target logical SQL server
    #[arg(long, env = "BACPAC_SERVER_NAME")]
    pub server_name: String,

    /// SQL administrator login
    #[arg(long, env = "BACPAC_ADMIN_LOGIN")]
    pub admin_login: String,

    /// SQL administrator password (prompted when absent)
    #[arg(long, env = "BACPAC_ADMIN_PASSWORD", hide_env_values = true)]
    pub admin_password: Option<String>,

    /// Edition of the new databases
    #[arg(long, default_value = "Standard")]
    pub edition: String,

    /// Service objective of the new databases
    #[arg(long, default_value = "S0")]
    pub service_objective: String,

    /// Maximum size of the new databases in bytes
    #[arg(long, default_value_t = 268_435_456_000)]
    pub max_size_bytes: u64,

    /// Local directory holding the archives
    #[arg(long, default_value = ".")]
    pub source_dir: PathBuf,

    /// Skip the upload and import what is already in the container
    #[arg(long)]
    pub skip_upload: bool,

    /// Path to the AzCopy executable
    #[arg(long, env = "AZCOPY_PATH", default_value = "AzCopy")]
    pub azcopy_path: PathBuf,

    /// Archive file extension
    #[arg(long, default_value = ".bacpac")]
    pub extension: String,

    /// Seconds between status polls
    #[arg(long, default_value_t = 15)]
    pub poll_interval_secs: u64,

    /// Stop polling after this many seconds (default: run to completion)
    #[arg(long)]
    pub max_wait_secs: Option<u64>,

    /// Stop polling after this many iterations (default: run to completion)
    #[arg(long)]
    pub max_poll_iterations: Option<u32>,

    /// Maximum concurrent submissions and status queries
    #[arg(long, default_value_t = 1)]
    pub concurrency: usize,

    /// Azure AD tenant for service principal login
    #[arg(long, env = "AZURE_TENANT_ID")]
    pub tenant_id: Option<String>,

    /// Service principal application id
    #[arg(long, env = "AZURE_CLIENT_ID")]
    pub client_id: Option<String>,

    /// Service principal secret
    #[arg(long, env = "AZURE_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Pre-acquired management access token
    #[arg(long, env = "AZURE_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Pre-acquired blob storage access token
    #[arg(long, env = "AZURE_STORAGE_ACCESS_TOKEN", hide_env_values = true)]
    pub storage_access_token: Option<String>,

    #[arg(long, hide = true, default_value = DEFAULT_MANAGEMENT_ENDPOINT)]
    pub management_endpoint: String,

    #[arg(long, hide = true, default_value = DEFAULT_AUTHORITY)]
    pub authority: String,

    /// Blob endpoint override, for sovereign clouds and emulators
    #[arg(long, hide = true)]
    pub blob_endpoint: Option<String>,
}

/// Validated configuration for one migration run.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    pub subscription_id: String,
    pub resource_group: String,
    pub storage_account: String,
    pub container: String,
    pub blob_endpoint: Option<Url>,
    pub server: SqlServerTarget,
    pub admin_login: String,
    pub admin_password: Option<SecretString>,
    pub edition: EditionSettings,
    pub source_dir: PathBuf,
    pub skip_upload: bool,
    pub azcopy_path: PathBuf,
    /// Extension with a leading dot, e.g. `.bacpac`.
    pub extension: String,
    pub poll_interval: Duration,
    pub max_wait: Option<Duration>,
    pub max_poll_iterations: Option<u32>,
    pub concurrency: usize,
    pub login: LoginMethod,
    pub management_endpoint: Url,
    pub authority: Url,
}

impl MigrationConfig {
    /// AzCopy file pattern for the configured extension.
    pub fn file_pattern(&self) -> String {
        format!("*{}", self.extension)
    }
}

fn required(name: &str, value: String) -> Result<String, AppError> {
    let value = value.trim().to_string();
    if value.is_empty() {
        return Err(AppError::InvalidConfig(format!("--{} must not be empty", name)));
    }
    Ok(value)
}

fn parse_endpoint(name: &str, value: &str) -> Result<Url, AppError> {
    Url::parse(value)
        .map_err(|e| AppError::InvalidConfig(format!("--{} is not a valid URL: {}", name, e)))
}

fn login_method(cli: &mut Cli) -> Result<LoginMethod, AppError> {
    if let Some(token) = cli.access_token.take().filter(|t| !t.is_empty()) {
        let storage = cli
            .storage_access_token
            .take()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                AppError::InvalidConfig(
                    "--storage-access-token is required with --access-token".into(),
                )
            })?;
        return Ok(LoginMethod::AccessToken {
            management: SecretString::from(token),
            storage: Some(SecretString::from(storage)),
        });
    }

    match (
        cli.tenant_id.take(),
        cli.client_id.take(),
        cli.client_secret.take(),
    ) {
        (Some(tenant_id), Some(client_id), Some(client_secret))
            if !tenant_id.is_empty() && !client_id.is_empty() && !client_secret.is_empty() =>
        {
            Ok(LoginMethod::ServicePrincipal(ServicePrincipal {
                tenant_id,
                client_id,
                client_secret: SecretString::from(client_secret),
            }))
        }
        (None, None, None) => Err(AppError::InvalidConfig(
            "No Azure credentials: pass --access-token or --tenant-id/--client-id/--client-secret"
                .into(),
        )),
        _ => Err(AppError::InvalidConfig(
            "Service principal login needs --tenant-id, --client-id and --client-secret".into(),
        )),
    }
}

impl TryFrom<Cli> for MigrationConfig {
    type Error = AppError;

    fn try_from(mut cli: Cli) -> Result<Self, Self::Error> {
        if cli.concurrency == 0 {
            return Err(AppError::InvalidConfig(
                "--concurrency must be at least 1".into(),
            ));
        }
        if cli.poll_interval_secs == 0 {
            return Err(AppError::InvalidConfig(
                "--poll-interval-secs must be at least 1".into(),
            ));
        }

        if cli.max_poll_iterations == Some(0) {
            return Err(AppError::InvalidConfig(
                "--max-poll-iterations must be at least 1".into(),
            ));
        }

        let extension = cli.extension.trim();
        if extension.trim_start_matches('.').is_empty() {
            return Err(AppError::InvalidConfig("--extension must not be empty".into()));
        }
        let extension = if extension.starts_with('.') {
            extension.to_string()
        } else {
            format!(".{}", extension)
        };

        let login = login_method(&mut cli)?;
        let management_endpoint = parse_endpoint("management-endpoint", &cli.management_endpoint)?;
        let authority = parse_endpoint("authority", &cli.authority)?;
        let blob_endpoint = cli
            .blob_endpoint
            .as_deref()
            .map(|u| parse_endpoint("blob-endpoint", u))
            .transpose()?;

        let resource_group = required("resource-group", cli.resource_group)?;

        Ok(Self {
            subscription_id: required("subscription-id", cli.subscription_id)?,
            server: SqlServerTarget {
                resource_group: resource_group.clone(),
                server_name: required("server-name", cli.server_name)?,
            },
            resource_group,
            storage_account: required("storage-account", cli.storage_account)?,
            container: required("container", cli.container)?,
            blob_endpoint,
            admin_login: required("admin-login", cli.admin_login)?,
            admin_password: cli.admin_password.map(SecretString::from),
            edition: EditionSettings {
                edition: cli.edition,
                service_objective: cli.service_objective,
                max_size_bytes: cli.max_size_bytes,
            },
            source_dir: cli.source_dir,
            skip_upload: cli.skip_upload,
            azcopy_path: cli.azcopy_path,
            extension,
            poll_interval: Duration::from_secs(cli.poll_interval_secs),
            max_wait: cli.max_wait_secs.map(Duration::from_secs),
            max_poll_iterations: cli.max_poll_iterations,
            concurrency: cli.concurrency,
            login,
            management_endpoint,
            authority,
        })
    }
}

//! The `bacpac-migrate` run: upload, import, verify.
//!
//! This command handles:
//! - SQL administrator credential capture
//! - Azure login and subscription selection
//! - Storage key retrieval and the AzCopy upload
//! - Running the import batch against the target server

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::azure::client::build_http_client;
use crate::azure::{login, BulkCopyTool, SqlImportClient, StorageClient, UploadRequest};
use crate::config::MigrationConfig;
use crate::credentials::prompt_credentials;
use crate::error::AppError;
use crate::migration::{
    BatchResult, BatchSettings, ConsoleProgress, ElapsedReport, ImportTemplate,
    MigrationOrchestrator, PollSettings,
};

/// Runs a full migration batch.
///
/// The elapsed time is reported when this function returns, whatever the outcome.
///
/// # Arguments
///
/// * `config` - Validated run configuration
/// * `cancel` - Cancelled on Ctrl-C
///
/// # Errors
///
/// Authentication, key retrieval, listing and upload errors abort the run.
/// A batch with failed imports, missing databases or unfinished imports
/// returns `AppError::BatchFailed`.
pub async fn run_migration(
    config: MigrationConfig,
    cancel: CancellationToken,
) -> Result<BatchResult, AppError> {
    run_reported(config, cancel, ElapsedReport::start()).await
}

/// Runs the batch while holding `report`, which fires when this returns.
async fn run_reported(
    config: MigrationConfig,
    cancel: CancellationToken,
    report: ElapsedReport,
) -> Result<BatchResult, AppError> {
    let _report = report;

    let credentials =
        prompt_credentials(&config.admin_login, config.admin_password.clone()).await?;

    let mut session = login(
        build_http_client()?,
        &config.authority,
        config.management_endpoint.clone(),
        &config.login,
    )
    .await?;
    session.select_context(&config.subscription_id).await?;
    let subscription_id = session.subscription_id()?.to_string();
    let arm = session.arm_client();

    let storage = StorageClient::new(
        arm.clone(),
        subscription_id.as_str(),
        config.resource_group.as_str(),
        config.storage_account.as_str(),
        config.blob_endpoint.clone(),
        session.storage_token().cloned(),
    )?;
    let storage_key = storage.get_primary_key().await?;
    let container_url = storage.container_url(&config.container)?;

    if config.skip_upload {
        info!("[MIGRATE] Skipping upload; importing what is already in {}", config.container);
    } else {
        let pattern = config.file_pattern();
        BulkCopyTool::new(&config.azcopy_path)
            .upload(&UploadRequest {
                source_dir: &config.source_dir,
                destination: &container_url,
                key: &storage_key,
                pattern: &pattern,
                overwrite: true,
            })
            .await?;
    }

    if cancel.is_cancelled() {
        return Err(AppError::Cancelled);
    }

    let template = ImportTemplate {
        server: config.server.clone(),
        edition: config.edition.clone(),
        credentials,
        container_url,
        storage_key,
    };
    let settings = BatchSettings {
        container: config.container.clone(),
        extension: config.extension.clone(),
        poll: PollSettings {
            interval: config.poll_interval,
            max_wait: config.max_wait,
            max_iterations: config.max_poll_iterations,
        },
        concurrency: config.concurrency,
    };

    info!(
        "[MIGRATE] Importing from {}/{} into server {}",
        config.storage_account, config.container, config.server.server_name
    );

    MigrationOrchestrator::new(
        storage,
        SqlImportClient::new(arm, subscription_id),
        template,
        Arc::new(ConsoleProgress),
        cancel,
        settings,
    )
    .run()
    .await
}

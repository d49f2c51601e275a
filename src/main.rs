use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use bacpac_migrator::commands::run_migration;
use bacpac_migrator::config::{Cli, MigrationConfig};
use bacpac_migrator::error::AppError;
use bacpac_migrator::logging;

fn report(err: &AppError) {
    let presentation = err.to_presentation();
    eprintln!("{}: {}", presentation.title, presentation.message);
    if let Some(action) = presentation.action {
        eprintln!("{}", action);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    logging::init();

    let config = match MigrationConfig::try_from(Cli::parse()) {
        Ok(config) => config,
        Err(err) => {
            report(&err);
            return ExitCode::from(2);
        }
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("[MIGRATE] Interrupt received, stopping after in-flight requests");
            on_signal.cancel();
        }
    });

    match run_migration(config, cancel).await {
        Ok(result) => {
            info!("[MIGRATE] {} database(s) imported", result.total_jobs);
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("[MIGRATE] Run failed: {}", err);
            report(&err);
            match err {
                AppError::Cancelled => ExitCode::from(130),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vidfetch::api::{ApiServer, AppState};
use vidfetch::config::{AppConfig, log_dir_from_env};
use vidfetch::downloader::{JobManager, YtDlpWorker};
use vidfetch::jobs::JobStore;
use vidfetch::logging::init_logging;
use vidfetch::metadata::{MetadataCache, MetadataService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let (logging_config, _log_guard) =
        init_logging(&log_dir_from_env()).context("initializing logging")?;
    let config = AppConfig::from_env_or_default();

    let worker = Arc::new(YtDlpWorker::new(config.worker.clone()));
    match worker.version().await {
        Some(version) => info!(%version, binary = %config.worker.binary_path, "Found yt-dlp"),
        None => warn!(
            binary = %config.worker.binary_path,
            "yt-dlp not found, analysis and downloads will fail until it is installed"
        ),
    }

    tokio::fs::create_dir_all(&config.manager.output_dir)
        .await
        .with_context(|| {
            format!(
                "creating output directory {}",
                config.manager.output_dir.display()
            )
        })?;

    let store = Arc::new(JobStore::new());
    let manager = Arc::new(JobManager::new(
        store,
        worker.clone(),
        config.manager.clone(),
    ));
    let metadata = Arc::new(MetadataService::new(
        Arc::new(MetadataCache::new()),
        worker,
    ));

    let background = CancellationToken::new();
    logging_config.start_retention_cleanup(background.clone());

    let state = AppState::new()
        .with_job_manager(manager.clone())
        .with_metadata_service(metadata)
        .with_logging_config(logging_config)
        .with_stream_channel_capacity(config.stream_channel_capacity);
    let server = ApiServer::with_state(config.api.clone(), state);

    let server_token = server.cancel_token();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("Shutdown signal received");
        server_token.cancel();
    });

    let served = server.run().await;

    background.cancel();
    manager.shutdown(config.shutdown_timeout).await;
    info!("vidfetch stopped");

    served.context("running API server")
}

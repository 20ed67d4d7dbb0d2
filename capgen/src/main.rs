use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use capgen::api::{ApiServerConfig, AppState, server};
use capgen::config::ServiceConfig;
use capgen::resources::ResourceManager;
use capgen::scheduler::{JobScheduler, purge};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let log_dir = std::env::var("CAPGEN_LOG_DIR")
        .ok()
        .filter(|dir| !dir.trim().is_empty())
        .map(PathBuf::from);
    let _log_guard = capgen::logging::init(log_dir.as_deref());

    let config = Arc::new(ServiceConfig::from_env_or_default());
    config.validate()?;

    let resources = Arc::new(ResourceManager::new(config.work_dir.clone()));
    resources.init().await?;
    let reclaimed = resources
        .scan_orphans(Duration::from_secs(config.orphan_grace_secs))
        .await?;
    if reclaimed > 0 {
        info!(reclaimed, "reclaimed orphaned scratch directories from a previous run");
    }

    let scheduler = JobScheduler::new(config.clone(), resources);
    scheduler.start();

    let shutdown = CancellationToken::new();
    purge::start_background_task(
        scheduler.table(),
        config.retention_secs,
        config.purge_interval_secs,
        shutdown.clone(),
    );

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    info!(workers = config.worker_count, "capgen initialized");

    let api_config = ApiServerConfig::from_env_or_default();
    let state = AppState::new(scheduler.clone(), config.clone());
    server::run(&api_config, state, shutdown).await?;

    scheduler.stop().await;
    info!("capgen stopped");
    Ok(())
}

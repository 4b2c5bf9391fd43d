//! Wires the upload service, its completion hooks and the WebSocket server
//! together.

use std::sync::Arc;
use std::time::Duration;

use chunkup_upload_service::{
    CatalogNotifier, DatasetValidator, Hooks, SkippedScanner, UploadService,
};
use chunkup_ws_server::{ServerConfig, UploadHandler, UploadServer};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::Config;

/// Runs the daemon until SIGINT.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("SIGINT received, shutting down");
        }
        signal_cancel.cancel();
    });

    serve(config, cancel).await
}

/// Serves uploads until `cancel` fires, then waits for open connections and
/// the eviction sweeper to stop.
pub async fn serve(config: Config, cancel: CancellationToken) -> anyhow::Result<()> {
    let hooks = build_hooks(&config).await?;
    let service = Arc::new(UploadService::open(config.service_config(), hooks).await?);
    tracing::info!(sessions = service.registry().len(), "upload service ready");

    let sweeper = tokio::spawn(sweep_loop(
        Arc::clone(&service),
        config.sweep_interval(),
        cancel.clone(),
    ));

    let server = UploadServer::with_cancel(
        ServerConfig {
            bind: config.listen,
        },
        UploadHandler::new(service),
        cancel.clone(),
    );
    let result = server.run().await;

    // The server also returns on bind errors; stop the sweeper either way.
    cancel.cancel();
    if let Err(e) = sweeper.await {
        tracing::warn!("eviction sweeper panicked: {e}");
    }

    result?;
    Ok(())
}

async fn build_hooks(config: &Config) -> anyhow::Result<Hooks> {
    let catalog = CatalogNotifier::open(&config.metadata_store).await?;
    tracing::info!(path = %catalog.path().display(), "catalog opened");
    Ok(Hooks::none()
        .with_validator(Arc::new(DatasetValidator))
        .with_scanner(Arc::new(SkippedScanner))
        .with_notifier(Arc::new(catalog)))
}

/// Evicts idle sessions every `interval` until cancelled. Sweep failures
/// are logged and retried on the next tick.
async fn sweep_loop(service: Arc<UploadService>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match service.evict_expired().await {
            Ok(report) if report.sessions > 0 || report.orphans > 0 => {
                tracing::info!(
                    sessions = report.sessions,
                    orphans = report.orphans,
                    "evicted expired uploads"
                );
            }
            Ok(_) => tracing::debug!("eviction sweep found nothing"),
            Err(e) => tracing::warn!("eviction sweep failed: {e}"),
        }
    }
    tracing::debug!("eviction sweeper stopped");
}

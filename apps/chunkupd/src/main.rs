//! chunkup upload daemon entry point.

mod app;
mod config;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting chunkupd");

    let config = config::Config::load()?;
    tracing::info!(
        listen = %config.listen,
        data_dir = %config.data_dir.display(),
        completed_dir = %config.completed_dir.display(),
        chunk_size = config.chunk_size,
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("chunkupd shut down cleanly");
    Ok(())
}

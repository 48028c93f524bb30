use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;

use shade_worker::WorkerConfig;
use shade_worker::engine::HttpEngineClient;
use shade_worker::lifecycle::{LifecycleCoordinator, shutdown_signal};
use shade_worker::processing::AverageShade;
use shade_worker::storage::{LocalStorage, MemoryStorage, Storage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;

    // RUST_LOG wins over LOG_LEVEL
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(false)
        .init();

    let storage: Arc<dyn Storage> = match &config.storage_dir {
        Some(dir) => {
            let local = LocalStorage::open(dir)
                .await
                .with_context(|| format!("Failed to open storage at {}", dir.display()))?;
            tracing::info!(dir = %dir.display(), "Using local blob storage");
            Arc::new(local)
        }
        None => {
            tracing::warn!(
                max_blobs = config.memory_max_blobs,
                "Using in-memory blob storage, oldest outputs are evicted past the limit; set STORAGE_DIR to keep them on disk"
            );
            Arc::new(MemoryStorage::bounded(config.memory_max_blobs))
        }
    };

    let engine = Arc::new(
        HttpEngineClient::new(config.request_timeout).context("Failed to build engine client")?,
    );
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;

    let coordinator = LifecycleCoordinator::new(
        config,
        Arc::new(AverageShade::new()),
        storage,
        engine,
    );
    coordinator.run(listener, shutdown_signal()).await?;

    Ok(())
}

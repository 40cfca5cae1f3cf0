//! Startup orchestration.
//!
//! # Responsibilities
//! - Start the metrics exporter when enabled
//! - Prepare the cache database (schema, optional reset)
//! - Bind the listener and begin accepting traffic
//! - Wait for a shutdown signal and drain
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listener binds last (traffic only when the store is ready)

use std::net::SocketAddr;
use std::time::Duration;

use crate::cache::schema::load_schema;
use crate::cache::{SqliteCacheStore, StoreError};
use crate::config::ProxyConfig;
use crate::http::HttpServer;
use crate::lifecycle::signals::shutdown_signal;
use crate::lifecycle::Shutdown;
use crate::net::listener::{Listener, ListenerError};
use crate::observability::metrics;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to read schema: {0}")]
    Schema(#[source] std::io::Error),

    #[error("failed to prepare cache database: {0}")]
    Store(#[from] StoreError),

    #[error("invalid metrics address {0:?}")]
    MetricsAddress(String),

    #[error("failed to start metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Create the cache table, dropping the old one first when configured.
pub async fn prepare_store(config: &ProxyConfig) -> Result<(), StartupError> {
    let schema = load_schema(config.cache.schema_path.as_deref()).map_err(StartupError::Schema)?;
    let store = SqliteCacheStore::new(config.cache.database_path.clone())
        .with_busy_timeout(Duration::from_millis(config.cache.busy_timeout_ms));
    store.initialize(&schema, config.cache.reset_on_start).await?;

    tracing::info!(
        database = %config.cache.database_path.display(),
        reset = config.cache.reset_on_start,
        "Cache database ready"
    );
    Ok(())
}

/// Run the proxy until SIGINT or SIGTERM.
pub async fn run(config: ProxyConfig) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        let addr: SocketAddr = config
            .observability
            .metrics_address
            .parse()
            .map_err(|_| StartupError::MetricsAddress(config.observability.metrics_address.clone()))?;
        metrics::init_metrics(addr)?;
    }

    prepare_store(&config).await?;

    let listener = Listener::bind(&config.listener).await?;
    let shutdown = Shutdown::new();
    let server = HttpServer::new(&config);
    let handle = tokio::spawn(server.run(listener, shutdown.subscribe()));

    shutdown_signal().await;
    shutdown.trigger();

    handle.await??;
    tracing::info!("Shutdown complete");
    Ok(())
}

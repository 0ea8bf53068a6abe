//! Mirror Boost Agent
//!
//! Runs the aggregation store behind a local HTTP API and sweeps expired
//! records in the background.

use anyhow::{Context, Result};
use boost_lib::{
    aggregator::{Aggregator, ExpiryWorker},
    health::HealthRegistry,
    observability::StructuredLogger,
    storage::{JsonFileStore, Storage},
};
use mirror_boost_agent::{api, config::AgentConfig};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting mirror-boost-agent");

    let config = AgentConfig::load()?;
    let boost = config.boost();
    info!(
        instance = %config.instance_name,
        threshold_ms = boost.threshold_ms,
        ttl_ms = boost.ttl_ms,
        "Agent configured"
    );

    let health_registry = HealthRegistry::new();

    let logger = StructuredLogger::new(&config.instance_name);
    logger.log_startup(AGENT_VERSION, &config.data_path.display().to_string());

    let store = match JsonFileStore::open(&config.data_path).await {
        Ok(store) => store,
        Err(e) => {
            health_registry.mark_storage_failed(e.to_string()).await;
            return Err(e).with_context(|| format!("failed to open {}", config.data_path.display()));
        }
    };
    health_registry.mark_storage_open().await;
    let storage = Storage::new(Arc::new(store));
    let aggregator = Arc::new(Aggregator::new(boost, storage));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let worker = ExpiryWorker::new(Arc::clone(&aggregator), config.sweep_interval())
        .with_health(health_registry.clone());
    let worker_handle = tokio::spawn(worker.run(shutdown_tx.subscribe()));

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), aggregator));

    let api_port = config.api_port;
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api::serve(api_port, app_state).await {
            error!(error = %e, "API server stopped");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");

    let _ = shutdown_tx.send(());
    if let Err(e) = worker_handle.await {
        error!(error = %e, "Expiry worker ended abnormally");
    }
    api_handle.abort();
    info!("Shutting down");

    Ok(())
}

//! db-hub service host.
//!
//! Wires the core components together: loads the saved-connection registry,
//! constructs the connection manager, schema indexer and query gateway,
//! optionally brings up connections named on the command line, and shuts
//! everything down cleanly on ctrl-c. The HTTP/UI layer mounts on top of the
//! library API.

use clap::Parser;
use db_hub::config::Config;
use db_hub::db::{ConnectionManager, ConnectionRegistry};
use db_hub::indexer::SchemaIndexer;
use db_hub::query::QueryGateway;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();

    init_tracing(&config);

    info!("Starting db-hub v{}", env!("CARGO_PKG_VERSION"));

    let registry = ConnectionRegistry::load(config.connections_path())?;
    let indexer = Arc::new(SchemaIndexer::new());
    let manager = Arc::new(ConnectionManager::new(
        registry,
        indexer.clone(),
        config.connect_timeout_duration(),
    ));
    let _gateway = QueryGateway::new(manager.clone());

    info!(count = manager.config_count(), "Saved connections loaded");

    for id in &config.connect {
        match manager.connect(id).await {
            Ok(()) => info!(connection_id = %id, "Connected at startup"),
            Err(e) => warn!(connection_id = %id, error = %e, "Startup connect failed"),
        }
    }

    info!("Ready; waiting for shutdown signal");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }

    info!("Shutting down");
    manager.close_all().await;
    info!("Shutdown complete");
    Ok(())
}

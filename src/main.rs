//! ovsdb-mirror - live OVSDB replica
//!
//! Connects to an OVSDB server, subscribes to the configured tables and keeps
//! an in-memory replica of them in sync across reconnects.

mod config;

use config::Config;
use ovsdb_client::Client;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Config file from OVSDB_MIRROR_CONFIG or the first argument, env overrides on top
    let path = std::env::var("OVSDB_MIRROR_CONFIG")
        .ok()
        .or_else(|| std::env::args().nth(1));
    let config = match &path {
        Some(path) => {
            let config = Config::load(path).map_err(|e| {
                tracing::error!("Failed to load config: {}", e);
                e
            })?;
            tracing::info!("Loaded config from {}", path);
            config
        }
        None => {
            tracing::info!("Using default configuration");
            Config::from_env()
        }
    };

    if let Err(e) = config.validate() {
        tracing::error!("{}", e);
        return Err(e.into());
    }

    tracing::info!("Starting ovsdb-mirror");
    tracing::info!("  Endpoint: {}", config.connection.endpoint);
    tracing::info!("  Database: {}", config.mirror.database);
    tracing::info!("  Subscription: {} ({})", config.mirror.name, config.mirror.generation);
    match config.connection.keepalive_interval() {
        Some(interval) => tracing::info!("  Keep-alive: every {:?}", interval),
        None => tracing::info!("  Keep-alive: disabled"),
    }

    let client = Client::connect(config.to_client_config()?).await.map_err(|e| {
        tracing::error!("Failed to connect to {}: {}", config.connection.endpoint, e);
        e
    })?;

    let schema = client.get_schema(&config.mirror.database).await?;
    let requests = config.to_requests(schema)?;
    let (replica, mut deliveries) = client.mirror(&config.mirror.name, requests).await?;

    for table in replica.table_names() {
        tracing::info!("  {}: {} rows", table, replica.table_len(&table));
    }
    tracing::info!("Mirroring {} rows", replica.len());

    loop {
        tokio::select! {
            delivery = deliveries.recv() => match delivery {
                Some(delivery) => {
                    tracing::info!(
                        txn = delivery.txn_id.as_deref().unwrap_or("-"),
                        changes = delivery.updates.row_count(),
                        rows = replica.len(),
                        revision = replica.revision(),
                        "Applied update"
                    );
                }
                None => {
                    tracing::warn!("Subscription {} closed", config.mirror.name);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal");
                break;
            }
        }
    }

    if let Err(e) = client.monitor_cancel(&config.mirror.name).await {
        tracing::warn!("Failed to cancel subscription: {}", e);
    }
    client.close().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

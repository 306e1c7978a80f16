//! Ratewire server binary.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ratewire_server::{RateServer, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting Ratewire server");

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let provider = config.build_provider()?;
    info!(provider = provider.name(), pivot = %config.pivot, "Rate provider configured");

    let server = Arc::new(RateServer::new(config.clone(), provider));
    server.start().await?;

    let listener = TcpListener::bind(config.socket_addr()).await?;
    info!(
        listen_addr = %config.listen_addr,
        listen_port = %config.listen_port,
        "Ratewire server running"
    );

    tokio::select! {
        result = server.serve(listener) => {
            if let Err(e) = result {
                error!(error = %e, "Server stopped accepting connections");
            }
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!(error = %e, "Unable to listen for shutdown signal");
            }
            info!("Shutdown signal received");
        }
    }

    server.stop().await?;

    let metrics = server.metrics().snapshot();
    info!(
        connections_total = metrics.connections_total,
        rate_requests = metrics.rate_requests,
        broadcasts = metrics.broadcasts,
        updates_delivered = metrics.updates_delivered,
        updates_dropped = metrics.updates_dropped,
        "Ratewire server shutdown complete"
    );
    debug!(exposition = %server.metrics().to_prometheus(), "Final metrics");
    Ok(())
}

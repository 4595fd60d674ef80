//! Noughts Server
//!
//! Matchmaking and referee server for two-player noughts and crosses.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use noughts::network::{GameServer, ServerConfig};
use noughts::VERSION;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env()?;
    info!("Noughts Server v{}", VERSION);
    info!("Max connections: {}", config.max_connections);
    if let Some(origin) = &config.allowed_origin {
        info!("Accepting WebSocket upgrades from origin {}", origin);
    }

    let server = Arc::new(GameServer::new(config));

    let signal_server = server.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => signal_server.shutdown(),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    server.run().await?;
    info!("Server stopped");
    Ok(())
}

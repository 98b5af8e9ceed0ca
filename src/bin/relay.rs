//! Voice Relay Server
//!
//! Relays proximity voice chat frames between game clients.
//!
//! Usage: `relay [CONFIG_PATH]` (defaults to the platform config directory).

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spatial_voice_relay::{RelayConfig, RelayServer};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(RelayConfig::default_path);

    tracing::info!("Starting voice relay (config: {})", config_path.display());

    let config = RelayConfig::load(&config_path)
        .with_context(|| format!("Invalid configuration in {}", config_path.display()))?;

    if !config.enabled {
        tracing::info!("Voice chat is disabled in config, exiting");
        return Ok(());
    }

    tracing::info!("Codec: {} (opaque to the relay)", config.codec);

    let mut server = RelayServer::new(config)?;
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
            }
            tracing::info!("Shutdown requested");
        })
        .await?;

    Ok(())
}

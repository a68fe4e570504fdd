//! FlowScope - Main Entry Point
//!
//! Starts the engine and runs until interrupted. The hosting controller
//! integration feeds events through the engine handle; run standalone the
//! process simply holds both classifier channels open.

use flowscope::{engine, EngineConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("FlowScope v{}", env!("CARGO_PKG_VERSION"));

    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| "/etc/flowscope/config.json".into());

    let config = EngineConfig::load(&config_path).unwrap_or_else(|_| {
        tracing::warn!("config not found, using defaults");
        EngineConfig::default()
    });

    let handle = engine::start(config).await?;

    tokio::signal::ctrl_c().await?;
    handle.stop().await;

    Ok(())
}

//! # Federation SP Server
//!
//! Main entry point of the SAML service provider.

#![forbid(unsafe_code)]

use fed_server::{Server, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Read the environment first so a .env file can set RUST_LOG
    let config = ServerConfig::from_env()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_level))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Federation SP starting...");

    Server::new(config).await?.run().await
}

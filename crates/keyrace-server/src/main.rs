//! # keyrace coordinator
//!
//! Realtime multiplayer race coordinator for typing duels.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! keyrace
//!
//! # Run with environment variables
//! KEYRACE_PORT=8080 KEYRACE_HOST=0.0.0.0 keyrace
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keyrace=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting keyrace coordinator on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}

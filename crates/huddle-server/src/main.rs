//! # Huddle Server
//!
//! Room-based realtime chat over WebSocket.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! huddle
//!
//! # Run with a custom config file
//! HUDDLE_CONFIG=/path/to/huddle.toml huddle
//!
//! # Override individual settings
//! HUDDLE_PORT=8080 HUDDLE_HOST=0.0.0.0 HUDDLE_AUTH__JWT_SECRET=... huddle
//! ```

use anyhow::Result;
use huddle_server::config::{Config, DEV_JWT_SECRET};
use huddle_server::{handlers, metrics};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "huddle=debug,huddle_server=debug,huddle_core=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load()?;

    if config.auth.jwt_secret == DEV_JWT_SECRET {
        tracing::warn!("Using the development JWT secret; set HUDDLE_AUTH__JWT_SECRET");
    }

    tracing::info!("Starting huddle server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}

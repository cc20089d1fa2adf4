//! # Parley Server
//!
//! Topic-scoped WebSocket chat relay.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings (127.0.0.1:8000)
//! parley
//!
//! # Run with a specific config file
//! parley --config /path/to/parley.toml
//!
//! # Run with environment variables
//! PARLEY_PORT=9000 PARLEY_HOST=0.0.0.0 parley
//!
//! # Override any config key
//! PARLEY__MESSAGES__TTL_SECS=60 parley
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
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match config_path_arg() {
        Some(path) => config::Config::from_file(path)?,
        None => config::Config::load()?,
    };

    tracing::info!(
        "Starting Parley server on {}:{} (message TTL {}s)",
        config.host,
        config.port,
        config.messages.ttl_secs
    );

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}

/// Path given with `--config`, if any.
fn config_path_arg() -> Option<String> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(path.to_string());
        }
    }
    None
}

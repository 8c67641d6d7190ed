//! # causerie-server
//!
//! HTTP front end for the Causerie synchronization core.
//!
//! This binary provides:
//! - **REST API** (axum) for users, conversations, messages, unread counters,
//!   wallpapers and attachment registration
//! - **Server-sent event streams** for per-conversation message updates and
//!   per-user presence

mod api;
mod config;
mod error;

use tracing::info;
use tracing_subscriber::EnvFilter;

use causerie_sync::ConversationManager;

use crate::api::AppState;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("info,causerie_server=debug,causerie_sync=debug")
            }),
        )
        .init();

    info!("Starting Causerie server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the synchronization core
    // -----------------------------------------------------------------------
    let manager = ConversationManager::open(&config.sync)?;

    let app_state = AppState { manager };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

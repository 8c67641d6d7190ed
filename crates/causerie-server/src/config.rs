//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;

use causerie_shared::constants::DEFAULT_HTTP_PORT;
use causerie_sync::SyncConfig;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Synchronization core settings (database, dedup window, listener
    /// buffers).  See [`SyncConfig::from_env`].
    pub sync: SyncConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            sync: SyncConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self {
            sync: SyncConfig::from_env(),
            ..Self::default()
        };

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            match parse_addr(&addr) {
                Some(parsed) => config.http_addr = parsed,
                None => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_addr(raw: &str) -> Option<SocketAddr> {
    raw.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
    }

    #[test]
    fn test_parse_addr() {
        assert_eq!(
            parse_addr(" 127.0.0.1:9000 "),
            Some(([127, 0, 0, 1], 9000).into())
        );
        assert_eq!(parse_addr("localhost"), None);
    }
}

//! Core configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the core can start with zero
//! configuration for local development.

use std::path::PathBuf;
use std::time::Duration;

use causerie_shared::constants::{
    DEFAULT_DEDUP_WINDOW_SECS, DEFAULT_MAX_HANDLE_LEN, DEFAULT_MAX_TEXT_LEN,
    DEFAULT_SUBSCRIBER_BUFFER,
};

/// Where the SQLite database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    /// Platform data directory (`directories`).
    Default,
    /// Explicit file path.
    Path(PathBuf),
    /// Private in-memory database; nothing survives a restart.
    InMemory,
}

/// Synchronization core configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Env: `CAUSERIE_DB_PATH` (`:memory:` selects an in-memory database)
    /// Default: platform data directory.
    pub database: DatabaseLocation,

    /// How long a client request id is remembered for append retries.
    /// Env: `DEDUP_WINDOW_SECS`
    /// Default: 300 s
    pub dedup_window: Duration,

    /// Updates buffered per listener before it is considered lagging and
    /// resynchronised from a snapshot.
    /// Env: `SUBSCRIBER_BUFFER`
    /// Default: 256
    pub subscriber_buffer: usize,

    /// Snapshot attempts made by a lagging or reconnecting listener before
    /// it is disconnected.
    /// Env: `RESYNC_MAX_ATTEMPTS`
    /// Default: 5
    pub resync_max_attempts: u32,

    /// First resync backoff delay; doubled on each attempt.
    /// Env: `RESYNC_BASE_DELAY_MS`
    /// Default: 200 ms
    pub resync_base_delay: Duration,

    /// Maximum text message length in bytes.
    /// Env: `MAX_TEXT_LEN`
    pub max_text_len: usize,

    /// Maximum attachment handle length in bytes.
    /// Env: `MAX_HANDLE_LEN`
    pub max_handle_len: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database: DatabaseLocation::Default,
            dedup_window: Duration::from_secs(DEFAULT_DEDUP_WINDOW_SECS),
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            resync_max_attempts: 5,
            resync_base_delay: Duration::from_millis(200),
            max_text_len: DEFAULT_MAX_TEXT_LEN,
            max_handle_len: DEFAULT_MAX_HANDLE_LEN,
        }
    }
}

impl SyncConfig {
    /// Defaults with an in-memory database.
    pub fn in_memory() -> Self {
        Self {
            database: DatabaseLocation::InMemory,
            ..Self::default()
        }
    }

    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup("CAUSERIE_DB_PATH") {
            config.database = match path.as_str() {
                "" => DatabaseLocation::Default,
                ":memory:" => DatabaseLocation::InMemory,
                _ => DatabaseLocation::Path(PathBuf::from(path)),
            };
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "DEDUP_WINDOW_SECS") {
            config.dedup_window = Duration::from_secs(secs);
        }

        if let Some(n) = parse_var::<usize>(&lookup, "SUBSCRIBER_BUFFER") {
            if n == 0 {
                tracing::warn!("SUBSCRIBER_BUFFER must be positive, using default");
            } else {
                config.subscriber_buffer = n;
            }
        }

        if let Some(n) = parse_var::<u32>(&lookup, "RESYNC_MAX_ATTEMPTS") {
            config.resync_max_attempts = n.max(1);
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "RESYNC_BASE_DELAY_MS") {
            config.resync_base_delay = Duration::from_millis(ms);
        }

        if let Some(n) = parse_var::<usize>(&lookup, "MAX_TEXT_LEN") {
            config.max_text_len = n;
        }

        if let Some(n) = parse_var::<usize>(&lookup, "MAX_HANDLE_LEN") {
            config.max_handle_len = n;
        }

        config
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> SyncConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SyncConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.database, DatabaseLocation::Default);
        assert_eq!(config.dedup_window, Duration::from_secs(300));
        assert_eq!(config.subscriber_buffer, 256);
    }

    #[test]
    fn test_env_overrides() {
        let config = from_pairs(&[
            ("CAUSERIE_DB_PATH", ":memory:"),
            ("DEDUP_WINDOW_SECS", "30"),
            ("SUBSCRIBER_BUFFER", "8"),
            ("RESYNC_BASE_DELAY_MS", "5"),
        ]);
        assert_eq!(config.database, DatabaseLocation::InMemory);
        assert_eq!(config.dedup_window, Duration::from_secs(30));
        assert_eq!(config.subscriber_buffer, 8);
        assert_eq!(config.resync_base_delay, Duration::from_millis(5));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_pairs(&[
            ("DEDUP_WINDOW_SECS", "soon"),
            ("SUBSCRIBER_BUFFER", "0"),
            ("CAUSERIE_DB_PATH", "/var/lib/causerie/chat.db"),
        ]);
        assert_eq!(config.dedup_window, Duration::from_secs(300));
        assert_eq!(config.subscriber_buffer, 256);
        assert_eq!(
            config.database,
            DatabaseLocation::Path(PathBuf::from("/var/lib/causerie/chat.db"))
        );
    }
}

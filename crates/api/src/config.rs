//! Application configuration loaded from environment variables.

use std::time::Duration;

use saga::{ComponentConfig, DEFAULT_LOCK_TIMEOUT};

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `DATABASE_URL` — Postgres connection string; in-memory store when unset
/// - `SAGA_API_MOUNT` — mount point of the saga status routes (default: `"/"`)
/// - `SAGA_LOCK_TIMEOUT_MS` — instance lock timeout (default: `30000`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub saga_api_mount: String,
    pub lock_timeout: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            saga_api_mount: lookup("SAGA_API_MOUNT").unwrap_or(defaults.saga_api_mount),
            lock_timeout: lookup("SAGA_LOCK_TIMEOUT_MS")
                .and_then(|ms| ms.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Saga component options derived from this configuration.
    pub fn component_config(&self) -> ComponentConfig {
        ComponentConfig::new()
            .with_api_mount(self.saga_api_mount.clone())
            .with_lock_timeout(self.lock_timeout)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            saga_api_mount: "/".to_string(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

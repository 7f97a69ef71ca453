//! Server configuration.
//!
//! Configuration is loaded from environment variables with sensible defaults.
//! The service provider itself is described by a JSON document whose path is
//! given by `FED_SP_CONFIG`.

use std::path::PathBuf;
use std::time::Duration;

/// Default name of the browser session cookie.
pub const DEFAULT_SESSION_COOKIE: &str = "FEDSESSION";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server host to bind to.
    pub host: String,

    /// Server port.
    pub port: u16,

    /// Public base URL. Overrides the base URL of the SP configuration.
    pub base_url: Option<String>,

    /// Path of the SP configuration document.
    pub sp_config: PathBuf,

    /// Name of the browser session cookie.
    pub session_cookie: String,

    /// How often expired login and logout contexts are dropped.
    pub eviction_interval: Duration,

    /// Log level.
    pub log_level: String,
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let host = std::env::var("FED_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = match std::env::var("FED_PORT") {
            Ok(port) => port
                .parse()
                .map_err(|e| anyhow::anyhow!("FED_PORT '{port}' is not a port: {e}"))?,
            Err(_) => 8080,
        };

        let base_url = std::env::var("FED_BASE_URL").ok();

        let sp_config = std::env::var("FED_SP_CONFIG")
            .map(PathBuf::from)
            .map_err(|_| anyhow::anyhow!("FED_SP_CONFIG environment variable is required"))?;

        let session_cookie = std::env::var("FED_SESSION_COOKIE")
            .ok()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SESSION_COOKIE.to_string());

        let eviction_interval = std::env::var("FED_EVICTION_INTERVAL")
            .ok()
            .and_then(|v| v.parse().ok())
            .map_or(Duration::from_secs(60), Duration::from_secs);

        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            host,
            port,
            base_url,
            sp_config,
            session_cookie,
            eviction_interval,
            log_level,
        })
    }

    /// Creates a configuration for testing.
    #[must_use]
    pub fn for_testing(sp_config: impl Into<PathBuf>) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0, // Random port
            base_url: None,
            sp_config: sp_config.into(),
            session_cookie: DEFAULT_SESSION_COOKIE.to_string(),
            eviction_interval: Duration::from_secs(60),
            log_level: "debug".to_string(),
        }
    }

    /// Returns the address to bind to.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

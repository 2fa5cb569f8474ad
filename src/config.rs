//! IMAP connection configuration

use crate::error::{Error, Result};
use std::env;
use std::time::Duration;

/// Immutable connection configuration.
///
/// Created by the caller (directly, via the `with_*` setters, or from
/// the environment) and read-only thereafter.
///
/// # Examples
///
/// ```
/// use mailstore::ConnectionConfig;
/// use std::time::Duration;
///
/// let config = ConnectionConfig::new("imap.example.com", "user", "secret")
///     .with_max_retries(5)
///     .with_connect_timeout(Duration::from_secs(10));
/// assert_eq!(config.port, 993);
/// assert!(config.use_tls);
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Implicit TLS (port 993). Plaintext (port 143) when false.
    pub use_tls: bool,
    pub connect_timeout: Duration,
    /// Read/write bound applied to every command round-trip.
    pub socket_timeout: Duration,
    pub max_retries: u32,
    pub initial_retry_delay: Duration,
    pub exponential_backoff: bool,
    pub max_retry_delay: Duration,
    pub keepalive_interval: Duration,
    /// Background health probe cadence. Zero disables the monitor.
    pub health_check_interval: Duration,
    pub monitoring_enabled: bool,
    /// Check sessions out of / return them to the process-wide pool.
    pub use_pool: bool,
    /// Skip TLS certificate verification (self-signed test servers).
    pub accept_invalid_certs: bool,
}

impl ConnectionConfig {
    /// Create a configuration with the standard defaults for `host`.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: 993,
            username: username.into(),
            password: password.into(),
            use_tls: true,
            connect_timeout: Duration::from_secs(30),
            socket_timeout: Duration::from_secs(30),
            max_retries: 3,
            initial_retry_delay: Duration::from_secs(1),
            exponential_backoff: true,
            max_retry_delay: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(300),
            health_check_interval: Duration::from_secs(60),
            monitoring_enabled: true,
            use_pool: false,
            accept_invalid_certs: false,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Reads from `.env` if present. Required variables:
    /// - `MAILSTORE_USERNAME`
    /// - `MAILSTORE_PASSWORD`
    ///
    /// Optional (with defaults):
    /// - `MAILSTORE_HOST` (default: `127.0.0.1`)
    /// - `MAILSTORE_PORT` (default: `993`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a required variable is missing or
    /// the port does not parse.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let host = env::var("MAILSTORE_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("MAILSTORE_PORT")
            .unwrap_or_else(|_| "993".to_string())
            .parse()
            .map_err(|e| Error::Config(format!("Invalid MAILSTORE_PORT: {e}")))?;
        let username = env::var("MAILSTORE_USERNAME")
            .map_err(|_| Error::Config("MAILSTORE_USERNAME not set".into()))?;
        let password = env::var("MAILSTORE_PASSWORD")
            .map_err(|_| Error::Config("MAILSTORE_PASSWORD not set".into()))?;

        Ok(Self::new(host, username, password).with_port(port))
    }

    /// Key identifying this endpoint in the session pool.
    #[must_use]
    pub fn pool_key(&self) -> String {
        format!("{}:{}:{}", self.host, self.port, self.username)
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_initial_retry_delay(mut self, delay: Duration) -> Self {
        self.initial_retry_delay = delay;
        self
    }

    #[must_use]
    pub fn with_exponential_backoff(mut self, enabled: bool) -> Self {
        self.exponential_backoff = enabled;
        self
    }

    #[must_use]
    pub fn with_max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = delay;
        self
    }

    #[must_use]
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    #[must_use]
    pub fn with_monitoring(mut self, enabled: bool) -> Self {
        self.monitoring_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_pool(mut self, use_pool: bool) -> Self {
        self.use_pool = use_pool;
        self
    }

    #[must_use]
    pub fn with_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }
}

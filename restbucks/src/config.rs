//! Configuration management for the Restbucks service.
//!
//! Values come from `RESTBUCKS_*` environment variables (a `.env` file is loaded
//! first when present) and fall back to defaults. A variable that is set but cannot
//! be parsed is an error rather than silently replaced by the default.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set to a value that cannot be parsed
    #[error("Invalid value '{value}' for {key}")]
    Invalid {
        /// Variable name
        key: String,
        /// Raw value
        value: String,
    },
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Order processing configuration
    pub processing: ProcessingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Log level used when `RUST_LOG` is not set (trace, debug, info, warn, error)
    pub log_level: String,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_secs: u64,
    /// How long a request waits for a payment or pickup to complete, in milliseconds
    pub request_timeout_ms: u64,
}

/// Order processing configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Simulated preparation time in milliseconds
    pub preparation_time_ms: u64,
    /// Delay before the listener resubscribes to the event bus, in milliseconds
    pub consumer_retry_ms: u64,
    /// Per-topic buffer of the in-memory event bus
    pub bus_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                log_level: "info".to_string(),
                shutdown_timeout_secs: 30,
                request_timeout_ms: 10_000,
            },
            processing: ProcessingConfig {
                preparation_time_ms: 5_000,
                consumer_retry_ms: 5_000,
                bus_capacity: 256,
            },
        }
    }
}

impl Config {
    /// Load configuration from `.env` and the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a variable is set but unparsable.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "Loaded .env file");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a variable is set but unparsable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let read = Reader { lookup: &lookup };

        Ok(Self {
            server: ServerConfig {
                host: lookup("RESTBUCKS_HOST").unwrap_or(defaults.server.host),
                port: read.parse("RESTBUCKS_PORT", defaults.server.port)?,
                log_level: lookup("RESTBUCKS_LOG_LEVEL").unwrap_or(defaults.server.log_level),
                shutdown_timeout_secs: read.parse(
                    "RESTBUCKS_SHUTDOWN_TIMEOUT_SECS",
                    defaults.server.shutdown_timeout_secs,
                )?,
                request_timeout_ms: read
                    .parse("RESTBUCKS_REQUEST_TIMEOUT_MS", defaults.server.request_timeout_ms)?,
            },
            processing: ProcessingConfig {
                preparation_time_ms: read.parse(
                    "RESTBUCKS_PREPARATION_TIME_MS",
                    defaults.processing.preparation_time_ms,
                )?,
                consumer_retry_ms: read
                    .parse("RESTBUCKS_CONSUMER_RETRY_MS", defaults.processing.consumer_retry_ms)?,
                bus_capacity: read.parse("RESTBUCKS_BUS_CAPACITY", defaults.processing.bus_capacity)?,
            },
        })
    }

    /// `host:port` to bind the HTTP server to.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Graceful shutdown timeout.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Request timeout for payment and pickup.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms)
    }

    /// Simulated preparation time.
    #[must_use]
    pub const fn preparation_time(&self) -> Duration {
        Duration::from_millis(self.processing.preparation_time_ms)
    }

    /// Listener resubscribe delay.
    #[must_use]
    pub const fn consumer_retry_delay(&self) -> Duration {
        Duration::from_millis(self.processing.consumer_retry_ms)
    }
}

struct Reader<'a, F> {
    lookup: &'a F,
}

impl<F> Reader<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match (self.lookup)(key) {
            None => Ok(default),
            Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                value,
            }),
        }
    }
}

//! Configuration for the paynotify service process.
//!
//! Delivery tuning lives in [`paynotify_delivery::DeliveryPolicy`] and is read
//! from the `WEBHOOK_*` variables; this covers the HTTP side only.

use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "paynotify.toml";

/// Service configuration with defaults, file, and environment overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables (highest priority)
/// 2. Configuration file (`paynotify.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// # Example
///
/// ```no_run
/// use paynotify_api::ServiceConfig;
///
/// let config = ServiceConfig::load().expect("Failed to load configuration");
///
/// println!("Server will bind to {}:{}", config.host, config.port);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Server bind address.
    ///
    /// Environment variable: `HOST`
    #[serde(default = "default_host", alias = "HOST")]
    pub host: String,
    /// Server bind port.
    ///
    /// Environment variable: `PORT`
    #[serde(default = "default_port", alias = "PORT")]
    pub port: u16,
    /// HTTP request timeout in seconds.
    ///
    /// Environment variable: `REQUEST_TIMEOUT`
    #[serde(default = "default_request_timeout", alias = "REQUEST_TIMEOUT")]
    pub request_timeout: u64,
    /// Seconds a submitted notification may spend retrying before it is
    /// abandoned.
    ///
    /// Environment variable: `DELIVERY_DEADLINE`
    #[serde(default = "default_delivery_deadline", alias = "DELIVERY_DEADLINE")]
    pub delivery_deadline: u64,
    /// Log filter directives.
    ///
    /// Environment variable: `RUST_LOG`
    #[serde(default = "default_rust_log", alias = "RUST_LOG")]
    pub rust_log: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout: default_request_timeout(),
            delivery_deadline: default_delivery_deadline(),
            rust_log: default_rust_log(),
        }
    }
}

impl ServiceConfig {
    /// Loads configuration from defaults, `paynotify.toml`, and the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns error if a source holds a value of the wrong type or the
    /// merged configuration fails validation.
    pub fn load() -> Result<Self> {
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(""))
            .extract()
            .context("Failed to load service configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Validates configuration values.
    ///
    /// # Errors
    ///
    /// Returns error if a timeout is zero or the bind address is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout == 0 {
            anyhow::bail!("request_timeout must be greater than 0");
        }

        if self.delivery_deadline == 0 {
            anyhow::bail!("delivery_deadline must be greater than 0");
        }

        self.parse_server_addr()?;
        Ok(())
    }

    /// Parses the bind address from host and port.
    ///
    /// # Errors
    ///
    /// Returns error if the host is not an IP address.
    pub fn parse_server_addr(&self) -> Result<SocketAddr> {
        SocketAddr::from_str(&format!("{}:{}", self.host, self.port))
            .with_context(|| format!("Invalid server address: {}:{}", self.host, self.port))
    }

    /// Request timeout enforced on every route.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Retry horizon applied to each submitted notification.
    pub fn delivery_deadline(&self) -> Duration {
        Duration::from_secs(self.delivery_deadline)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

fn default_delivery_deadline() -> u64 {
    600
}

fn default_rust_log() -> String {
    "info,paynotify=debug,tower_http=debug".to_string()
}

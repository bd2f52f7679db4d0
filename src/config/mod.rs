//! Configuration module for the voice relay
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable lookup and parsing
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use voice_relay::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::core::admission::AdmissionLimits;
use crate::core::relay::{ReconnectConfig, SessionSettings, TungsteniteConnector};

mod env;
mod merge;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

/// Default WebSocket path for relayed sessions.
pub const DEFAULT_RELAY_PATH: &str = "/realtime";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {message}")]
    Invalid { name: &'static str, message: String },

    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ConfigError {
    pub(crate) fn invalid(name: &'static str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            name,
            message: message.into(),
        }
    }
}

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Where and how to reach the upstream realtime endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct UpstreamConfig {
    /// `ws://` or `wss://` URL
    pub url: String,
    /// Sent as `Authorization: Bearer <key>`; never forwarded to clients
    pub api_key: String,
    /// Optional `Sec-WebSocket-Protocol`
    pub protocol: Option<String>,
    /// Extra handshake headers, YAML only
    pub headers: Vec<(String, String)>,
}

impl std::fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .field("protocol", &self.protocol)
            .field(
                "headers",
                &self.headers.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Server configuration
///
/// Contains all configuration needed to run the relay, including:
/// - Server settings (host, port, TLS, relay path, CORS)
/// - Upstream endpoint and credential
/// - Admission limits (per-address and global)
/// - Per-session tunables (rate limit, queue, handshake, heartbeat, reconnect)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,
    pub tls: Option<TlsConfig>,
    /// Comma-separated list, or `*`; `None` keeps same-origin only
    pub cors_allowed_origins: Option<String>,
    pub relay_path: String,

    pub upstream: UpstreamConfig,

    // Admission
    pub max_connections_per_ip: usize,
    pub max_connections: Option<usize>,

    // Per-session
    pub max_messages_per_minute: u32,
    pub rate_window_seconds: u64,
    pub outbound_queue_capacity: usize,
    pub handshake_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub reconnect: ReconnectConfig,
}

/// Zeroize secret fields when the configuration is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        self.upstream.api_key.zeroize();
        for (_, value) in self.upstream.headers.iter_mut() {
            value.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables (and `.env`, which
    /// `main` loads first), then validate it.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = merge::merge_config(None)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            queue_capacity: self.outbound_queue_capacity,
            max_messages: self.max_messages_per_minute,
            rate_window: Duration::from_secs(self.rate_window_seconds),
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            heartbeat_timeout: Duration::from_millis(self.heartbeat_timeout_ms),
            reconnect: self.reconnect.clone(),
        }
    }

    pub fn admission_limits(&self) -> AdmissionLimits {
        AdmissionLimits {
            max_per_address: self.max_connections_per_ip,
            max_total: self.max_connections,
        }
    }

    pub fn upstream_connector(&self) -> TungsteniteConnector {
        TungsteniteConnector::new(self.upstream.url.clone(), self.upstream.api_key.clone())
            .with_protocol(self.upstream.protocol.clone())
            .with_headers(self.upstream.headers.clone())
    }
}

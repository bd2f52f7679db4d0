use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use super::ConfigError;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present
/// here override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 3001
///   relay_path: "/realtime"
///   tls:
///     enabled: true
///     cert_path: "/etc/relay/cert.pem"
///     key_path: "/etc/relay/key.pem"
///
/// upstream:
///   url: "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview"
///   api_key: "sk-..."
///   protocol: "realtime"
///   headers:
///     OpenAI-Beta: "realtime=v1"
///
/// security:
///   cors_allowed_origins: "https://app.example.com"
///   max_connections_per_ip: 3
///   max_connections: 1000
///   max_messages_per_minute: 60
///   rate_window_seconds: 60
///
/// session:
///   outbound_queue_capacity: 50
///   handshake_timeout_ms: 15000
///   heartbeat_interval_ms: 30000
///   heartbeat_timeout_ms: 60000
///
/// reconnect:
///   base_delay_ms: 1000
///   max_delay_ms: 30000
///   max_jitter_ms: 1000
///   max_attempts: 5
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub upstream: Option<UpstreamYaml>,
    pub security: Option<SecurityYaml>,
    pub session: Option<SessionYaml>,
    pub reconnect: Option<ReconnectYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub relay_path: Option<String>,
    pub tls: Option<TlsYaml>,
}

/// TLS configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TlsYaml {
    pub enabled: Option<bool>,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

#[derive(Clone, Deserialize, Default)]
#[serde(default)]
pub struct UpstreamYaml {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub protocol: Option<String>,
    pub headers: Option<BTreeMap<String, String>>,
}

impl std::fmt::Debug for UpstreamYaml {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamYaml")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

/// Admission and rate limits from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    pub cors_allowed_origins: Option<String>,
    pub max_connections_per_ip: Option<usize>,
    pub max_connections: Option<usize>,
    pub max_messages_per_minute: Option<u32>,
    pub rate_window_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub outbound_queue_capacity: Option<usize>,
    pub handshake_timeout_ms: Option<u64>,
    pub heartbeat_interval_ms: Option<u64>,
    pub heartbeat_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ReconnectYaml {
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub max_jitter_ms: Option<u64>,
    pub max_attempts: Option<u32>,
}

impl YamlConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config: YamlConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}

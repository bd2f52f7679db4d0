use std::path::PathBuf;

use super::env;
use super::yaml::YamlConfig;
use super::{ConfigError, DEFAULT_RELAY_PATH, ServerConfig, TlsConfig, UpstreamConfig};
use crate::core::admission::DEFAULT_MAX_PER_ADDRESS;
use crate::core::relay::ReconnectConfig;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3001;
const DEFAULT_MAX_MESSAGES_PER_MINUTE: u32 = 60;
const DEFAULT_RATE_WINDOW_SECONDS: u64 = 60;
const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 50;
const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 60_000;

/// Build the final configuration: YAML values first, then environment
/// variables, then defaults.
pub(super) fn merge_config(yaml: Option<YamlConfig>) -> Result<ServerConfig, ConfigError> {
    let yaml = yaml.unwrap_or_default();
    let server = yaml.server.unwrap_or_default();
    let tls = server.tls.clone().unwrap_or_default();
    let upstream = yaml.upstream.unwrap_or_default();
    let security = yaml.security.unwrap_or_default();
    let session = yaml.session.unwrap_or_default();
    let reconnect = yaml.reconnect.unwrap_or_default();
    let reconnect_defaults = ReconnectConfig::default();

    let tls_enabled = tls
        .enabled
        .or(env::parse_bool("TLS_ENABLED")?)
        .unwrap_or(false);
    let tls = if tls_enabled {
        let cert_path = tls
            .cert_path
            .or_else(|| env::var("TLS_CERT_PATH"))
            .ok_or(ConfigError::Missing("TLS_CERT_PATH"))?;
        let key_path = tls
            .key_path
            .or_else(|| env::var("TLS_KEY_PATH"))
            .ok_or(ConfigError::Missing("TLS_KEY_PATH"))?;
        Some(TlsConfig {
            cert_path: PathBuf::from(cert_path),
            key_path: PathBuf::from(key_path),
        })
    } else {
        None
    };

    let url = upstream
        .url
        .or_else(|| env::var("UPSTREAM_URL"))
        .ok_or(ConfigError::Missing("UPSTREAM_URL"))?;
    let api_key = upstream
        .api_key
        .or_else(|| env::var("UPSTREAM_API_KEY"))
        .ok_or(ConfigError::Missing("UPSTREAM_API_KEY"))?;

    Ok(ServerConfig {
        host: server
            .host
            .or_else(|| env::var("HOST"))
            .unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port: pick(server.port, env::parse("PORT")?, DEFAULT_PORT),
        tls,
        cors_allowed_origins: security
            .cors_allowed_origins
            .or_else(|| env::var("CORS_ALLOWED_ORIGINS")),
        relay_path: server
            .relay_path
            .or_else(|| env::var("RELAY_PATH"))
            .unwrap_or_else(|| DEFAULT_RELAY_PATH.to_string()),

        upstream: UpstreamConfig {
            url,
            api_key,
            protocol: upstream.protocol.or_else(|| env::var("UPSTREAM_PROTOCOL")),
            headers: upstream
                .headers
                .map(|headers| headers.into_iter().collect())
                .unwrap_or_default(),
        },

        max_connections_per_ip: pick(
            security.max_connections_per_ip,
            env::parse("MAX_CONNECTIONS_PER_IP")?,
            DEFAULT_MAX_PER_ADDRESS,
        ),
        max_connections: security
            .max_connections
            .or(env::parse("MAX_CONNECTIONS")?),

        max_messages_per_minute: pick(
            security.max_messages_per_minute,
            env::parse("MAX_MESSAGES_PER_MINUTE")?,
            DEFAULT_MAX_MESSAGES_PER_MINUTE,
        ),
        rate_window_seconds: pick(
            security.rate_window_seconds,
            env::parse("RATE_WINDOW_SECONDS")?,
            DEFAULT_RATE_WINDOW_SECONDS,
        ),
        outbound_queue_capacity: pick(
            session.outbound_queue_capacity,
            env::parse("OUTBOUND_QUEUE_CAPACITY")?,
            DEFAULT_OUTBOUND_QUEUE_CAPACITY,
        ),
        handshake_timeout_ms: pick(
            session.handshake_timeout_ms,
            env::parse("HANDSHAKE_TIMEOUT_MS")?,
            DEFAULT_HANDSHAKE_TIMEOUT_MS,
        ),
        heartbeat_interval_ms: pick(
            session.heartbeat_interval_ms,
            env::parse("HEARTBEAT_INTERVAL_MS")?,
            DEFAULT_HEARTBEAT_INTERVAL_MS,
        ),
        heartbeat_timeout_ms: pick(
            session.heartbeat_timeout_ms,
            env::parse("HEARTBEAT_TIMEOUT_MS")?,
            DEFAULT_HEARTBEAT_TIMEOUT_MS,
        ),

        reconnect: ReconnectConfig {
            max_attempts: pick(
                reconnect.max_attempts,
                env::parse("RECONNECT_MAX_ATTEMPTS")?,
                reconnect_defaults.max_attempts,
            ),
            base_delay_ms: pick(
                reconnect.base_delay_ms,
                env::parse("RECONNECT_BASE_DELAY_MS")?,
                reconnect_defaults.base_delay_ms,
            ),
            max_delay_ms: pick(
                reconnect.max_delay_ms,
                env::parse("RECONNECT_MAX_DELAY_MS")?,
                reconnect_defaults.max_delay_ms,
            ),
            max_jitter_ms: pick(
                reconnect.max_jitter_ms,
                env::parse("RECONNECT_MAX_JITTER_MS")?,
                reconnect_defaults.max_jitter_ms,
            ),
        },
    })
}

fn pick<T>(yaml: Option<T>, env: Option<T>, default: T) -> T {
    yaml.or(env).unwrap_or(default)
}

use url::Url;

use super::{ConfigError, ServerConfig};
use crate::core::relay::upstream::LINK_CHANNEL_CAPACITY;

/// Paths the relay already serves itself.
const RESERVED_PATHS: &[&str] = &["/", "/sessions"];

/// Check every bound before the server binds. Any failure is fatal at startup.
pub(super) fn validate(config: &ServerConfig) -> Result<(), ConfigError> {
    validate_upstream(config)?;
    validate_relay_path(&config.relay_path)?;
    validate_tls(config)?;
    validate_limits(config)?;
    validate_timings(config)?;
    Ok(())
}

fn validate_upstream(config: &ServerConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.upstream.url)
        .map_err(|e| ConfigError::invalid("UPSTREAM_URL", e.to_string()))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(ConfigError::invalid(
            "UPSTREAM_URL",
            format!("scheme must be ws or wss, got '{}'", url.scheme()),
        ));
    }
    if url.host_str().is_none() {
        return Err(ConfigError::invalid("UPSTREAM_URL", "missing host"));
    }
    if config.upstream.api_key.trim().is_empty() {
        return Err(ConfigError::Missing("UPSTREAM_API_KEY"));
    }
    Ok(())
}

fn validate_relay_path(path: &str) -> Result<(), ConfigError> {
    if !path.starts_with('/') {
        return Err(ConfigError::invalid(
            "RELAY_PATH",
            format!("'{path}' must start with '/'"),
        ));
    }
    if RESERVED_PATHS.contains(&path) {
        return Err(ConfigError::invalid(
            "RELAY_PATH",
            format!("'{path}' is reserved"),
        ));
    }
    Ok(())
}

fn validate_tls(config: &ServerConfig) -> Result<(), ConfigError> {
    let Some(tls) = &config.tls else {
        return Ok(());
    };
    if !tls.cert_path.exists() {
        return Err(ConfigError::invalid(
            "TLS_CERT_PATH",
            format!("{} does not exist", tls.cert_path.display()),
        ));
    }
    if !tls.key_path.exists() {
        return Err(ConfigError::invalid(
            "TLS_KEY_PATH",
            format!("{} does not exist", tls.key_path.display()),
        ));
    }
    Ok(())
}

fn validate_limits(config: &ServerConfig) -> Result<(), ConfigError> {
    if config.max_connections_per_ip == 0 {
        return Err(ConfigError::invalid(
            "MAX_CONNECTIONS_PER_IP",
            "must be at least 1",
        ));
    }
    if config.max_connections == Some(0) {
        return Err(ConfigError::invalid("MAX_CONNECTIONS", "must be at least 1"));
    }
    if config.max_messages_per_minute == 0 {
        return Err(ConfigError::invalid(
            "MAX_MESSAGES_PER_MINUTE",
            "must be at least 1",
        ));
    }
    if config.rate_window_seconds == 0 {
        return Err(ConfigError::invalid("RATE_WINDOW_SECONDS", "must be at least 1"));
    }
    if config.outbound_queue_capacity == 0 {
        return Err(ConfigError::invalid(
            "OUTBOUND_QUEUE_CAPACITY",
            "must be at least 1",
        ));
    }
    if config.outbound_queue_capacity > LINK_CHANNEL_CAPACITY {
        return Err(ConfigError::invalid(
            "OUTBOUND_QUEUE_CAPACITY",
            format!("must be at most {LINK_CHANNEL_CAPACITY}"),
        ));
    }
    Ok(())
}

fn validate_timings(config: &ServerConfig) -> Result<(), ConfigError> {
    if config.handshake_timeout_ms == 0 {
        return Err(ConfigError::invalid("HANDSHAKE_TIMEOUT_MS", "must be positive"));
    }
    if config.heartbeat_interval_ms == 0 {
        return Err(ConfigError::invalid("HEARTBEAT_INTERVAL_MS", "must be positive"));
    }
    if config.heartbeat_timeout_ms < config.heartbeat_interval_ms {
        return Err(ConfigError::invalid(
            "HEARTBEAT_TIMEOUT_MS",
            format!(
                "{} is shorter than the heartbeat interval ({})",
                config.heartbeat_timeout_ms, config.heartbeat_interval_ms
            ),
        ));
    }

    let reconnect = &config.reconnect;
    if reconnect.base_delay_ms == 0 {
        return Err(ConfigError::invalid("RECONNECT_BASE_DELAY_MS", "must be positive"));
    }
    if reconnect.max_delay_ms < reconnect.base_delay_ms {
        return Err(ConfigError::invalid(
            "RECONNECT_MAX_DELAY_MS",
            format!(
                "{} is below the base delay ({})",
                reconnect.max_delay_ms, reconnect.base_delay_ms
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TlsConfig, UpstreamConfig};
    use crate::core::relay::ReconnectConfig;
    use std::path::PathBuf;

    fn valid_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 3001,
            tls: None,
            cors_allowed_origins: None,
            relay_path: "/realtime".to_string(),
            upstream: UpstreamConfig {
                url: "wss://upstream.example.com/v1/realtime".to_string(),
                api_key: "sk-test".to_string(),
                protocol: None,
                headers: Vec::new(),
            },
            max_connections_per_ip: 3,
            max_connections: None,
            max_messages_per_minute: 60,
            rate_window_seconds: 60,
            outbound_queue_capacity: 50,
            handshake_timeout_ms: 15_000,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 60_000,
            reconnect: ReconnectConfig::default(),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_upstream_scheme_must_be_websocket() {
        let mut config = valid_config();
        config.upstream.url = "https://upstream.example.com".to_string();
        assert!(matches!(
            validate(&config),
            Err(ConfigError::Invalid { name: "UPSTREAM_URL", .. })
        ));

        config.upstream.url = "not a url".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_blank_api_key_rejected() {
        let mut config = valid_config();
        config.upstream.api_key = "  ".to_string();
        assert!(matches!(
            validate(&config),
            Err(ConfigError::Missing("UPSTREAM_API_KEY"))
        ));
    }

    #[test]
    fn test_relay_path_rules() {
        let mut config = valid_config();
        config.relay_path = "realtime".to_string();
        assert!(validate(&config).is_err());

        config.relay_path = "/sessions".to_string();
        assert!(validate(&config).is_err());

        config.relay_path = "/v1/voice".to_string();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_limits_rejected() {
        let cases: Vec<fn(&mut ServerConfig)> = vec![
            |c| c.max_connections_per_ip = 0,
            |c| c.max_connections = Some(0),
            |c| c.max_messages_per_minute = 0,
            |c| c.rate_window_seconds = 0,
            |c| c.outbound_queue_capacity = 0,
            |c| c.handshake_timeout_ms = 0,
            |c| c.heartbeat_interval_ms = 0,
            |c| c.reconnect.base_delay_ms = 0,
        ];
        for mutate in cases {
            let mut config = valid_config();
            mutate(&mut config);
            assert!(validate(&config).is_err());
        }
    }

    #[test]
    fn test_queue_capacity_bounded_by_link_channel() {
        let mut config = valid_config();
        config.outbound_queue_capacity = LINK_CHANNEL_CAPACITY;
        assert!(validate(&config).is_ok());

        config.outbound_queue_capacity = LINK_CHANNEL_CAPACITY + 1;
        assert!(matches!(
            validate(&config),
            Err(ConfigError::Invalid { name: "OUTBOUND_QUEUE_CAPACITY", .. })
        ));
    }

    #[test]
    fn test_heartbeat_timeout_not_below_interval() {
        let mut config = valid_config();
        config.heartbeat_timeout_ms = 10_000;
        assert!(matches!(
            validate(&config),
            Err(ConfigError::Invalid { name: "HEARTBEAT_TIMEOUT_MS", .. })
        ));
    }

    #[test]
    fn test_max_delay_not_below_base() {
        let mut config = valid_config();
        config.reconnect.max_delay_ms = 500;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_tls_files_must_exist() {
        let mut config = valid_config();
        config.tls = Some(TlsConfig {
            cert_path: PathBuf::from("/nonexistent/cert.pem"),
            key_path: PathBuf::from("/nonexistent/key.pem"),
        });
        assert!(matches!(
            validate(&config),
            Err(ConfigError::Invalid { name: "TLS_CERT_PATH", .. })
        ));
    }
}

//! Server Startup Tests
//!
//! HTTP surface checks through `tower::ServiceExt::oneshot`, without
//! binding a socket.

use axum::{Router, body::Body, http::Request};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::util::ServiceExt;

use voice_relay::{ReconnectConfig, ServerConfig, config::UpstreamConfig, routes, state::AppState};

/// Helper function to create a minimal test configuration
fn create_minimal_config(cors: Option<&str>) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 3001,
        tls: None,
        cors_allowed_origins: cors.map(str::to_string),
        relay_path: "/realtime".to_string(),
        upstream: UpstreamConfig {
            url: "ws://127.0.0.1:9/v1/realtime".to_string(),
            api_key: "test-key".to_string(),
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

fn create_app(cors: Option<&str>) -> Router {
    routes::create_app(AppState::new(create_minimal_config(cors)))
}

async fn get_json(app: Router, uri: &str) -> (http::StatusCode, http::HeaderMap, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, headers, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_health_check() {
    let (status, _, body) = get_json(create_app(None), "/").await;
    assert_eq!(status, http::StatusCode::OK);
    assert_eq!(body["status"], "OK");
}

#[tokio::test]
async fn test_security_headers_present() {
    let (_, headers, _) = get_json(create_app(None), "/").await;
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
}

#[tokio::test]
async fn test_sessions_snapshot_starts_empty() {
    let (status, _, body) = get_json(create_app(None), "/sessions").await;
    assert_eq!(status, http::StatusCode::OK);
    assert_eq!(body["count"], 0);
    assert_eq!(body["sessions"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_cors_wildcard_allows_any_origin() {
    let response = create_app(Some("*"))
        .oneshot(
            Request::builder()
                .uri("/")
                .header("origin", "https://app.example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        response.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );
}

#[tokio::test]
async fn test_relay_path_requires_upgrade() {
    let response = create_app(None)
        .oneshot(
            Request::builder()
                .uri("/realtime")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_unknown_path_is_not_found() {
    let response = create_app(None)
        .oneshot(Request::builder().uri("/voices").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), http::StatusCode::NOT_FOUND);
}

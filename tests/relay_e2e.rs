//! End-to-End Relay Tests
//!
//! Runs the real server on a loopback port against a loopback mock
//! upstream and drives it with a tokio-tungstenite client.

mod mock_upstream;

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use mock_upstream::MockUpstream;
use voice_relay::{ReconnectConfig, ServerConfig, routes, state::AppState};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Helper function to create a test configuration pointing at `upstream_url`
fn create_test_config(upstream_url: String) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        tls: None,
        cors_allowed_origins: None,
        relay_path: "/realtime".to_string(),
        upstream: voice_relay::config::UpstreamConfig {
            url: upstream_url,
            api_key: "test-upstream-key".to_string(),
            protocol: None,
            headers: Vec::new(),
        },
        max_connections_per_ip: 3,
        max_connections: None,
        max_messages_per_minute: 60,
        rate_window_seconds: 60,
        outbound_queue_capacity: 50,
        handshake_timeout_ms: 2_000,
        heartbeat_interval_ms: 30_000,
        heartbeat_timeout_ms: 60_000,
        reconnect: ReconnectConfig {
            max_attempts: 5,
            base_delay_ms: 20,
            max_delay_ms: 200,
            max_jitter_ms: 0,
        },
    }
}

/// Serve the app on an ephemeral port and return its address.
async fn start_relay(config: ServerConfig) -> SocketAddr {
    let state = AppState::new(config);
    let app = routes::create_app(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

async fn connect(relay: SocketAddr) -> Client {
    let (ws, _) = timeout(STEP_TIMEOUT, connect_async(format!("ws://{relay}/realtime")))
        .await
        .expect("connect timed out")
        .expect("connect failed");
    ws
}

async fn next_message(ws: &mut Client) -> Message {
    loop {
        let message = timeout(STEP_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for message")
            .expect("stream ended")
            .expect("websocket error");
        if !matches!(message, Message::Ping(_) | Message::Pong(_)) {
            return message;
        }
    }
}

async fn expect_status(ws: &mut Client, expected: &str) -> Value {
    match next_message(ws).await {
        Message::Text(text) => {
            let json: Value = serde_json::from_str(text.as_str()).unwrap();
            assert_eq!(json["type"], "status", "unexpected frame: {json}");
            assert_eq!(json["status"], expected, "unexpected status: {json}");
            json
        }
        other => panic!("expected {expected} status, got {other:?}"),
    }
}

async fn expect_close(ws: &mut Client, expected: u16) {
    match next_message(ws).await {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), expected),
        other => panic!("expected close {expected}, got {other:?}"),
    }
}

async fn connected_client(relay: SocketAddr) -> Client {
    let mut ws = connect(relay).await;
    expect_status(&mut ws, "connecting").await;
    expect_status(&mut ws, "connected").await;
    ws
}

#[tokio::test]
async fn test_frames_relayed_both_ways() {
    let upstream = MockUpstream::start().await;
    let relay = start_relay(create_test_config(upstream.url())).await;
    let mut ws = connected_client(relay).await;

    ws.send(Message::Text(r#"{"type":"session.update"}"#.into()))
        .await
        .unwrap();
    match next_message(&mut ws).await {
        Message::Text(text) => assert_eq!(text.as_str(), r#"{"type":"session.update"}"#),
        other => panic!("expected echoed text, got {other:?}"),
    }

    ws.send(Message::Binary(vec![0u8, 1, 2, 3].into()))
        .await
        .unwrap();
    match next_message(&mut ws).await {
        Message::Binary(data) => assert_eq!(data.as_ref(), [0u8, 1, 2, 3]),
        other => panic!("expected echoed binary, got {other:?}"),
    }

    let auth = upstream.state.authorization.lock().clone();
    assert_eq!(auth, vec![Some("Bearer test-upstream-key".to_string())]);
}

#[tokio::test]
async fn test_status_envelope_has_timestamp() {
    let upstream = MockUpstream::start().await;
    let relay = start_relay(create_test_config(upstream.url())).await;
    let mut ws = connect(relay).await;

    let status = expect_status(&mut ws, "connecting").await;
    assert!(status["message"].is_string());
    assert!(status["timestamp"].as_str().unwrap().contains('T'));
}

#[tokio::test]
async fn test_fatal_upstream_close_reaches_client() {
    let upstream = MockUpstream::start().await;
    let relay = start_relay(create_test_config(upstream.url())).await;
    let mut ws = connected_client(relay).await;

    ws.send(Message::Text("close:1008".into())).await.unwrap();

    let status = expect_status(&mut ws, "error").await;
    assert!(status["message"].as_str().unwrap().contains("1008"));
    expect_close(&mut ws, 1008).await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(upstream.connections(), 1);
}

#[tokio::test]
async fn test_recoverable_upstream_close_reconnects() {
    let upstream = MockUpstream::start().await;
    let relay = start_relay(create_test_config(upstream.url())).await;
    let mut ws = connected_client(relay).await;

    ws.send(Message::Text("close:1000".into())).await.unwrap();

    expect_status(&mut ws, "reconnecting").await;
    expect_status(&mut ws, "connecting").await;
    expect_status(&mut ws, "connected").await;
    assert_eq!(upstream.connections(), 2);

    // Same client socket keeps relaying over the new link
    ws.send(Message::Text("after-reconnect".into())).await.unwrap();
    match next_message(&mut ws).await {
        Message::Text(text) => assert_eq!(text.as_str(), "after-reconnect"),
        other => panic!("expected echoed text, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unreachable_upstream_exhausts_retries() {
    // Bind and drop to get a port nobody listens on
    let closed_port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let mut config = create_test_config(format!("ws://127.0.0.1:{closed_port}/v1/realtime"));
    config.reconnect.max_attempts = 2;
    let relay = start_relay(config).await;

    let mut ws = connect(relay).await;
    expect_status(&mut ws, "connecting").await;
    for _ in 0..2 {
        expect_status(&mut ws, "disconnected").await;
        expect_status(&mut ws, "reconnecting").await;
        expect_status(&mut ws, "connecting").await;
    }
    expect_status(&mut ws, "disconnected").await;
    expect_status(&mut ws, "error").await;
    expect_close(&mut ws, 1011).await;
}

#[tokio::test]
async fn test_fourth_connection_from_same_address_refused() {
    let upstream = MockUpstream::start().await;
    let relay = start_relay(create_test_config(upstream.url())).await;

    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(connected_client(relay).await);
    }

    let mut refused = connect(relay).await;
    expect_close(&mut refused, 1008).await;

    let body: Value = http_get(relay, "/sessions").await;
    assert_eq!(body["count"], 3);
    assert_eq!(body["sessions"].as_array().unwrap().len(), 3);
    assert!(
        body["sessions"]
            .as_array()
            .unwrap()
            .iter()
            .all(|s| s["address"] == "127.0.0.1" && s["state"] == "connected")
    );

    // Closing one client frees a slot
    let mut first = clients.remove(0);
    first.close(None).await.unwrap();
    drop(first);

    let mut admitted = None;
    for _ in 0..50 {
        let body: Value = http_get(relay, "/sessions").await;
        if body["count"] == 2 {
            admitted = Some(connected_client(relay).await);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(admitted.is_some(), "slot was never released");
}

/// Minimal HTTP/1.1 GET over a raw socket, returning the JSON body.
async fn http_get(relay: SocketAddr, path: &str) -> Value {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut stream = TcpStream::connect(relay).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: {relay}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    timeout(STEP_TIMEOUT, stream.read_to_end(&mut raw))
        .await
        .unwrap()
        .unwrap();
    let response = String::from_utf8(raw).unwrap();
    let (head, body) = response.split_once("\r\n\r\n").unwrap();
    assert!(head.starts_with("HTTP/1.1 200"), "unexpected response: {head}");
    serde_json::from_str(body).unwrap()
}

//! Loopback WebSocket mock of the upstream realtime endpoint
//!
//! Echoes text and binary frames back to the relay. A text frame of the
//! form `close:<code>` makes the mock close the connection with that code
//! instead, so tests can drive both recoverable and fatal closures.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::{
    Message,
    handshake::server::{ErrorResponse, Request, Response},
    protocol::{CloseFrame, frame::coding::CloseCode},
};

/// Mock upstream state shared with tests
#[derive(Default)]
pub struct MockUpstreamState {
    pub connection_count: AtomicUsize,
    pub authorization: Mutex<Vec<Option<String>>>,
}

pub struct MockUpstream {
    pub addr: SocketAddr,
    pub state: Arc<MockUpstreamState>,
    task: JoinHandle<()>,
}

impl MockUpstream {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock upstream");
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(MockUpstreamState::default());

        let accept_state = state.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = accept_state.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(stream, state).await;
                });
            }
        });

        Self { addr, state, task }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/v1/realtime", self.addr)
    }

    pub fn connections(&self) -> usize {
        self.state.connection_count.load(Ordering::SeqCst)
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<MockUpstreamState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let header_state = state.clone();
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let auth = request
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        header_state.authorization.lock().push(auth);
        header_state.connection_count.fetch_add(1, Ordering::SeqCst);
        Ok(response)
    };

    let mut ws_stream = accept_hdr_async(stream, callback).await?;

    while let Some(msg) = ws_stream.next().await {
        match msg? {
            Message::Text(text) => {
                if let Some(code) = text.as_str().strip_prefix("close:") {
                    let code: u16 = code.trim().parse()?;
                    ws_stream
                        .close(Some(CloseFrame {
                            code: CloseCode::from(code),
                            reason: "mock close".into(),
                        }))
                        .await?;
                    break;
                }
                ws_stream.send(Message::Text(text)).await?;
            }
            Message::Binary(data) => {
                ws_stream.send(Message::Binary(data)).await?;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    Ok(())
}

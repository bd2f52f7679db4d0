//! Upstream transport: the connector seam and the per-link I/O task.
//!
//! A session never talks to the upstream socket directly. Each connection
//! attempt is an [`UpstreamLink`]: a spawned task that performs the
//! handshake, then pumps frames in both directions and reports everything
//! it sees back into the session mailbox tagged with the link's generation.
//! Replacing a link is just dropping the old handle and spawning a new one;
//! late events from the old task carry a stale generation and are ignored.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use http::{HeaderName, HeaderValue, header::AUTHORIZATION};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{
    self, Message,
    client::IntoClientRequest,
    protocol::{CloseFrame, frame::coding::CloseCode},
};
use zeroize::Zeroizing;

use super::close_code;
use super::events::ManagerEvent;
use super::messages::Frame;

/// Command channel depth for one link. Outbound queues may not be larger.
pub const LINK_CHANNEL_CAPACITY: usize = 256;

/// Errors raised while opening or using an upstream link.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The upstream request could not be built
    #[error("Invalid upstream request: {0}")]
    InvalidRequest(String),

    /// The handshake response refused our credentials
    #[error("Upstream rejected credentials (HTTP {0})")]
    Unauthorized(u16),

    /// TCP/TLS/WebSocket handshake failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
}

pub type UpstreamSink = Pin<Box<dyn Sink<Message, Error = tungstenite::Error> + Send>>;
pub type UpstreamSource = Pin<Box<dyn Stream<Item = Result<Message, tungstenite::Error>> + Send>>;

/// Opens duplex connections to the upstream endpoint.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    async fn connect(&self) -> Result<(UpstreamSink, UpstreamSource), UpstreamError>;
}

// =============================================================================
// tokio-tungstenite connector
// =============================================================================

/// Connects with tokio-tungstenite, adding the bearer credential.
pub struct TungsteniteConnector {
    url: String,
    api_key: Zeroizing<String>,
    protocol: Option<String>,
    headers: Vec<(String, String)>,
}

impl TungsteniteConnector {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: Zeroizing::new(api_key.into()),
            protocol: None,
            headers: Vec::new(),
        }
    }

    /// Request a `Sec-WebSocket-Protocol`.
    pub fn with_protocol(mut self, protocol: Option<String>) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    fn build_request(&self) -> Result<http::Request<()>, UpstreamError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| UpstreamError::InvalidRequest(e.to_string()))?;

        let headers = request.headers_mut();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key.as_str()))
            .map_err(|e| UpstreamError::InvalidRequest(format!("api key: {e}")))?;
        headers.insert(AUTHORIZATION, bearer);

        if let Some(protocol) = &self.protocol {
            let value = HeaderValue::from_str(protocol)
                .map_err(|e| UpstreamError::InvalidRequest(format!("protocol: {e}")))?;
            headers.insert(http::header::SEC_WEBSOCKET_PROTOCOL, value);
        }

        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| UpstreamError::InvalidRequest(format!("header {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| UpstreamError::InvalidRequest(format!("header {name}: {e}")))?;
            headers.insert(name, value);
        }

        Ok(request)
    }
}

impl fmt::Debug for TungsteniteConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TungsteniteConnector")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .field("protocol", &self.protocol)
            .field("headers", &self.headers.len())
            .finish()
    }
}

#[async_trait]
impl UpstreamConnector for TungsteniteConnector {
    async fn connect(&self) -> Result<(UpstreamSink, UpstreamSource), UpstreamError> {
        let request = self.build_request()?;

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| match e {
                tungstenite::Error::Http(response)
                    if matches!(response.status().as_u16(), 401 | 403) =>
                {
                    UpstreamError::Unauthorized(response.status().as_u16())
                }
                other => UpstreamError::ConnectionFailed(other.to_string()),
            })?;

        let (sink, source) = ws_stream.split();
        Ok((Box::pin(sink), Box::pin(source)))
    }
}

// =============================================================================
// Link
// =============================================================================

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(data) => Message::Binary(data),
        }
    }
}

#[derive(Debug)]
enum LinkCommand {
    Send(Frame),
    Ping,
    Close,
}

/// Handle to one upstream connection attempt, owned by exactly one session.
#[derive(Debug)]
pub struct UpstreamLink {
    generation: u64,
    commands: mpsc::Sender<LinkCommand>,
    open: Arc<AtomicBool>,
    /// Set when a send was refused on a full channel; the task clears it
    /// and reports `UpstreamDrained` once the channel is empty again.
    backlogged: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl UpstreamLink {
    /// Start connecting. Progress arrives in the mailbox as
    /// `UpstreamOpened`, `UpstreamFrame`, `UpstreamPong`, `UpstreamDrained`,
    /// `UpstreamClosed` or `UpstreamError`, each tagged with `generation`.
    pub fn spawn(
        generation: u64,
        connector: Arc<dyn UpstreamConnector>,
        events: mpsc::Sender<ManagerEvent>,
    ) -> Self {
        let (commands, command_rx) = mpsc::channel(LINK_CHANNEL_CAPACITY);
        let open = Arc::new(AtomicBool::new(false));
        let backlogged = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(run_link(
            generation,
            connector,
            command_rx,
            LinkFlags {
                open: open.clone(),
                backlogged: backlogged.clone(),
            },
            events,
        ));

        Self {
            generation,
            commands,
            open,
            backlogged,
            task: Some(task),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Handshake done and the socket has not closed.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.commands.is_closed()
    }

    /// Queue a frame for the socket writer, handing it back if the link
    /// cannot take it. A refusal on a full channel is followed by an
    /// `UpstreamDrained` event once the writer catches up.
    pub fn try_send(&self, frame: Frame) -> Result<(), Frame> {
        if !self.is_open() {
            return Err(frame);
        }
        // Raised before reserving so the writer cannot empty the channel
        // between the refusal and the flag
        self.backlogged.store(true, Ordering::SeqCst);
        match self.commands.try_reserve() {
            Ok(permit) => {
                permit.send(LinkCommand::Send(frame));
                self.backlogged.store(false, Ordering::SeqCst);
                Ok(())
            }
            Err(_) => Err(frame),
        }
    }

    /// Send a transport-level ping.
    pub fn ping(&self) -> bool {
        self.is_open() && self.commands.try_send(LinkCommand::Ping).is_ok()
    }

    /// Close gracefully with a 1000 close frame. A link that never finished
    /// its handshake, or whose writer is gone, is aborted instead.
    pub fn close(mut self) {
        let was_open = self.open.swap(false, Ordering::SeqCst);
        if was_open && self.commands.try_send(LinkCommand::Close).is_ok() {
            // Let the task deliver the close frame and exit on its own
            self.task.take();
        }
    }

    /// Tear the task down immediately, mid-handshake included.
    pub fn abort(self) {
        drop(self);
    }
}

impl Drop for UpstreamLink {
    fn drop(&mut self) {
        self.open.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct LinkFlags {
    open: Arc<AtomicBool>,
    backlogged: Arc<AtomicBool>,
}

async fn run_link(
    generation: u64,
    connector: Arc<dyn UpstreamConnector>,
    mut commands: mpsc::Receiver<LinkCommand>,
    flags: LinkFlags,
    events: mpsc::Sender<ManagerEvent>,
) {
    let LinkFlags { open, backlogged } = flags;
    let (mut sink, mut source) = match connector.connect().await {
        Ok(pair) => pair,
        Err(UpstreamError::Unauthorized(status)) => {
            let _ = events
                .send(ManagerEvent::UpstreamClosed {
                    generation,
                    code: Some(close_code::POLICY_VIOLATION),
                    reason: format!("upstream rejected credentials (HTTP {status})"),
                })
                .await;
            return;
        }
        Err(e) => {
            let _ = events
                .send(ManagerEvent::UpstreamError {
                    generation,
                    error: e.to_string(),
                })
                .await;
            return;
        }
    };

    open.store(true, Ordering::SeqCst);
    if events
        .send(ManagerEvent::UpstreamOpened { generation })
        .await
        .is_err()
    {
        return;
    }

    let outcome = loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(LinkCommand::Send(frame)) => {
                    if let Err(e) = sink.send(frame.into()).await {
                        break ManagerEvent::UpstreamError { generation, error: e.to_string() };
                    }
                    if commands.is_empty()
                        && backlogged.swap(false, Ordering::SeqCst)
                        && events.send(ManagerEvent::UpstreamDrained { generation }).await.is_err()
                    {
                        return;
                    }
                }
                Some(LinkCommand::Ping) => {
                    if let Err(e) = sink.send(Message::Ping(Bytes::new())).await {
                        break ManagerEvent::UpstreamError { generation, error: e.to_string() };
                    }
                    if commands.is_empty()
                        && backlogged.swap(false, Ordering::SeqCst)
                        && events.send(ManagerEvent::UpstreamDrained { generation }).await.is_err()
                    {
                        return;
                    }
                }
                Some(LinkCommand::Close) | None => {
                    open.store(false, Ordering::SeqCst);
                    let close = Message::Close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: "".into(),
                    }));
                    if let Err(e) = sink.send(close).await {
                        tracing::debug!(generation, "Upstream close frame not delivered: {}", e);
                    }
                    let _ = sink.close().await;
                    // Closed by the session; nothing to report
                    return;
                }
            },

            message = source.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let event = ManagerEvent::UpstreamFrame {
                        generation,
                        frame: Frame::Text(text.as_str().to_string()),
                    };
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    let event = ManagerEvent::UpstreamFrame {
                        generation,
                        frame: Frame::Binary(data),
                    };
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = sink.send(Message::Pong(data)).await {
                        tracing::error!(generation, "Failed to send pong upstream: {}", e);
                    }
                }
                Some(Ok(Message::Pong(_))) => {
                    if events.send(ManagerEvent::UpstreamPong { generation }).await.is_err() {
                        return;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.as_str().to_string()),
                        None => (None, String::new()),
                    };
                    break ManagerEvent::UpstreamClosed { generation, code, reason };
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => {
                    break ManagerEvent::UpstreamError { generation, error: e.to_string() };
                }
                None => {
                    break ManagerEvent::UpstreamClosed {
                        generation,
                        code: Some(close_code::ABNORMAL),
                        reason: "upstream stream ended".to_string(),
                    };
                }
            },
        }
    };

    open.store(false, Ordering::SeqCst);
    let _ = events.send(outcome).await;
}

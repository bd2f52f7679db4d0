//! Per-session connection manager.
//!
//! One [`ConnectionManager`] runs as one tokio task for the whole life of a
//! client connection. It owns the upstream link, the outbound queue, the
//! rate limiter, the reconnect policy, the liveness monitor and the
//! handshake timer, and it is the only thing that ever mutates them: every
//! input (client frames, upstream activity, timer firings, shutdown) arrives
//! as a [`ManagerEvent`] in its mailbox and is handled to completion before
//! the next one is looked at.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::close_code::{self, CloseClass};
use super::events::{MAILBOX_CAPACITY, ManagerEvent};
use super::liveness::{
    DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_HEARTBEAT_TIMEOUT, LivenessCheck, LivenessMonitor,
};
use super::messages::{
    ClientMessage, ClientRoute, ControlDisposition, ControlHandler, Frame, RelayOutgoingMessage,
    SessionStatus, decode_client_frame,
};
use super::outbound_queue::{DEFAULT_QUEUE_CAPACITY, OutboundQueue};
use super::rate_limiter::{DEFAULT_MAX_MESSAGES, DEFAULT_WINDOW, RateLimiter};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::state::ConnectionState;
use super::timer::Timer;
use super::upstream::{UpstreamConnector, UpstreamLink};

/// Default deadline for the upstream handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Tunables for one session, derived from the server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub queue_capacity: usize,
    pub max_messages: u32,
    pub rate_window: Duration,
    pub handshake_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub reconnect: ReconnectConfig,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_messages: DEFAULT_MAX_MESSAGES,
            rate_window: DEFAULT_WINDOW,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Latest externally visible state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionView {
    pub state: ConnectionState,
    pub queue_depth: usize,
}

/// Cloneable handle for talking to a running manager.
#[derive(Debug, Clone)]
pub struct ManagerHandle {
    events: mpsc::Sender<ManagerEvent>,
    view: watch::Receiver<SessionView>,
}

impl ManagerHandle {
    /// Mailbox sender, for transport readers.
    pub fn events(&self) -> mpsc::Sender<ManagerEvent> {
        self.events.clone()
    }

    /// Post an event; false once the session has ended.
    pub async fn send(&self, event: ManagerEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    /// Administrative close. Never blocks; a session with a full mailbox
    /// is skipped and will end with its client.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> bool {
        self.events
            .try_send(ManagerEvent::Shutdown {
                code,
                reason: reason.into(),
            })
            .is_ok()
    }

    pub fn view(&self) -> SessionView {
        *self.view.borrow()
    }
}

pub struct ConnectionManager {
    session_id: String,
    settings: SessionSettings,
    state: ConnectionState,

    client: mpsc::Sender<ClientRoute>,
    client_open: bool,

    link: Option<UpstreamLink>,
    generation: u64,
    connector: Arc<dyn UpstreamConnector>,
    control: Arc<dyn ControlHandler>,

    queue: OutboundQueue<Frame>,
    limiter: RateLimiter,
    reconnect: ReconnectPolicy,
    liveness: LivenessMonitor,
    handshake: Timer,

    events_tx: mpsc::Sender<ManagerEvent>,
    events_rx: mpsc::Receiver<ManagerEvent>,
    view: watch::Sender<SessionView>,
    torn_down: bool,
}

impl ConnectionManager {
    pub fn new(
        session_id: impl Into<String>,
        settings: SessionSettings,
        connector: Arc<dyn UpstreamConnector>,
        control: Arc<dyn ControlHandler>,
        client: mpsc::Sender<ClientRoute>,
    ) -> (Self, ManagerHandle) {
        let (events_tx, events_rx) = mpsc::channel(MAILBOX_CAPACITY);
        let (view, view_rx) = watch::channel(SessionView {
            state: ConnectionState::Disconnected,
            queue_depth: 0,
        });

        let manager = Self {
            session_id: session_id.into(),
            state: ConnectionState::Disconnected,
            client,
            client_open: true,
            link: None,
            generation: 0,
            connector,
            control,
            queue: OutboundQueue::new(settings.queue_capacity),
            limiter: RateLimiter::new(settings.max_messages, settings.rate_window),
            reconnect: ReconnectPolicy::new(settings.reconnect.clone()),
            liveness: LivenessMonitor::new(settings.heartbeat_interval, settings.heartbeat_timeout),
            handshake: Timer::new(),
            events_tx: events_tx.clone(),
            events_rx,
            view,
            torn_down: false,
            settings,
        };
        let handle = ManagerHandle {
            events: events_tx,
            view: view_rx,
        };

        (manager, handle)
    }

    /// Open upstream and drain the mailbox until the session ends.
    pub async fn run(mut self) {
        self.open().await;

        while !self.torn_down {
            let Some(event) = self.events_rx.recv().await else {
                break;
            };
            self.handle_event(event).await;
        }

        self.teardown();
        debug!(session_id = %self.session_id, state = %self.state, "Session loop finished");
    }

    async fn handle_event(&mut self, event: ManagerEvent) {
        match event {
            ManagerEvent::ClientFrame(frame) => self.on_client_frame(frame).await,
            ManagerEvent::ClientClosed => self.on_client_close(),

            ManagerEvent::UpstreamOpened { generation } if self.is_current(generation) => {
                self.on_upstream_open().await
            }
            ManagerEvent::UpstreamFrame { generation, frame } if self.is_current(generation) => {
                self.on_upstream_frame(frame).await
            }
            ManagerEvent::UpstreamPong { generation } if self.is_current(generation) => {
                self.liveness.record_pong()
            }
            ManagerEvent::UpstreamDrained { generation } if self.is_current(generation) => {
                if self.state == ConnectionState::Connected && !self.queue.is_empty() {
                    self.flush_queue();
                }
            }
            ManagerEvent::UpstreamClosed {
                generation,
                code,
                reason,
            } if self.is_current(generation) => self.on_upstream_close(code, &reason).await,
            ManagerEvent::UpstreamError { generation, error } if self.is_current(generation) => {
                self.on_upstream_error(&error).await
            }

            ManagerEvent::HandshakeTimeout { token } => {
                if self.handshake.fire(token) && self.state == ConnectionState::Connecting {
                    let timeout = self.settings.handshake_timeout;
                    self.on_upstream_error(&format!(
                        "upstream handshake timed out after {}ms",
                        timeout.as_millis()
                    ))
                    .await;
                }
            }
            ManagerEvent::HeartbeatTick { token } => match self.liveness.on_tick(token) {
                LivenessCheck::Ignored => {}
                LivenessCheck::Probe => {
                    if let Some(link) = &self.link
                        && !link.ping()
                    {
                        debug!(session_id = %self.session_id, "Heartbeat ping not queued");
                    }
                }
                LivenessCheck::Stale { silent_for } => {
                    self.on_upstream_error(&format!(
                        "no pong from upstream for {}s",
                        silent_for.as_secs()
                    ))
                    .await;
                }
            },
            ManagerEvent::RetryDue { token } => {
                if self.reconnect.fire(token) {
                    info!(
                        session_id = %self.session_id,
                        attempt = self.reconnect.attempts(),
                        "Reconnecting to upstream"
                    );
                    self.open().await;
                }
            }

            ManagerEvent::Shutdown { code, reason } => self.close(code, &reason).await,

            stale => {
                debug!(session_id = %self.session_id, event = ?stale, "Discarding event from replaced upstream link");
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.link
            .as_ref()
            .is_some_and(|link| link.generation() == generation)
    }

    // =========================================================================
    // Upstream side
    // =========================================================================

    /// Start an upstream connection attempt.
    ///
    /// No-op while connecting or connected, once failed, and after teardown.
    pub async fn open(&mut self) {
        if self.torn_down || self.state.is_active() || self.state.is_terminal() {
            return;
        }

        self.set_state(ConnectionState::Connecting);
        self.send_status(SessionStatus::Connecting, "Connecting to upstream")
            .await;

        self.generation += 1;
        self.link = Some(UpstreamLink::spawn(
            self.generation,
            self.connector.clone(),
            self.events_tx.clone(),
        ));
        self.handshake
            .arm(self.settings.handshake_timeout, &self.events_tx, |token| {
                ManagerEvent::HandshakeTimeout { token }
            });
    }

    async fn on_upstream_open(&mut self) {
        self.handshake.cancel();
        self.set_state(ConnectionState::Connected);
        self.reconnect.reset();
        self.liveness.start(&self.events_tx);

        let flushed = self.flush_queue();
        info!(
            session_id = %self.session_id,
            generation = self.generation,
            flushed,
            "Upstream connected"
        );

        self.send_status(SessionStatus::Connected, "Connected to upstream")
            .await;
    }

    async fn on_upstream_frame(&mut self, frame: Frame) {
        if !self.send_client(ClientRoute::Frame(frame)).await {
            debug!(session_id = %self.session_id, "Client gone, dropping upstream frame");
        }
    }

    async fn on_upstream_close(&mut self, code: Option<u16>, reason: &str) {
        self.liveness.stop();
        self.handshake.cancel();
        self.link = None;

        match close_code::classify(code) {
            CloseClass::Recoverable => {
                info!(
                    session_id = %self.session_id,
                    code = ?code,
                    reason,
                    "Upstream closed, will reconnect"
                );
                self.schedule_reconnect(code).await;
            }
            CloseClass::Fatal => {
                let message = close_code::describe(code, reason);
                warn!(session_id = %self.session_id, code = ?code, "Upstream closed fatally: {}", message);
                self.fail(close_code::client_close_code(code), message).await;
            }
        }
    }

    async fn on_upstream_error(&mut self, error: &str) {
        warn!(session_id = %self.session_id, "Upstream connection error: {}", error);

        self.liveness.stop();
        self.handshake.cancel();
        if let Some(link) = self.link.take() {
            link.abort();
        }

        self.set_state(ConnectionState::Disconnected);
        self.send_status(SessionStatus::Disconnected, "Upstream connection lost")
            .await;
        self.schedule_reconnect(None).await;
    }

    async fn schedule_reconnect(&mut self, code: Option<u16>) {
        if !self.reconnect.should_retry() {
            let attempts = self.reconnect.attempts();
            warn!(session_id = %self.session_id, attempts, "Reconnect attempts exhausted");
            self.fail(
                close_code::client_close_code(code),
                format!("Upstream unavailable after {attempts} reconnect attempts"),
            )
            .await;
            return;
        }

        self.set_state(ConnectionState::Reconnecting);
        let delay = self.reconnect.schedule_retry(&self.events_tx);
        let attempt = self.reconnect.attempts();
        let max = self.reconnect.max_attempts();
        debug!(
            session_id = %self.session_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduled upstream reconnect"
        );
        self.send_status(
            SessionStatus::Reconnecting,
            format!(
                "Reconnecting in {}ms (attempt {attempt}/{max})",
                delay.as_millis()
            ),
        )
        .await;
    }

    /// Terminal failure: report, close the client and stop.
    async fn fail(&mut self, code: u16, message: String) {
        self.set_state(ConnectionState::Failed);
        self.send_status(SessionStatus::Error, message.clone()).await;
        self.close_client(code, message).await;
        self.teardown();
    }

    /// Hand queued frames to the link in order until it refuses one.
    fn flush_queue(&mut self) -> usize {
        let Some(link) = self.link.as_ref() else {
            return 0;
        };
        let delivered = self.queue.flush(|frame| link.try_send(frame));
        self.publish();
        delivered
    }

    // =========================================================================
    // Client side
    // =========================================================================

    async fn on_client_frame(&mut self, frame: Frame) {
        if self.torn_down || self.state.is_terminal() {
            return;
        }

        if !self.limiter.admit() {
            debug!(
                session_id = %self.session_id,
                count = self.limiter.count(),
                max = self.limiter.max_messages(),
                "Rate limit exceeded, dropping client frame"
            );
            return;
        }

        let frame = match decode_client_frame(frame) {
            ClientMessage::Passthrough(frame) => frame,
            ClientMessage::Control(envelope) => match self.control.on_control(&envelope).await {
                ControlDisposition::Forward => envelope.frame,
                ControlDisposition::Consumed => return,
                ControlDisposition::Respond(frames) => {
                    for frame in frames {
                        self.send_client(ClientRoute::Frame(frame)).await;
                    }
                    return;
                }
            },
        };

        self.forward_or_enqueue(frame);
    }

    fn forward_or_enqueue(&mut self, frame: Frame) {
        let connected = self.state == ConnectionState::Connected;

        // Queued frames go first
        let frame = match &self.link {
            Some(link) if connected && self.queue.is_empty() => match link.try_send(frame) {
                Ok(()) => return,
                Err(frame) => frame,
            },
            _ => frame,
        };

        if self.queue.enqueue(frame).is_some() {
            debug!(
                session_id = %self.session_id,
                capacity = self.queue.capacity(),
                evicted = self.queue.evicted(),
                "Outbound queue full, dropped oldest frame"
            );
        }

        if connected {
            self.flush_queue();
        } else {
            self.publish();
        }
    }

    fn on_client_close(&mut self) {
        info!(session_id = %self.session_id, "Client disconnected");
        self.client_open = false;
        self.teardown();
    }

    /// Administrative shutdown: close the client socket, then tear down.
    pub async fn close(&mut self, code: u16, reason: &str) {
        info!(session_id = %self.session_id, code, reason, "Closing session");
        self.close_client(code, reason.to_string()).await;
        self.teardown();
    }

    async fn close_client(&mut self, code: u16, reason: String) {
        if self.send_client(ClientRoute::Close { code, reason }).await {
            self.client_open = false;
        }
    }

    async fn send_status(&mut self, status: SessionStatus, message: impl Into<String>) {
        let outgoing = RelayOutgoingMessage::status(status, message);
        self.send_client(ClientRoute::Outgoing(outgoing)).await;
    }

    async fn send_client(&mut self, route: ClientRoute) -> bool {
        if !self.client_open {
            return false;
        }
        if self.client.send(route).await.is_err() {
            self.client_open = false;
            return false;
        }
        true
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Release every resource the session holds. Idempotent.
    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        self.liveness.stop();
        self.handshake.cancel();
        self.reconnect.cancel();
        if let Some(link) = self.link.take() {
            link.close();
        }
        self.queue.clear();

        if self.state != ConnectionState::Failed {
            self.set_state(ConnectionState::Disconnected);
        } else {
            self.publish();
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!(session_id = %self.session_id, from = %self.state, to = %state, "State transition");
            self.state = state;
        }
        self.publish();
    }

    fn publish(&self) {
        self.view.send_replace(SessionView {
            state: self.state,
            queue_depth: self.queue.len(),
        });
    }
}

//! Session mailbox events.
//!
//! Everything that can change a session happens by posting one of these
//! into its mailbox: client socket reads, upstream link activity, timer
//! firings and administrative shutdown. The session drains them one at a
//! time, which serializes all of its handlers.

use super::messages::Frame;

/// Mailbox depth for one session.
pub const MAILBOX_CAPACITY: usize = 1024;

#[derive(Debug)]
pub enum ManagerEvent {
    /// Data frame read from the client socket
    ClientFrame(Frame),
    /// Client socket closed or errored
    ClientClosed,

    /// Upstream handshake completed for link `generation`
    UpstreamOpened { generation: u64 },
    /// Data frame read from upstream
    UpstreamFrame { generation: u64, frame: Frame },
    /// Transport-level pong from upstream
    UpstreamPong { generation: u64 },
    /// Link command channel emptied after refusing a frame
    UpstreamDrained { generation: u64 },
    /// Upstream sent a close frame or the stream ended
    UpstreamClosed {
        generation: u64,
        code: Option<u16>,
        reason: String,
    },
    /// Upstream connect or I/O failure
    UpstreamError { generation: u64, error: String },

    /// Handshake deadline elapsed
    HandshakeTimeout { token: u64 },
    /// Liveness probe interval elapsed
    HeartbeatTick { token: u64 },
    /// Backoff delay elapsed
    RetryDue { token: u64 },

    /// Administrative close of the whole session
    Shutdown { code: u16, reason: String },
}

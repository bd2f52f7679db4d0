//! Connection state for a relayed client session.

use serde::Serialize;
use std::fmt;

/// Lifecycle state of one client session's upstream link.
///
/// ```text
/// Disconnected --open--> Connecting --upstream open--> Connected
///      ^                     |  ^                         |
///      |                     |  +--------retry----- Reconnecting <--recoverable close/error
///      +--client closes------+--------------------------- |
/// Connecting | Connected --fatal close / retries exhausted--> Failed (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No upstream link and no attempt in flight
    #[default]
    Disconnected,
    /// Upstream handshake in progress
    Connecting,
    /// Upstream link open and relaying
    Connected,
    /// Waiting for the backoff delay before the next attempt
    Reconnecting,
    /// Terminal: no further attempts are made
    Failed,
}

impl ConnectionState {
    /// `Failed` is never left once entered.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Failed)
    }

    /// True while an upstream link is open or being opened.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Connected
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Reconnecting => write!(f, "Reconnecting"),
            ConnectionState::Failed => write!(f, "Failed"),
        }
    }
}

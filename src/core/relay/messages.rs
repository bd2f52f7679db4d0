//! Relay frame types, client-bound status envelopes and the client frame
//! decode step.
//!
//! The relay is payload-agnostic with one exception: client text frames
//! that carry a JSON control envelope for the orchestrator or the VAD
//! collaborator are recognised by their `type` prefix and handed to a
//! [`ControlHandler`]. Anything that does not decode as such an envelope is
//! opaque and relayed unchanged.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// `type` prefix of envelopes bound for the conversation orchestrator.
pub const ORCHESTRATOR_PREFIX: &str = "orchestrator.";

/// `type` prefix of envelopes bound for voice-activity detection.
pub const VAD_PREFIX: &str = "vad.";

// =============================================================================
// Frames
// =============================================================================

/// One WebSocket data frame. The kind is preserved across the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl Frame {
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Frame::Text(text)
    }
}

impl From<&str> for Frame {
    fn from(text: &str) -> Self {
        Frame::Text(text.to_string())
    }
}

impl From<Bytes> for Frame {
    fn from(data: Bytes) -> Self {
        Frame::Binary(data)
    }
}

// =============================================================================
// Outgoing (relay -> client)
// =============================================================================

/// Session status reported to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
    Error,
}

/// Messages the relay itself originates. All other client-bound traffic is
/// upstream pass-through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RelayOutgoingMessage {
    #[serde(rename = "status")]
    Status {
        status: SessionStatus,
        message: String,
        /// RFC 3339 UTC
        timestamp: String,
    },
}

impl RelayOutgoingMessage {
    pub fn status(status: SessionStatus, message: impl Into<String>) -> Self {
        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        RelayOutgoingMessage::Status {
            status,
            message: message.into(),
            timestamp,
        }
    }
}

/// Routing for everything sent to the client socket.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRoute {
    /// Pass-through frame from upstream (or a control reply)
    Frame(Frame),
    /// Relay-originated message, serialized as JSON text
    Outgoing(RelayOutgoingMessage),
    /// Close the client socket
    Close { code: u16, reason: String },
}

// =============================================================================
// Incoming (client -> relay) decode
// =============================================================================

/// Collaborator a control envelope is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Orchestrator,
    Vad,
}

/// A decoded control envelope together with the frame it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlEnvelope {
    pub kind: ControlKind,
    /// Full `type` value, prefix included
    pub message_type: String,
    pub body: serde_json::Value,
    pub frame: Frame,
}

/// Result of the decode step.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Control(ControlEnvelope),
    Passthrough(Frame),
}

/// Split a client frame into a control envelope or opaque pass-through.
///
/// Only a JSON object with a string `type` under a control prefix is a
/// control envelope. Everything else falls through to pass-through.
pub fn decode_client_frame(frame: Frame) -> ClientMessage {
    let Frame::Text(text) = &frame else {
        return ClientMessage::Passthrough(frame);
    };

    let Ok(body) = serde_json::from_str::<serde_json::Value>(text) else {
        return ClientMessage::Passthrough(frame);
    };
    let Some(message_type) = body
        .as_object()
        .and_then(|object| object.get("type"))
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
    else {
        return ClientMessage::Passthrough(frame);
    };

    let kind = if message_type.starts_with(ORCHESTRATOR_PREFIX) {
        ControlKind::Orchestrator
    } else if message_type.starts_with(VAD_PREFIX) {
        ControlKind::Vad
    } else {
        return ClientMessage::Passthrough(frame);
    };

    ClientMessage::Control(ControlEnvelope {
        kind,
        message_type,
        body,
        frame,
    })
}

// =============================================================================
// Control handler seam
// =============================================================================

/// What the session does with a control envelope after the handler saw it.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlDisposition {
    /// Relay the original frame upstream like any other frame
    Forward,
    /// Handled locally; nothing goes upstream
    Consumed,
    /// Handled locally; send these frames back to the client
    Respond(Vec<Frame>),
}

/// Hook for the orchestrator and VAD collaborators.
#[async_trait]
pub trait ControlHandler: Send + Sync {
    async fn on_control(&self, envelope: &ControlEnvelope) -> ControlDisposition;
}

/// Default handler: every control envelope is relayed upstream unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardControl;

#[async_trait]
impl ControlHandler for ForwardControl {
    async fn on_control(&self, envelope: &ControlEnvelope) -> ControlDisposition {
        tracing::debug!(
            message_type = %envelope.message_type,
            "Forwarding control envelope upstream"
        );
        ControlDisposition::Forward
    }
}

//! Session relay engine.
//!
//! Leaves first: [`rate_limiter`], [`outbound_queue`], [`liveness`] and
//! [`reconnect`] are composed by the per-session [`manager`], which talks
//! to the upstream endpoint through [`upstream`].

pub mod close_code;
pub mod events;
pub mod liveness;
pub mod manager;
pub mod messages;
pub mod outbound_queue;
pub mod rate_limiter;
pub mod reconnect;
pub mod state;
pub mod timer;
pub mod upstream;

pub use close_code::CloseClass;
pub use events::ManagerEvent;
pub use liveness::{LivenessCheck, LivenessMonitor};
pub use manager::{ConnectionManager, ManagerHandle, SessionSettings, SessionView};
pub use messages::{
    ClientMessage, ClientRoute, ControlDisposition, ControlEnvelope, ControlHandler, ControlKind,
    ForwardControl, Frame, RelayOutgoingMessage, SessionStatus, decode_client_frame,
};
pub use outbound_queue::OutboundQueue;
pub use rate_limiter::RateLimiter;
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use state::ConnectionState;
pub use upstream::{TungsteniteConnector, UpstreamConnector, UpstreamError, UpstreamLink};

//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check and session snapshot endpoints
//! - `relay` - Client WebSocket relayed to the upstream endpoint

pub mod api;
pub mod relay;

pub use relay::relay_handler;

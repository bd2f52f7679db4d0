//! Relay WebSocket handler
//!
//! Each accepted socket becomes one relay session. The client speaks the
//! upstream protocol directly; frames pass through unchanged in both
//! directions. The relay only adds its own `status` messages:
//!
//! ```json
//! {"type": "status", "status": "reconnecting", "message": "Reconnecting in 1000ms (attempt 1/5)", "timestamp": "2025-01-01T00:00:00Z"}
//! ```
//!
//! Refused connections are closed with code 1008 right after the upgrade.

mod handler;

pub use handler::relay_handler;

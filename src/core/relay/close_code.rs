//! Upstream close-code taxonomy.
//!
//! Upstream disconnects fall into two buckets: transient closures that the
//! relay retries with backoff, and policy/quota/auth closures that end the
//! session. The recoverable set is fixed:
//!
//! | Code | Meaning |
//! |------|---------|
//! | 1000 | Normal closure |
//! | 1001 | Going away |
//! | 1005 | No status received |
//! | 1006 | Abnormal closure (no close frame) |
//! | 1011 | Internal server error |
//!
//! Every other code is fatal.

/// Normal closure.
pub const NORMAL: u16 = 1000;
/// Endpoint going away.
pub const GOING_AWAY: u16 = 1001;
/// Close frame carried no status code.
pub const NO_STATUS: u16 = 1005;
/// Connection dropped without a close frame.
pub const ABNORMAL: u16 = 1006;
/// Policy violation; also used for admission refusals.
pub const POLICY_VIOLATION: u16 = 1008;
/// Server-side internal error.
pub const INTERNAL_ERROR: u16 = 1011;

const RECOVERABLE: [u16; 5] = [NORMAL, GOING_AWAY, NO_STATUS, ABNORMAL, INTERNAL_ERROR];

/// How an upstream closure is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseClass {
    /// Retry with backoff
    Recoverable,
    /// Fail the session and close the client
    Fatal,
}

/// Classify an upstream close code. A missing code is treated as 1005.
pub fn classify(code: Option<u16>) -> CloseClass {
    let code = code.unwrap_or(NO_STATUS);
    if RECOVERABLE.contains(&code) {
        CloseClass::Recoverable
    } else {
        CloseClass::Fatal
    }
}

/// Codes that may appear on the wire in a close frame.
///
/// 1005, 1006 and 1015 are reserved for local reporting and 1004 is
/// unassigned, so they can never be forwarded to the client as-is.
pub fn is_sendable(code: u16) -> bool {
    match code {
        1000..=1003 | 1007..=1014 => true,
        3000..=4999 => true,
        _ => false,
    }
}

/// The code to close the client with when forwarding an upstream code.
pub fn client_close_code(code: Option<u16>) -> u16 {
    match code {
        Some(code) if is_sendable(code) => code,
        _ => INTERNAL_ERROR,
    }
}

/// Human-readable explanation for a fatal upstream closure.
pub fn describe(code: Option<u16>, reason: &str) -> String {
    let lower = reason.to_ascii_lowercase();
    let summary = if lower.contains("quota") || lower.contains("billing") {
        "Upstream quota or billing limit reached"
    } else {
        match code {
            Some(POLICY_VIOLATION) => "Upstream rejected the session (authentication or policy)",
            Some(1002) => "Upstream reported a protocol error",
            Some(1003) => "Upstream does not accept this data type",
            Some(1007) => "Upstream received invalid payload data",
            Some(1009) => "Message too large for upstream",
            Some(1010) => "Upstream required an unsupported extension",
            Some(1013) => "Upstream is temporarily overloaded",
            Some(4000..=4999) => "Upstream closed the session",
            _ => "Upstream connection closed",
        }
    };

    match (code, reason.trim()) {
        (Some(code), "") => format!("{summary} (code {code})"),
        (Some(code), reason) => format!("{summary} (code {code}): {reason}"),
        (None, "") => summary.to_string(),
        (None, reason) => format!("{summary}: {reason}"),
    }
}

//! Reconnection policy: exponential backoff with jitter under an attempt cap.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

use super::events::ManagerEvent;
use super::timer::Timer;

/// Configuration for automatic reconnection after an upstream failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Attempts allowed per outage before the session fails.
    /// Default: 5
    pub max_attempts: u32,

    /// Delay before the first retry (milliseconds).
    /// Default: 1000ms
    pub base_delay_ms: u64,

    /// Upper bound for any retry delay (milliseconds).
    /// Default: 30000ms
    pub max_delay_ms: u64,

    /// Upper bound of the random jitter added at each doubling (milliseconds).
    /// Default: 1000ms
    pub max_jitter_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            max_jitter_ms: 1000,
        }
    }
}

/// Per-session retry bookkeeping.
///
/// The delay only grows within one outage:
/// `delay' = min(delay * 2 + jitter, max_delay)`. Both the attempt counter
/// and the delay go back to their starting values on every successful open.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempts: u32,
    delay_ms: u64,
    timer: Timer,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        let delay_ms = config.base_delay_ms.min(config.max_delay_ms);
        Self {
            config,
            attempts: 0,
            delay_ms,
            timer: Timer::new(),
        }
    }

    pub fn should_retry(&self) -> bool {
        self.attempts < self.config.max_attempts
    }

    /// Arm the retry timer for the current delay and advance the backoff.
    ///
    /// Any pending retry is cancelled first so at most one is ever in
    /// flight. Returns the delay that was scheduled.
    pub fn schedule_retry(&mut self, events: &mpsc::Sender<ManagerEvent>) -> Duration {
        self.attempts += 1;
        let delay = Duration::from_millis(self.delay_ms);
        self.timer
            .arm(delay, events, |token| ManagerEvent::RetryDue { token });
        self.advance_delay();
        delay
    }

    /// Accept a retry firing if it belongs to the pending timer.
    pub fn fire(&mut self, token: u64) -> bool {
        self.timer.fire(token)
    }

    /// Cancel a pending retry. Idempotent.
    pub fn cancel(&mut self) {
        self.timer.cancel();
    }

    /// Called once per successful upstream open.
    pub fn reset(&mut self) {
        self.cancel();
        self.attempts = 0;
        self.delay_ms = self.config.base_delay_ms.min(self.config.max_delay_ms);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    fn advance_delay(&mut self) {
        let jitter = if self.config.max_jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.config.max_jitter_ms)
        } else {
            0
        };
        self.delay_ms = self
            .delay_ms
            .saturating_mul(2)
            .saturating_add(jitter)
            .min(self.config.max_delay_ms);
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(ReconnectConfig::default())
    }
}

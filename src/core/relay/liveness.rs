//! Heartbeat monitor for the upstream link.
//!
//! Some proxies and NATs silently drop a connection without ever delivering
//! a close frame. While the link is connected the monitor ticks on a fixed
//! interval; each tick either asks the session to send a ping or, when no
//! pong has been seen for longer than the timeout, reports the link stale.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::events::ManagerEvent;

/// Default probe interval.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Default silence tolerated before the link is declared dead.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(60);

/// Outcome of one heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessCheck {
    /// Tick from a stopped or replaced monitor
    Ignored,
    /// Link healthy; send a ping
    Probe,
    /// No pong within the timeout; the monitor has stopped itself
    Stale { silent_for: Duration },
}

#[derive(Debug)]
pub struct LivenessMonitor {
    interval: Duration,
    timeout: Duration,
    last_pong: Instant,
    ticker: Option<JoinHandle<()>>,
    token: u64,
}

impl LivenessMonitor {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            last_pong: Instant::now(),
            ticker: None,
            token: 0,
        }
    }

    /// Start ticking. Restarts cleanly if already running.
    pub fn start(&mut self, events: &mpsc::Sender<ManagerEvent>) {
        self.stop();
        self.token = self.token.wrapping_add(1);
        self.last_pong = Instant::now();

        let token = self.token;
        let period = self.interval;
        let events = events.clone();
        self.ticker = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if events.send(ManagerEvent::HeartbeatTick { token }).await.is_err() {
                    break;
                }
            }
        }));
    }

    /// Idempotent; safe from any state.
    pub fn stop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    pub fn record_pong(&mut self) {
        self.record_pong_at(Instant::now());
    }

    pub fn record_pong_at(&mut self, now: Instant) {
        self.last_pong = now;
    }

    pub fn on_tick(&mut self, token: u64) -> LivenessCheck {
        self.on_tick_at(token, Instant::now())
    }

    pub fn on_tick_at(&mut self, token: u64, now: Instant) -> LivenessCheck {
        if !self.is_running() || token != self.token {
            return LivenessCheck::Ignored;
        }

        let silent_for = now.saturating_duration_since(self.last_pong);
        if silent_for > self.timeout {
            self.stop();
            LivenessCheck::Stale { silent_for }
        } else {
            LivenessCheck::Probe
        }
    }
}

impl Default for LivenessMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_HEARTBEAT_TIMEOUT)
    }
}

impl Drop for LivenessMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

//! Cancellable one-shot timers that post into a session mailbox.
//!
//! A timer never touches session state; it only delivers an event tagged
//! with the token it was armed with. The session accepts the event through
//! [`Timer::fire`], which rejects firings from a timer that has since been
//! cancelled or re-armed, even if the event was already sitting in the
//! mailbox when the cancellation happened.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::events::ManagerEvent;

#[derive(Debug, Default)]
pub struct Timer {
    handle: Option<JoinHandle<()>>,
    token: u64,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel any pending firing, then schedule `make(token)` after `after`.
    pub fn arm<F>(&mut self, after: Duration, events: &mpsc::Sender<ManagerEvent>, make: F) -> u64
    where
        F: FnOnce(u64) -> ManagerEvent + Send + 'static,
    {
        self.cancel();
        self.token = self.token.wrapping_add(1);
        let token = self.token;
        let events = events.clone();

        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            // The session may already be gone
            let _ = events.send(make(token)).await;
        }));

        token
    }

    /// Idempotent.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Accept a firing if it belongs to the currently armed timer.
    ///
    /// Disarms the timer on success.
    pub fn fire(&mut self, token: u64) -> bool {
        if self.handle.is_some() && token == self.token {
            self.handle = None;
            true
        } else {
            false
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timer = Timer::new();
        let token = timer.arm(Duration::from_secs(15), &tx, |token| {
            ManagerEvent::HandshakeTimeout { token }
        });

        tokio::time::sleep(Duration::from_secs(14)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        match rx.recv().await {
            Some(ManagerEvent::HandshakeTimeout { token: fired }) => {
                assert_eq!(fired, token);
                assert!(timer.fire(fired));
                // Disarmed after firing
                assert!(!timer.fire(fired));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_delivers() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timer = Timer::new();
        timer.arm(Duration::from_secs(1), &tx, |token| ManagerEvent::RetryDue { token });
        timer.cancel();
        timer.cancel();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_rejects_stale_token() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timer = Timer::new();
        let first = timer.arm(Duration::from_millis(10), &tx, |token| {
            ManagerEvent::RetryDue { token }
        });

        // Let the first firing reach the mailbox before re-arming
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = timer.arm(Duration::from_secs(1), &tx, |token| {
            ManagerEvent::RetryDue { token }
        });

        assert_ne!(first, second);
        assert!(matches!(rx.recv().await, Some(ManagerEvent::RetryDue { token }) if token == first));
        assert!(!timer.fire(first));
        assert!(timer.fire(second));
    }
}

//! Per-connection message-rate guard.
//!
//! A fixed window that resets once it has fully elapsed. Every observed
//! frame bumps the counter, including frames that end up rejected, so a
//! sustained flood keeps itself throttled instead of getting a fresh
//! allowance the moment it slows down.

use std::time::Duration;
use tokio::time::Instant;

/// Default per-window cap.
pub const DEFAULT_MAX_MESSAGES: u32 = 60;

/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RateLimiter {
    max_messages: u32,
    window: Duration,
    count: u32,
    window_start: Instant,
}

impl RateLimiter {
    pub fn new(max_messages: u32, window: Duration) -> Self {
        Self::new_at(max_messages, window, Instant::now())
    }

    /// Limiter whose first window opens at `now`.
    pub fn new_at(max_messages: u32, window: Duration, now: Instant) -> Self {
        Self {
            max_messages,
            window,
            count: 0,
            window_start: now,
        }
    }

    /// Record one frame and report whether it may be relayed.
    pub fn admit(&mut self) -> bool {
        self.admit_at(Instant::now())
    }

    pub fn admit_at(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.window_start) > self.window {
            self.count = 0;
            self.window_start = now;
        }

        self.count = self.count.saturating_add(1);
        self.count <= self.max_messages
    }

    /// Frames observed in the current window.
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn max_messages(&self) -> u32 {
        self.max_messages
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGES, DEFAULT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sixty_first_frame_is_rejected() {
        let start = Instant::now();
        let mut limiter = RateLimiter::new_at(DEFAULT_MAX_MESSAGES, DEFAULT_WINDOW, start);

        let admitted = (0..61)
            .filter(|i| limiter.admit_at(start + Duration::from_millis(*i * 10)))
            .count();

        assert_eq!(admitted, 60);
        assert_eq!(limiter.count(), 61);
    }

    #[test]
    fn test_window_resets_after_expiry() {
        let start = Instant::now();
        let mut limiter = RateLimiter::new_at(DEFAULT_MAX_MESSAGES, DEFAULT_WINDOW, start);

        for _ in 0..61 {
            limiter.admit_at(start);
        }
        assert!(!limiter.admit_at(start + Duration::from_secs(30)));

        let later = start + Duration::from_secs(61);
        let admitted = (0..61).filter(|_| limiter.admit_at(later)).count();
        assert_eq!(admitted, 60);
    }

    #[test]
    fn test_window_boundary_is_exclusive() {
        let start = Instant::now();
        let mut limiter = RateLimiter::new_at(1, Duration::from_secs(60), start);

        assert!(limiter.admit_at(start));
        // Exactly 60s elapsed is still the same window
        assert!(!limiter.admit_at(start + Duration::from_secs(60)));
        assert!(limiter.admit_at(start + Duration::from_secs(60) + Duration::from_millis(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_measured_from_construction() {
        let mut limiter = RateLimiter::new(1, Duration::from_secs(60));

        assert!(limiter.admit());
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(!limiter.admit());
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(limiter.admit());
    }

    #[test]
    fn test_rejected_frames_keep_counting() {
        let start = Instant::now();
        let mut limiter = RateLimiter::new_at(2, Duration::from_secs(60), start);

        assert!(limiter.admit_at(start));
        assert!(limiter.admit_at(start));
        for _ in 0..10 {
            assert!(!limiter.admit_at(start));
        }
        assert_eq!(limiter.count(), 12);
    }
}

//! Deterministic clock for simulation
//!
//! TigerStyle: Explicit time control, no system time dependencies.

use async_trait::async_trait;
use perch_core::io::TimeProvider;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Deterministic simulation clock
///
/// Time only advances when told to. Sleepers park until the clock has been
/// advanced past their deadline.
#[derive(Debug, Clone)]
pub struct SimClock {
    /// Current time in milliseconds since epoch
    current_time_ms: Arc<AtomicU64>,
    /// Notify waiters when time advances
    notify: Arc<Notify>,
}

impl SimClock {
    /// Create a new SimClock starting at a specific millisecond timestamp
    pub fn from_millis(ms: u64) -> Self {
        Self {
            current_time_ms: Arc::new(AtomicU64::new(ms)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Get the current time in milliseconds since epoch
    pub fn now_ms(&self) -> u64 {
        self.current_time_ms.load(Ordering::SeqCst)
    }

    /// Advance time by the given number of milliseconds
    pub fn advance_ms(&self, ms: u64) {
        self.current_time_ms.fetch_add(ms, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Wait until the clock reaches `deadline_ms`
    pub async fn sleep_until_ms(&self, deadline_ms: u64) {
        loop {
            // Register interest before checking so an advance in between is not lost
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.now_ms() >= deadline_ms {
                return;
            }
            notified.await;
        }
    }

    /// Check if a deadline (in ms) has passed
    pub fn is_past_ms(&self, deadline_ms: u64) -> bool {
        self.now_ms() >= deadline_ms
    }
}

impl Default for SimClock {
    fn default() -> Self {
        // 2024-01-01 00:00:00 UTC
        Self::from_millis(1_704_067_200_000)
    }
}

#[async_trait]
impl TimeProvider for SimClock {
    fn now_ms(&self) -> u64 {
        SimClock::now_ms(self)
    }

    async fn sleep_ms(&self, ms: u64) {
        let deadline = self.now_ms().saturating_add(ms);
        self.sleep_until_ms(deadline).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advance_ms() {
        let clock = SimClock::from_millis(0);
        assert_eq!(clock.now_ms(), 0);

        clock.advance_ms(1000);
        assert_eq!(clock.now_ms(), 1000);

        clock.advance_ms(500);
        assert_eq!(clock.now_ms(), 1500);
    }

    #[test]
    fn test_clock_is_past() {
        let clock = SimClock::from_millis(1000);

        assert!(clock.is_past_ms(500));
        assert!(clock.is_past_ms(1000));
        assert!(!clock.is_past_ms(1500));
    }

    #[tokio::test]
    async fn test_sleep_waits_for_advance() {
        let clock = SimClock::from_millis(0);
        let sleeper = clock.clone();

        let handle = tokio::spawn(async move {
            sleeper.sleep_until_ms(100).await;
            sleeper.now_ms()
        });

        tokio::task::yield_now().await;
        clock.advance_ms(50);
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());

        clock.advance_ms(50);
        let woke_at = handle.await.unwrap();
        assert!(woke_at >= 100);
    }

    #[tokio::test]
    async fn test_zero_sleep_returns_immediately() {
        let clock = SimClock::from_millis(42);
        TimeProvider::sleep_ms(&clock, 0).await;
        assert_eq!(clock.now_ms(), 42);
    }
}

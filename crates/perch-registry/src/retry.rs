//! Keep-register retry policy

use perch_core::constants::{
    WATCHDOG_ATTEMPTS_COUNT_DEFAULT, WATCHDOG_OBSERVE_DELAY_MS_DEFAULT,
    WATCHDOG_RETRY_DELAY_MS_DEFAULT,
};
use perch_core::RetryConfig;
use std::time::Duration;

/// How the keep-register watchdog paces itself and when it gives up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive failures tolerated before the watchdog exits (0 = never)
    pub max_attempts: u32,
    /// Delay between observations of a healthy key
    pub observe_delay: Duration,
    /// Delay after a failed observation or heal
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: WATCHDOG_ATTEMPTS_COUNT_DEFAULT,
            observe_delay: Duration::from_millis(WATCHDOG_OBSERVE_DELAY_MS_DEFAULT),
            retry_delay: Duration::from_millis(WATCHDOG_RETRY_DELAY_MS_DEFAULT),
        }
    }
}

impl RetryPolicy {
    /// Policy with default limits: 5 attempts, 30s observe, 10s retry
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_observe_delay(mut self, observe_delay: Duration) -> Self {
        self.observe_delay = observe_delay;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Whether `failures` consecutive failures exhaust the policy
    pub fn is_exhausted(&self, failures: u32) -> bool {
        self.max_attempts != 0 && failures >= self.max_attempts
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            observe_delay: Duration::from_millis(config.observe_delay_ms),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

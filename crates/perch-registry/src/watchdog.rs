//! Keep-register watchdog
//!
//! One watchdog runs per registration. It periodically reads the key back
//! and, when the key has disappeared (lease lost, store restarted, external
//! delete), re-publishes it under a fresh lease.
//!
//! ```text
//!            read ok, key present
//!          +--------------------+
//!          v                    |
//!     +-----------+  key absent  +---------+
//!     | Observing | -----------> | Healing |
//!     +-----------+ <----------- +---------+
//!          |        healed / heal failed
//!          | failures >= max_attempts
//!          v
//!       (exit, registration abandoned)
//! ```
//!
//! Transitions live in [`Watchdog`] and are pure; [`keep_register`] drives
//! them with store calls and clock waits.

use crate::error::RegistryResult;
use crate::keepalive::KeepAliveHandle;
use crate::registrar::{RegistrarContext, Registration, RegistrationState};
use crate::retry::RetryPolicy;
use crate::store::{bounded, LeaseId, StoreOp};
use perch_core::io::duration_ms;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Which phase of the loop the watchdog is in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogState {
    /// Periodically reading the key back
    Observing,
    /// Key was found missing; re-publishing it
    Healing,
}

/// Outcome of reading the key back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Present,
    Absent,
    ReadFailed,
}

/// Pure watchdog state: phase, consecutive failures and next delay
#[derive(Debug, Clone)]
pub struct Watchdog {
    policy: RetryPolicy,
    state: WatchdogState,
    failures: u32,
    delay: Duration,
}

impl Watchdog {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: WatchdogState::Observing,
            failures: 0,
            delay: policy.observe_delay,
        }
    }

    pub fn state(&self) -> WatchdogState {
        self.state
    }

    /// Consecutive failures so far
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Wait before the next observation
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Whether the loop must give up
    pub fn is_exhausted(&self) -> bool {
        self.policy.is_exhausted(self.failures)
    }

    /// Apply an observation; returns the resulting state
    pub fn observe(&mut self, observation: Observation) -> WatchdogState {
        debug_assert_eq!(self.state, WatchdogState::Observing);
        match observation {
            Observation::Present => {
                self.failures = 0;
                self.delay = self.policy.observe_delay;
            }
            Observation::ReadFailed => {
                self.fail();
            }
            Observation::Absent => {
                self.state = WatchdogState::Healing;
                self.delay = self.policy.retry_delay;
            }
        }
        self.state
    }

    /// Re-registration completed under a new lease
    pub fn healed(&mut self) {
        debug_assert_eq!(self.state, WatchdogState::Healing);
        self.state = WatchdogState::Observing;
        self.failures = 0;
        self.delay = self.policy.observe_delay;
    }

    /// A step of re-registration failed
    pub fn heal_failed(&mut self) {
        debug_assert_eq!(self.state, WatchdogState::Healing);
        self.state = WatchdogState::Observing;
        self.fail();
    }

    fn fail(&mut self) {
        self.failures = self.failures.saturating_add(1);
        self.delay = self.policy.retry_delay;
    }
}

/// Watchdog loop for one registration
///
/// Returns when stopped or when the retry policy is exhausted. Never
/// surfaces errors; failures are logged.
pub(crate) async fn keep_register(
    ctx: Arc<RegistrarContext>,
    registration: Arc<Registration>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let key = registration.key();
    let mut watchdog = Watchdog::new(ctx.retry);

    while !watchdog.is_exhausted() {
        if *stop_rx.borrow_and_update() {
            info!(key = %key, "Stop keep register");
            return;
        }
        tokio::select! {
            biased;
            _ = stop_rx.changed() => {
                info!(key = %key, "Stop keep register");
                return;
            }
            _ = ctx.time.sleep_ms(duration_ms(watchdog.delay())) => {}
        }

        let observation = match bounded(StoreOp::Get, ctx.call_timeout, ctx.store.get(key, false))
            .await
        {
            Ok(kvs) if kvs.is_empty() => Observation::Absent,
            Ok(_) => Observation::Present,
            Err(e) => {
                warn!(key = %key, error = %e, failures = watchdog.failures() + 1, "Keep register read failed");
                Observation::ReadFailed
            }
        };

        if watchdog.observe(observation) == WatchdogState::Healing {
            info!(key = %key, "Key lost, re-registering");
            registration.set_state(RegistrationState::Healing);
            match heal(&ctx, &registration).await {
                Ok(lease) => {
                    info!(key = %key, lease = %lease, "Re-registered");
                    watchdog.healed();
                }
                Err(e) => {
                    warn!(key = %key, error = %e, failures = watchdog.failures() + 1, "Re-register failed");
                    watchdog.heal_failed();
                }
            }
            if registration.is_stopped() {
                info!(key = %key, "Stop keep register");
                return;
            }
            registration.set_state(RegistrationState::Registered);
        }
    }

    if registration.is_stopped() {
        return;
    }
    error!(
        key = %key,
        failures = watchdog.failures(),
        "Keep register gave up, registration will lapse with its lease"
    );
    registration.set_state(RegistrationState::Abandoned);
}

/// Grant, publish, keep alive, then hand over from the previous lease
async fn heal(ctx: &RegistrarContext, registration: &Registration) -> RegistryResult<LeaseId> {
    let lease = ctx.grant_lease().await?;
    ctx.publish(registration.key(), registration.value().to_vec(), lease)
        .await?;
    let handle = KeepAliveHandle::start(&ctx.store, lease, ctx.call_timeout).await?;
    registration.replace_handle(handle);
    Ok(lease)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(max_attempts)
            .with_observe_delay(Duration::from_secs(30))
            .with_retry_delay(Duration::from_secs(10))
    }

    #[test]
    fn test_starts_observing_with_observe_delay() {
        let watchdog = Watchdog::new(policy(5));
        assert_eq!(watchdog.state(), WatchdogState::Observing);
        assert_eq!(watchdog.failures(), 0);
        assert_eq!(watchdog.delay(), Duration::from_secs(30));
        assert!(!watchdog.is_exhausted());
    }

    #[test]
    fn test_read_failure_backs_off_and_counts() {
        let mut watchdog = Watchdog::new(policy(5));
        assert_eq!(
            watchdog.observe(Observation::ReadFailed),
            WatchdogState::Observing
        );
        assert_eq!(watchdog.failures(), 1);
        assert_eq!(watchdog.delay(), Duration::from_secs(10));
    }

    #[test]
    fn test_present_resets_failures_and_delay() {
        let mut watchdog = Watchdog::new(policy(5));
        watchdog.observe(Observation::ReadFailed);
        watchdog.observe(Observation::ReadFailed);

        assert_eq!(
            watchdog.observe(Observation::Present),
            WatchdogState::Observing
        );
        assert_eq!(watchdog.failures(), 0);
        assert_eq!(watchdog.delay(), Duration::from_secs(30));
    }

    #[test]
    fn test_absent_enters_healing() {
        let mut watchdog = Watchdog::new(policy(5));
        assert_eq!(watchdog.observe(Observation::Absent), WatchdogState::Healing);
        assert_eq!(watchdog.state(), WatchdogState::Healing);
        assert_eq!(watchdog.failures(), 0);
    }

    #[test]
    fn test_heal_success_returns_to_observing() {
        let mut watchdog = Watchdog::new(policy(5));
        watchdog.observe(Observation::ReadFailed);
        watchdog.observe(Observation::Absent);
        watchdog.healed();

        assert_eq!(watchdog.state(), WatchdogState::Observing);
        assert_eq!(watchdog.failures(), 0);
        assert_eq!(watchdog.delay(), Duration::from_secs(30));
    }

    #[test]
    fn test_heal_failure_counts_and_retries() {
        let mut watchdog = Watchdog::new(policy(5));
        watchdog.observe(Observation::Absent);
        watchdog.heal_failed();

        assert_eq!(watchdog.state(), WatchdogState::Observing);
        assert_eq!(watchdog.failures(), 1);
        assert_eq!(watchdog.delay(), Duration::from_secs(10));
    }

    #[test]
    fn test_exhausts_after_max_consecutive_failures() {
        let mut watchdog = Watchdog::new(policy(3));
        watchdog.observe(Observation::ReadFailed);
        watchdog.observe(Observation::Absent);
        watchdog.heal_failed();
        assert!(!watchdog.is_exhausted());

        watchdog.observe(Observation::ReadFailed);
        assert!(watchdog.is_exhausted());
        assert_eq!(watchdog.failures(), 3);
    }

    #[test]
    fn test_success_between_failures_prevents_exhaustion() {
        let mut watchdog = Watchdog::new(policy(2));
        for _ in 0..10 {
            watchdog.observe(Observation::ReadFailed);
            watchdog.observe(Observation::Present);
        }
        assert!(!watchdog.is_exhausted());
    }

    #[test]
    fn test_unbounded_never_exhausts() {
        let mut watchdog = Watchdog::new(policy(0));
        for _ in 0..1_000 {
            watchdog.observe(Observation::ReadFailed);
        }
        assert!(!watchdog.is_exhausted());
        assert_eq!(watchdog.failures(), 1_000);
    }
}

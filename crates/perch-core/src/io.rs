//! I/O Abstraction Layer for Deterministic Simulation Testing
//!
//! TigerStyle: All external I/O goes through abstraction traits.
//!
//! The registrar reads three things from the host that would make tests
//! non-deterministic if used directly:
//!
//! - **Time**: wall clock and sleeps (watchdog delays, lease expiry)
//! - **Environment**: live TTL/host/port overrides
//! - **Network interfaces**: the local IPv4 address used for wildcard hosts
//!
//! Production code uses [`WallClockTime`], [`ProcessEnvironment`] and
//! [`SystemInterfaces`]. Tests substitute `SimClock` (in perch-dst),
//! [`StaticEnvironment`] and [`StaticInterfaces`].

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// ============================================================================
// Time Provider
// ============================================================================

/// Time provider abstraction for DST
///
/// All code that needs current time or sleep MUST use this trait.
#[async_trait]
pub trait TimeProvider: Send + Sync + std::fmt::Debug {
    /// Get current time in milliseconds since epoch
    fn now_ms(&self) -> u64;

    /// Sleep for the specified duration
    ///
    /// In production: actual tokio::time::sleep
    /// In DST: waits until simulated time has been advanced past the deadline
    async fn sleep_ms(&self, ms: u64);
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Production time provider using wall clock
#[derive(Debug, Clone, Default)]
pub struct WallClockTime;

impl WallClockTime {
    /// Create a new wall clock time provider
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TimeProvider for WallClockTime {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(duration_ms)
            .unwrap_or(0)
    }

    async fn sleep_ms(&self, ms: u64) {
        tokio::time::sleep(tokio::time::Duration::from_millis(ms)).await;
    }
}

// ============================================================================
// Environment Reader
// ============================================================================

/// Read access to environment overrides
///
/// Consulted at the start of every registration attempt, so overrides take
/// effect without restarting the process.
pub trait EnvironmentReader: Send + Sync + std::fmt::Debug {
    /// Value of `key`, or None if unset or not valid unicode
    fn var(&self, key: &str) -> Option<String>;

    /// Value of `key` if it is set and non-empty
    fn non_empty_var(&self, key: &str) -> Option<String> {
        self.var(key).filter(|v| !v.is_empty())
    }
}

/// Reads the real process environment
#[derive(Debug, Clone, Default)]
pub struct ProcessEnvironment;

impl EnvironmentReader for ProcessEnvironment {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Fixed set of variables, mutable at runtime for tests
#[derive(Debug, Default)]
pub struct StaticEnvironment {
    vars: RwLock<HashMap<String, String>>,
}

impl StaticEnvironment {
    /// Create an empty environment
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style variable assignment
    pub fn with_var(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Set a variable
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        if let Ok(mut vars) = self.vars.write() {
            vars.insert(key.into(), value.into());
        }
    }

    /// Remove a variable
    pub fn remove(&self, key: &str) {
        if let Ok(mut vars) = self.vars.write() {
            vars.remove(key);
        }
    }
}

impl EnvironmentReader for StaticEnvironment {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.read().ok().and_then(|vars| vars.get(key).cloned())
    }
}

// ============================================================================
// Network Interfaces
// ============================================================================

/// Enumerates addresses bound to local network interfaces
pub trait NetworkInterfaces: Send + Sync + std::fmt::Debug {
    /// All interface addresses, in interface order
    fn addresses(&self) -> Result<Vec<IpAddr>>;

    /// First non-loopback IPv4 address, if any
    fn first_non_loopback_ipv4(&self) -> Result<Option<IpAddr>> {
        Ok(self
            .addresses()?
            .into_iter()
            .find(|ip| ip.is_ipv4() && !ip.is_loopback()))
    }
}

/// Host interfaces, queried on every call
#[derive(Debug, Clone, Default)]
pub struct SystemInterfaces;

impl NetworkInterfaces for SystemInterfaces {
    fn addresses(&self) -> Result<Vec<IpAddr>> {
        let interfaces = if_addrs::get_if_addrs().map_err(|e| Error::InterfacesUnavailable {
            reason: e.to_string(),
        })?;
        Ok(interfaces
            .into_iter()
            .filter(|iface| !iface.is_loopback())
            .map(|iface| iface.ip())
            .collect())
    }
}

/// Fixed interface list for tests
#[derive(Debug, Clone, Default)]
pub struct StaticInterfaces {
    addresses: Vec<IpAddr>,
}

impl StaticInterfaces {
    pub fn new(addresses: Vec<IpAddr>) -> Self {
        Self { addresses }
    }
}

impl NetworkInterfaces for StaticInterfaces {
    fn addresses(&self) -> Result<Vec<IpAddr>> {
        Ok(self.addresses.clone())
    }
}

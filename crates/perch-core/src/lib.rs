//! Perch Core
//!
//! Core types, errors, configuration and I/O abstractions shared by the Perch
//! service registry crates.
//!
//! # Overview
//!
//! Perch publishes lease-bound presence keys into a strongly-consistent
//! key-value store (etcd) so that RPC peers can advertise their address and
//! callers can discover live instances of a service.
//!
//! This crate holds the ambient pieces the registry builds on:
//! - [`config`]: serde-backed configuration with explicit validation
//! - [`io`]: time, environment and network-interface abstractions, so the
//!   registry runs unchanged under deterministic simulation
//! - [`telemetry`]: tracing subscriber setup

pub mod config;
pub mod constants;
pub mod error;
pub mod io;
pub mod telemetry;

pub use config::{
    AuthConfig, FixedAddress, PerchConfig, RegistrationConfig, RetryConfig, StoreConfig, TlsConfig,
};
pub use constants::*;
pub use error::{Error, Result};
pub use io::{
    EnvironmentReader, NetworkInterfaces, ProcessEnvironment, StaticEnvironment, StaticInterfaces,
    SystemInterfaces, TimeProvider, WallClockTime,
};
pub use telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};

//! Telemetry and logging infrastructure
//!
//! Installs a `tracing` subscriber with an env filter. `RUST_LOG` wins over
//! the configured level when set.

use crate::error::{Error, Result};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup event
    pub service_name: String,
    /// Whether to output logs to stdout
    pub stdout_enabled: bool,
    /// Log level filter used when `RUST_LOG` is unset
    pub log_level: String,
    /// Emit logs as JSON lines
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "perch".to_string(),
            stdout_enabled: true,
            log_level: "info".to_string(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Create a new configuration with the given service name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set the log level filter
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Disable stdout logging
    pub fn without_stdout(mut self) -> Self {
        self.stdout_enabled = false;
        self
    }

    /// Emit JSON formatted logs
    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }
}

/// Guard returned by [`init_telemetry`]
///
/// Kept alive for the lifetime of the process; currently holds no resources.
#[derive(Debug)]
pub struct TelemetryGuard {
    _service_name: String,
}

/// Initialize the global tracing subscriber
///
/// Fails if a global subscriber is already installed.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let (plain, json) = match (config.stdout_enabled, config.json) {
        (false, _) => (None, None),
        (true, false) => (Some(tracing_subscriber::fmt::layer()), None),
        (true, true) => (None, Some(tracing_subscriber::fmt::layer().json())),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(plain)
        .with(json)
        .try_init()
        .map_err(|e| Error::Internal {
            message: format!("failed to initialize tracing subscriber: {}", e),
        })?;

    tracing::info!(service = %config.service_name, "Telemetry initialized");

    Ok(TelemetryGuard {
        _service_name: config.service_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_default() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "perch");
        assert!(config.stdout_enabled);
        assert_eq!(config.log_level, "info");
        assert!(!config.json);
    }

    #[test]
    fn test_telemetry_config_builder() {
        let config = TelemetryConfig::new("test-service")
            .with_log_level("debug")
            .with_json()
            .without_stdout();

        assert_eq!(config.service_name, "test-service");
        assert_eq!(config.log_level, "debug");
        assert!(config.json);
        assert!(!config.stdout_enabled);
    }
}

//! Configuration for Perch
//!
//! TigerStyle: Explicit defaults, validation, reasonable limits.

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration for Perch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerchConfig {
    /// Coordination store connection
    #[serde(default)]
    pub store: StoreConfig,

    /// Registration and discovery settings
    #[serde(default)]
    pub registry: RegistrationConfig,

    /// Keep-register watchdog settings
    #[serde(default)]
    pub retry: RetryConfig,
}

impl PerchConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.store.validate()?;
        self.registry.validate()?;
        self.retry.validate()?;
        Ok(())
    }

    /// Load and validate a JSON configuration file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| Error::ConfigLoad {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| Error::ConfigLoad {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// Store
// =============================================================================

/// Coordination store connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store endpoints (host:port)
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,

    /// Connect timeout in milliseconds (client default when unset)
    #[serde(default)]
    pub dial_timeout_ms: Option<u64>,

    /// Timeout applied to every store call in milliseconds
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// TLS material for the store connection
    #[serde(default)]
    pub tls: Option<TlsConfig>,

    /// Username/password authentication
    #[serde(default)]
    pub auth: Option<AuthConfig>,
}

fn default_endpoints() -> Vec<String> {
    vec![STORE_ENDPOINT_DEFAULT.to_string()]
}

fn default_call_timeout_ms() -> u64 {
    STORE_CALL_TIMEOUT_MS_DEFAULT
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            dial_timeout_ms: None,
            call_timeout_ms: default_call_timeout_ms(),
            tls: None,
            auth: None,
        }
    }
}

impl StoreConfig {
    /// Create a store config for the given endpoints
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            ..Default::default()
        }
    }

    /// Set TLS material
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Set username/password authentication
    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some(AuthConfig {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Set the connect timeout
    pub fn with_dial_timeout_ms(mut self, dial_timeout_ms: u64) -> Self {
        self.dial_timeout_ms = Some(dial_timeout_ms);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            return Err(Error::invalid_configuration(
                "store.endpoints",
                "at least one endpoint is required",
            ));
        }
        if let Some(empty) = self.endpoints.iter().position(|e| e.trim().is_empty()) {
            return Err(Error::invalid_configuration(
                format!("store.endpoints[{}]", empty),
                "endpoint must not be empty",
            ));
        }
        if self.call_timeout_ms == 0 || self.call_timeout_ms > STORE_CALL_TIMEOUT_MS_MAX {
            return Err(Error::invalid_configuration(
                "store.call_timeout_ms",
                format!(
                    "{} must be within 1..={}",
                    self.call_timeout_ms, STORE_CALL_TIMEOUT_MS_MAX
                ),
            ));
        }
        if self.dial_timeout_ms == Some(0) {
            return Err(Error::invalid_configuration(
                "store.dial_timeout_ms",
                "must be positive when set",
            ));
        }
        if let Some(tls) = &self.tls {
            tls.validate()?;
        }
        if let Some(auth) = &self.auth {
            if auth.username.is_empty() {
                return Err(Error::invalid_configuration(
                    "store.auth.username",
                    "must not be empty",
                ));
            }
        }
        Ok(())
    }
}

/// TLS certificate material (PEM files)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Client certificate file
    pub cert_file: String,
    /// Client private key file
    pub key_file: String,
    /// CA certificate file
    pub ca_file: String,
    /// Server name to verify (defaults to the endpoint host)
    #[serde(default)]
    pub server_name: Option<String>,
}

impl TlsConfig {
    /// Create TLS settings from certificate, key and CA files
    pub fn new(
        cert_file: impl Into<String>,
        key_file: impl Into<String>,
        ca_file: impl Into<String>,
    ) -> Self {
        Self {
            cert_file: cert_file.into(),
            key_file: key_file.into(),
            ca_file: ca_file.into(),
            server_name: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("store.tls.cert_file", &self.cert_file),
            ("store.tls.key_file", &self.key_file),
            ("store.tls.ca_file", &self.ca_file),
        ] {
            if value.is_empty() {
                return Err(Error::invalid_configuration(field, "must not be empty"));
            }
        }
        Ok(())
    }
}

/// Username/password credentials
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// =============================================================================
// Registration
// =============================================================================

/// Registration and discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationConfig {
    /// Key prefix override (default: `perch/registry`)
    #[serde(default)]
    pub key_prefix: Option<String>,

    /// Weight substituted for instances stored with weight <= 0
    #[serde(default = "default_weight")]
    pub default_weight: i64,

    /// Lease TTL in seconds, unless overridden by the environment
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: i64,

    /// Address registered instead of the endpoint's own address
    #[serde(default)]
    pub fixed_address: Option<FixedAddress>,
}

fn default_weight() -> i64 {
    INSTANCE_WEIGHT_DEFAULT
}

fn default_lease_ttl_secs() -> i64 {
    LEASE_TTL_SECS_DEFAULT
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            key_prefix: None,
            default_weight: default_weight(),
            lease_ttl_secs: default_lease_ttl_secs(),
            fixed_address: None,
        }
    }
}

impl RegistrationConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(prefix) = &self.key_prefix {
            if prefix.is_empty() {
                return Err(Error::invalid_configuration(
                    "registry.key_prefix",
                    "must not be empty when set",
                ));
            }
        }
        if self.default_weight <= 0 {
            return Err(Error::invalid_configuration(
                "registry.default_weight",
                format!("{} must be positive", self.default_weight),
            ));
        }
        if self.lease_ttl_secs <= 0 || self.lease_ttl_secs > LEASE_TTL_SECS_MAX {
            return Err(Error::invalid_configuration(
                "registry.lease_ttl_secs",
                format!(
                    "{} must be in 1..={}",
                    self.lease_ttl_secs, LEASE_TTL_SECS_MAX
                ),
            ));
        }
        if let Some(fixed) = &self.fixed_address {
            if !fixed.address.contains(':') {
                return Err(Error::invalid_configuration(
                    "registry.fixed_address.address",
                    "must be in host:port format",
                ));
            }
        }
        Ok(())
    }
}

/// An operator-supplied address registered verbatim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedAddress {
    /// Transport network (e.g. `tcp`)
    pub network: String,
    /// Address in host:port form
    pub address: String,
}

impl FixedAddress {
    pub fn new(network: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            address: address.into(),
        }
    }
}

// =============================================================================
// Retry
// =============================================================================

/// Keep-register watchdog settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Consecutive failures tolerated before giving up (0 = unlimited)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay between key observations in milliseconds
    #[serde(default = "default_observe_delay_ms")]
    pub observe_delay_ms: u64,

    /// Delay after a failure in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    WATCHDOG_ATTEMPTS_COUNT_DEFAULT
}

fn default_observe_delay_ms() -> u64 {
    WATCHDOG_OBSERVE_DELAY_MS_DEFAULT
}

fn default_retry_delay_ms() -> u64 {
    WATCHDOG_RETRY_DELAY_MS_DEFAULT
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            observe_delay_ms: default_observe_delay_ms(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.observe_delay_ms == 0 {
            return Err(Error::invalid_configuration(
                "retry.observe_delay_ms",
                "must be positive",
            ));
        }
        if self.retry_delay_ms == 0 {
            return Err(Error::invalid_configuration(
                "retry.retry_delay_ms",
                "must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PerchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.store.endpoints, vec![STORE_ENDPOINT_DEFAULT]);
        assert_eq!(config.store.call_timeout_ms, 3000);
        assert_eq!(config.registry.default_weight, 10);
        assert_eq!(config.registry.lease_ttl_secs, 60);
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn test_empty_endpoints_rejected() {
        let mut config = PerchConfig::default();
        config.store.endpoints.clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("store.endpoints"));
    }

    #[test]
    fn test_non_positive_default_weight_rejected() {
        let mut config = PerchConfig::default();
        config.registry.default_weight = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_lease_ttl_bounds() {
        let mut config = PerchConfig::default();
        config.registry.lease_ttl_secs = LEASE_TTL_SECS_MAX;
        assert!(config.validate().is_ok());

        config.registry.lease_ttl_secs = LEASE_TTL_SECS_MAX + 1;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("registry.lease_ttl_secs"));

        config.registry.lease_ttl_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_dial_timeout_must_be_positive() {
        let store = StoreConfig::new(vec!["etcd-0:2379".to_string()]).with_dial_timeout_ms(500);
        assert_eq!(store.dial_timeout_ms, Some(500));
        assert!(store.validate().is_ok());

        let err = store.with_dial_timeout_ms(0).validate().unwrap_err();
        assert!(err.to_string().contains("store.dial_timeout_ms"));
    }

    #[test]
    fn test_fixed_address_requires_port() {
        let mut config = PerchConfig::default();
        config.registry.fixed_address = Some(FixedAddress::new("tcp", "10.0.0.1"));
        assert!(config.validate().is_err());

        config.registry.fixed_address = Some(FixedAddress::new("tcp", "10.0.0.1:8888"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let raw = r#"{"store": {"endpoints": ["10.0.0.5:2379"]}, "retry": {"max_attempts": 0}}"#;
        let config: PerchConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.store.endpoints, vec!["10.0.0.5:2379"]);
        assert_eq!(config.store.call_timeout_ms, STORE_CALL_TIMEOUT_MS_DEFAULT);
        assert_eq!(config.retry.max_attempts, 0);
        assert_eq!(config.retry.observe_delay_ms, WATCHDOG_OBSERVE_DELAY_MS_DEFAULT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_auth_debug_redacts_password() {
        let store = StoreConfig::default().with_auth("root", "hunter2");
        let text = format!("{:?}", store);
        assert!(text.contains("root"));
        assert!(!text.contains("hunter2"));
    }

    #[test]
    fn test_from_json_file_missing() {
        let err = PerchConfig::from_json_file("/nonexistent/perch.json").unwrap_err();
        assert!(matches!(err, Error::ConfigLoad { .. }));
    }
}

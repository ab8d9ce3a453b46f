//! Registrable address derivation
//!
//! A server usually listens on a wildcard address (`:8888`, `[::]:8888`)
//! that is useless to remote callers. The policy substitutes a routable
//! host and applies operator overrides, in this order:
//!
//! 1. split `host:port`
//! 2. empty or `::` host -> first non-loopback IPv4 of a local interface
//! 3. `PERCH_IP_TO_REGISTRY` replaces the host
//! 4. `PERCH_PORT_TO_REGISTRY` replaces the port
//! 5. the port must be a valid port number
//!
//! A configured fixed address bypasses all of the above.

use crate::error::{RegistryError, RegistryResult};
use perch_core::constants::{ENV_IP_TO_REGISTRY, ENV_PORT_TO_REGISTRY};
use perch_core::io::{EnvironmentReader, NetworkInterfaces};
use perch_core::FixedAddress;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A network endpoint: transport plus address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Transport network (e.g. `tcp`)
    pub network: String,
    /// Address in host:port form
    pub address: String,
}

impl Endpoint {
    pub fn new(network: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            address: address.into(),
        }
    }

    /// A TCP endpoint
    pub fn tcp(address: impl Into<String>) -> Self {
        Self::new("tcp", address)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.network, self.address)
    }
}

impl From<FixedAddress> for Endpoint {
    fn from(fixed: FixedAddress) -> Self {
        Self::new(fixed.network, fixed.address)
    }
}

/// Split `host:port`, `[v6]:port` or `:port`
pub fn split_host_port(address: &str) -> Result<(&str, &str), String> {
    if let Some(rest) = address.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| "missing ']' in address".to_string())?;
        let port = after
            .strip_prefix(':')
            .ok_or_else(|| "missing port in address".to_string())?;
        return Ok((host, port));
    }

    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| "missing port in address".to_string())?;
    if host.contains(':') {
        return Err("too many colons in address".to_string());
    }
    Ok((host, port))
}

/// Join host and port, bracketing IPv6 literals
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Derives the address an instance is registered under
#[derive(Debug, Clone)]
pub struct AddressPolicy {
    fixed: Option<Endpoint>,
    env: Arc<dyn EnvironmentReader>,
    interfaces: Arc<dyn NetworkInterfaces>,
}

impl AddressPolicy {
    pub fn new(env: Arc<dyn EnvironmentReader>, interfaces: Arc<dyn NetworkInterfaces>) -> Self {
        Self {
            fixed: None,
            env,
            interfaces,
        }
    }

    /// Register `fixed` verbatim instead of the endpoint's address
    pub fn with_fixed_address(mut self, fixed: Option<Endpoint>) -> Self {
        self.fixed = fixed;
        self
    }

    /// The configured fixed address, if any
    pub fn fixed_address(&self) -> Option<&Endpoint> {
        self.fixed.as_ref()
    }

    /// Registrable endpoint for a local `endpoint`
    ///
    /// Reads the environment and interfaces on every call.
    pub fn resolve(&self, endpoint: &Endpoint) -> RegistryResult<Endpoint> {
        if let Some(fixed) = &self.fixed {
            return Ok(fixed.clone());
        }

        let (host, port) = split_host_port(&endpoint.address)
            .map_err(|reason| RegistryError::address(&endpoint.address, reason))?;
        let mut host = host.to_string();
        let mut port = port.to_string();

        if host.is_empty() || host == "::" {
            let local = self
                .interfaces
                .first_non_loopback_ipv4()
                .map_err(|e| RegistryError::address(&endpoint.address, e.to_string()))?
                .ok_or_else(|| {
                    RegistryError::address(
                        &endpoint.address,
                        "no non-loopback IPv4 address on local interfaces",
                    )
                })?;
            host = local.to_string();
        }

        if let Some(override_host) = self.env.non_empty_var(ENV_IP_TO_REGISTRY) {
            host = override_host;
        }

        if let Some(override_port) = self.env.non_empty_var(ENV_PORT_TO_REGISTRY) {
            port = override_port;
        }

        let port: u16 = port.parse().map_err(|e| {
            RegistryError::address(&endpoint.address, format!("invalid port {:?}: {}", port, e))
        })?;

        Ok(Endpoint::new(
            endpoint.network.clone(),
            join_host_port(&host, port),
        ))
    }
}

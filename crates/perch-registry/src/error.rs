//! Registry error types
//!
//! TigerStyle: Explicit error variants with context.

use crate::store::StoreError;
use thiserror::Error;

/// Registry-specific errors
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Caller supplied invalid registration info
    #[error("invalid registration: {reason}")]
    Validation { reason: String },

    /// Coordination store call failed
    #[error("store error: {source}")]
    Store {
        #[from]
        source: StoreError,
    },

    /// Stored payload could not be decoded
    #[error("cannot decode instance at {key}: {reason}")]
    Decode { key: String, reason: String },

    /// Instance could not be encoded
    #[error("cannot encode instance for {address}: {reason}")]
    Encode { address: String, reason: String },

    /// No registrable address could be derived
    #[error("cannot determine registrable address from {address:?}: {reason}")]
    Address { address: String, reason: String },

    /// Resolution found no valid instances
    #[error("no instance remains for {service}")]
    NoInstances { service: String },

    /// Invalid configuration
    #[error("configuration error: {source}")]
    Config {
        #[from]
        source: perch_core::Error,
    },

    /// TLS material could not be loaded
    #[error("tls error: {reason}")]
    Tls { reason: String },
}

impl RegistryError {
    /// Create a validation error
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Create an address error
    pub fn address(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Address {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error indicates a retriable condition
    ///
    /// `NoInstances` is not retriable in this sense: the store answered, the
    /// service simply has no members right now.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Store { .. })
    }
}

/// Result type for registry operations
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreOp;

    #[test]
    fn test_error_display() {
        let err = RegistryError::NoInstances {
            service: "echo".into(),
        };
        assert!(err.to_string().contains("echo"));
    }

    #[test]
    fn test_error_retriable() {
        let store_err: RegistryError = StoreError::Timeout {
            op: StoreOp::Get,
            timeout_ms: 3000,
        }
        .into();
        assert!(store_err.is_retriable());

        let empty = RegistryError::NoInstances {
            service: "echo".into(),
        };
        assert!(!empty.is_retriable());
        assert!(!RegistryError::validation("x").is_retriable());
    }
}

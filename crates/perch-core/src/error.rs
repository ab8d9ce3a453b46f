//! Error types for Perch
//!
//! TigerStyle: Explicit error types with context, using thiserror.

use thiserror::Error;

/// Result type alias for Perch core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Perch core error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {field}, reason: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    #[error("Failed to load configuration from {path}: {reason}")]
    ConfigLoad { path: String, reason: String },

    #[error("Network interfaces unavailable: {reason}")]
    InterfacesUnavailable { reason: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Create an invalid configuration error
    pub fn invalid_configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::invalid_configuration("store.endpoints", "must not be empty");
        let text = err.to_string();
        assert!(text.contains("store.endpoints"));
        assert!(text.contains("must not be empty"));
    }
}

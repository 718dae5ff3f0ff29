//! Error types for Courier
//!
//! TigerStyle: Explicit error types with context, using thiserror.

use thiserror::Error;

/// Result type alias for Courier core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Courier core error types
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Invalid identifier: {id}, reason: {reason}")]
    InvalidIdentifier { id: String, reason: String },

    #[error("Identifier too long: {length} bytes exceeds limit of {limit} bytes")]
    IdentifierTooLong { length: usize, limit: usize },

    #[error("Invalid address: {address}, reason: {reason}")]
    InvalidAddress { address: String, reason: String },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid configuration: {field}, reason: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    #[error("Configuration load failed: {path}, reason: {reason}")]
    ConfigurationLoadFailed { path: String, reason: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create an invalid identifier error
    pub fn invalid_identifier(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if this error is caused by caller input
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidIdentifier { .. }
                | Self::IdentifierTooLong { .. }
                | Self::InvalidAddress { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::invalid_identifier("bad:id", "contains ':'");
        assert!(err.to_string().contains("bad:id"));
        assert!(err.to_string().contains("contains ':'"));
    }

    #[test]
    fn test_error_is_validation() {
        assert!(Error::IdentifierTooLong {
            length: 200,
            limit: 128
        }
        .is_validation());
        assert!(!Error::internal("boom").is_validation());
    }
}

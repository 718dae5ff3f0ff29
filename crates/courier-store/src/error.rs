//! Store error types
//!
//! TigerStyle: Explicit error variants with context.

use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a shared state store backend
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("store connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("store operation {operation} failed on {key}: {reason}")]
    OperationFailed {
        operation: String,
        key: String,
        reason: String,
    },

    #[error("store operation {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("wrong value type at {key}: expected {expected}")]
    WrongType { key: String, expected: String },

    #[error("expiration subscription failed: {reason}")]
    SubscriptionFailed { reason: String },

    #[error("store configuration failed: {reason}")]
    ConfigurationFailed { reason: String },
}

impl StoreError {
    pub fn operation_failed(
        operation: impl Into<String>,
        key: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Check if a retry could succeed
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::OperationFailed { .. } | Self::Timeout { .. }
        )
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_dropped() || err.is_connection_refusal() || err.is_io_error() {
            Self::ConnectionFailed {
                reason: err.to_string(),
            }
        } else if err.is_timeout() {
            Self::Timeout {
                operation: "redis".into(),
                timeout_ms: 0,
            }
        } else {
            Self::OperationFailed {
                operation: "redis".into(),
                key: String::new(),
                reason: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::operation_failed("GET", "user_service:u1", "connection reset");
        let msg = err.to_string();
        assert!(msg.contains("GET"));
        assert!(msg.contains("user_service:u1"));
    }

    #[test]
    fn test_store_error_retriable() {
        assert!(StoreError::timeout("SET", 800).is_retriable());
        assert!(!StoreError::WrongType {
            key: "k".into(),
            expected: "set".into()
        }
        .is_retriable());
    }
}

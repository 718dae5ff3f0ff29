//! Registry error types
//!
//! TigerStyle: Explicit error variants with context.

use courier_store::StoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why selection gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionReason {
    /// The available-instance set was empty when drawn from
    EmptyPool,
    /// Every allowed draw produced an unusable candidate
    AttemptsExhausted,
}

impl std::fmt::Display for ExhaustionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyPool => write!(f, "empty pool"),
            Self::AttemptsExhausted => write!(f, "attempts exhausted"),
        }
    }
}

/// Registry-specific errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("invalid instance ID: {id}, reason: {reason}")]
    InvalidInstanceId { id: String, reason: String },

    #[error("invalid user ID: {id}, reason: {reason}")]
    InvalidUserId { id: String, reason: String },

    #[error("invalid instance address: {address}, reason: {reason}")]
    InvalidAddress { address: String, reason: String },

    /// No live instance could be bound to the user
    #[error("no instance available for user {user_id}: {reason} after {candidates_checked} candidates")]
    NoInstanceAvailable {
        user_id: String,
        candidates_checked: u32,
        reason: ExhaustionReason,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl RegistryError {
    pub fn no_instance_available(
        user_id: impl Into<String>,
        candidates_checked: u32,
        reason: ExhaustionReason,
    ) -> Self {
        Self::NoInstanceAvailable {
            user_id: user_id.into(),
            candidates_checked,
            reason,
        }
    }

    /// Caller supplied an unusable identifier or address
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Self::InvalidInstanceId { .. } | Self::InvalidUserId { .. } | Self::InvalidAddress { .. }
        )
    }

    /// Check if a retry could succeed
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::NoInstanceAvailable { .. } => true,
            Self::Store(e) => e.is_retriable(),
            _ => false,
        }
    }
}

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RegistryError::no_instance_available("user-1", 3, ExhaustionReason::EmptyPool);
        let msg = err.to_string();
        assert!(msg.contains("user-1"));
        assert!(msg.contains("empty pool"));
        assert!(msg.contains('3'));
    }

    #[test]
    fn test_error_classification() {
        let err = RegistryError::InvalidUserId {
            id: "a:b".into(),
            reason: "invalid characters".into(),
        };
        assert!(err.is_invalid_input());
        assert!(!err.is_retriable());

        let err: RegistryError = StoreError::timeout("GET", 800).into();
        assert!(err.is_retriable());
        assert!(!err.is_invalid_input());
    }
}

//! Instance, user and assignment types
//!
//! TigerStyle: Validated identifiers, the key separator can never appear
//! inside an ID.

use crate::error::{RegistryError, RegistryResult};
use crate::liveness::Liveness;
use courier_core::constants::{
    INSTANCE_ADDRESS_LENGTH_BYTES_MAX, INSTANCE_ID_LENGTH_BYTES_MAX, USER_ID_LENGTH_BYTES_MAX,
};
use courier_core::io::RngProvider;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Check an identifier: non-empty, bounded, ASCII alphanumerics plus `-_.`
fn check_identifier(id: &str, limit: usize) -> Result<(), String> {
    if id.is_empty() {
        return Err("cannot be empty".into());
    }
    if id.len() > limit {
        return Err(format!("length {} exceeds limit {}", id.len(), limit));
    }
    let valid = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if !valid {
        return Err("contains invalid characters".into());
    }
    Ok(())
}

// =============================================================================
// InstanceId
// =============================================================================

/// Unique identifier for a worker instance
///
/// Generated once per worker process and never changes for its lifetime.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstanceId(String);

impl InstanceId {
    /// Create a new InstanceId with validation
    pub fn new(id: impl Into<String>) -> RegistryResult<Self> {
        let id = id.into();
        check_identifier(&id, INSTANCE_ID_LENGTH_BYTES_MAX)
            .map_err(|reason| RegistryError::InvalidInstanceId {
                id: id.clone(),
                reason,
            })?;
        Ok(Self(id))
    }

    /// Generate a fresh instance ID with injected RNG
    pub fn generate_with_rng(rng: &dyn RngProvider) -> Self {
        let id = format!("instance-{:016x}{:016x}", rng.next_u64(), rng.next_u64());
        debug_assert!(id.len() <= INSTANCE_ID_LENGTH_BYTES_MAX);
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for InstanceId {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<InstanceId> for String {
    fn from(id: InstanceId) -> Self {
        id.0
    }
}

// =============================================================================
// UserId
// =============================================================================

/// Identifier of a client that needs an instance
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> RegistryResult<Self> {
        let id = id.into();
        check_identifier(&id, USER_ID_LENGTH_BYTES_MAX).map_err(|reason| {
            RegistryError::InvalidUserId {
                id: id.clone(),
                reason,
            }
        })?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for UserId {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

// =============================================================================
// InstanceAddress
// =============================================================================

/// Public connection URI of an instance, e.g. `ws://10.0.0.7:8081/ws`
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceAddress(String);

impl InstanceAddress {
    pub fn new(address: impl Into<String>) -> RegistryResult<Self> {
        let address = address.into();
        if address.is_empty() {
            return Err(RegistryError::InvalidAddress {
                address,
                reason: "cannot be empty".into(),
            });
        }
        if address.len() > INSTANCE_ADDRESS_LENGTH_BYTES_MAX {
            return Err(RegistryError::InvalidAddress {
                reason: format!(
                    "length {} exceeds limit {}",
                    address.len(),
                    INSTANCE_ADDRESS_LENGTH_BYTES_MAX
                ),
                address,
            });
        }
        if address.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(RegistryError::InvalidAddress {
                address,
                reason: "contains whitespace or control characters".into(),
            });
        }
        Ok(Self(address))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Assignment
// =============================================================================

/// A user's sticky binding, resolved to a live instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub instance_id: InstanceId,
    pub address: InstanceAddress,
    /// True when the binding existed before this request
    pub sticky: bool,
}

/// Registered instance and its current liveness
#[derive(Debug, Clone, Serialize)]
pub struct InstanceStatus {
    pub instance_id: InstanceId,
    pub address: Option<InstanceAddress>,
    pub liveness: Liveness,
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::io::StdRngProvider;

    #[test]
    fn test_instance_id_valid() {
        let id = InstanceId::new("instance-1.eu_west").unwrap();
        assert_eq!(id.as_str(), "instance-1.eu_west");
        assert_eq!(id.to_string(), "instance-1.eu_west");
    }

    #[test]
    fn test_instance_id_rejects_separator() {
        let err = InstanceId::new("a:b").unwrap_err();
        assert!(matches!(err, RegistryError::InvalidInstanceId { .. }));
    }

    #[test]
    fn test_instance_id_empty() {
        assert!(InstanceId::new("").is_err());
    }

    #[test]
    fn test_instance_id_too_long() {
        let long = "a".repeat(INSTANCE_ID_LENGTH_BYTES_MAX + 1);
        assert!(InstanceId::new(long).is_err());
        let max = "a".repeat(INSTANCE_ID_LENGTH_BYTES_MAX);
        assert!(InstanceId::new(max).is_ok());
    }

    #[test]
    fn test_instance_id_generate_is_valid_and_unique() {
        let rng = StdRngProvider::with_seed(99);
        let a = InstanceId::generate_with_rng(&rng);
        let b = InstanceId::generate_with_rng(&rng);
        assert_ne!(a, b);
        assert!(InstanceId::new(a.as_str()).is_ok());
    }

    #[test]
    fn test_user_id_rejects_non_ascii() {
        assert!(UserId::new("usér").is_err());
        assert!(UserId::new("user 1").is_err());
        assert!(UserId::new("user-1").is_ok());
    }

    #[test]
    fn test_address_validation() {
        assert!(InstanceAddress::new("ws://10.0.0.1:8081/ws").is_ok());
        assert!(InstanceAddress::new("").is_err());
        assert!(InstanceAddress::new("ws://host /ws").is_err());
    }

    #[test]
    fn test_serde_validates() {
        let ok: Result<InstanceId, _> = serde_json::from_str("\"node-a\"");
        assert!(ok.is_ok());
        let bad: Result<InstanceId, _> = serde_json::from_str("\"node:a\"");
        assert!(bad.is_err());
    }
}

//! StateStore trait
//!
//! TigerStyle: Narrow primitive surface, every multi-key mutation atomic
//! store-side.
//!
//! The registry reaches the shared store only through this trait. Each method
//! is a single atomic store operation. The two compound operations
//! (`put_if_absent_linked` and `delete_if_equals`) are executed atomically by
//! the backend, which is what lets concurrent assigners converge.

use crate::error::StoreResult;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Stream of keys whose TTL has lapsed
pub type ExpirationStream = BoxStream<'static, String>;

/// Write a value only if its key is absent, and link it into an index set,
/// provided a guard member is still present in a guard set.
///
/// Used to bind a user to an instance: the assignment key is the value key,
/// the reverse index is the index set, and the available-instance set is the
/// guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedWrite {
    pub key: String,
    pub value: String,
    pub index_key: String,
    pub index_member: String,
    pub guard_set: String,
    pub guard_member: String,
}

/// Outcome of a linked write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    /// Value written and indexed
    Written,
    /// Key was already set to the carried value; nothing written
    Exists(String),
    /// Guard member was not in the guard set; nothing written
    GuardMissing,
}

/// Shared key-value store with sets, TTLs and expiration notifications
#[async_trait]
pub trait StateStore: Send + Sync + std::fmt::Debug {
    /// Get a string value
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Set a string value, clearing any TTL
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Set a string value that expires after `ttl_ms`
    async fn set_with_ttl(&self, key: &str, value: &str, ttl_ms: u64) -> StoreResult<()>;

    /// Delete a key of any type; returns whether it existed
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Delete a string key only if it currently equals `expected`
    async fn delete_if_equals(&self, key: &str, expected: &str) -> StoreResult<bool>;

    /// Add a member to a set; returns whether it was newly added
    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Remove a member from a set; returns whether it was present
    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Check set membership
    async fn set_contains(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// All members of a set (empty if absent)
    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>>;

    /// One uniformly random member of a set, or None if empty
    async fn set_random_member(&self, key: &str) -> StoreResult<Option<String>>;

    /// All keys starting with `prefix`
    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Atomic conditional write, see [`LinkedWrite`]
    async fn put_if_absent_linked(&self, write: &LinkedWrite) -> StoreResult<LinkOutcome>;

    /// Subscribe to the names of keys removed by TTL expiry
    async fn subscribe_expirations(&self) -> StoreResult<ExpirationStream>;
}

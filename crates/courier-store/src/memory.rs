//! In-memory state store
//!
//! For a single registry process, tests and DST simulations.
//!
//! TigerStyle: One critical section per operation, TTL measured against the
//! injected clock.
//!
//! Expiry follows the Redis model: a key past its deadline is removed when it
//! is next touched (lazy) or by [`MemoryStore::sweep_expired`] (active). Both
//! paths publish the key name to expiration subscribers exactly once.

use crate::error::{StoreError, StoreResult};
use crate::store::{ExpirationStream, LinkOutcome, LinkedWrite, StateStore};
use async_trait::async_trait;
use courier_core::{IoContext, EXPIRATION_CHANNEL_CAPACITY_COUNT};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::instrument;

#[derive(Debug, Clone)]
struct ValueEntry {
    value: String,
    expires_at_ms: Option<u64>,
}

impl ValueEntry {
    fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms.is_some_and(|at| now_ms >= at)
    }
}

#[derive(Debug, Default)]
struct Inner {
    values: HashMap<String, ValueEntry>,
    sets: HashMap<String, BTreeSet<String>>,
}

/// In-memory implementation of [`StateStore`]
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    io: IoContext,
    expirations: broadcast::Sender<String>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a store on the production clock and RNG
    pub fn new() -> Self {
        Self::with_io(IoContext::production())
    }

    /// Create a store with injected time and randomness
    pub fn with_io(io: IoContext) -> Self {
        let (expirations, _) = broadcast::channel(EXPIRATION_CHANNEL_CAPACITY_COUNT);
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            io,
            expirations,
        }
    }

    /// Remove every expired key and notify subscribers; returns the count
    pub async fn sweep_expired(&self) -> usize {
        let now_ms = self.io.now_ms();
        let mut inner = self.inner.lock().await;

        let expired: Vec<String> = inner
            .values
            .iter()
            .filter(|(_, entry)| entry.is_expired(now_ms))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            inner.values.remove(key);
            self.notify_expired(key);
        }
        expired.len()
    }

    /// Remaining TTL on a string key, None if absent or persistent
    pub async fn ttl_ms(&self, key: &str) -> Option<u64> {
        let now_ms = self.io.now_ms();
        let mut inner = self.inner.lock().await;
        self.expire_if_due(&mut inner, key, now_ms);
        inner
            .values
            .get(key)
            .and_then(|entry| entry.expires_at_ms)
            .map(|at| at.saturating_sub(now_ms))
    }

    /// Number of live keys of any type
    pub async fn key_count(&self) -> usize {
        let now_ms = self.io.now_ms();
        let inner = self.inner.lock().await;
        let values = inner
            .values
            .values()
            .filter(|entry| !entry.is_expired(now_ms))
            .count();
        values + inner.sets.len()
    }

    /// Spawn a background task that sweeps every `interval_ms`
    pub fn spawn_sweeper(&self, interval_ms: u64) -> ExpirySweeper {
        ExpirySweeper::start(self.clone(), interval_ms)
    }

    fn notify_expired(&self, key: &str) {
        // No receivers is fine
        let _ = self.expirations.send(key.to_string());
    }

    fn expire_if_due(&self, inner: &mut Inner, key: &str, now_ms: u64) {
        let due = inner
            .values
            .get(key)
            .is_some_and(|entry| entry.is_expired(now_ms));
        if due {
            inner.values.remove(key);
            self.notify_expired(key);
        }
    }

    fn ensure_not_set(inner: &Inner, key: &str) -> StoreResult<()> {
        if inner.sets.contains_key(key) {
            return Err(StoreError::WrongType {
                key: key.to_string(),
                expected: "string".into(),
            });
        }
        Ok(())
    }

    fn ensure_not_value(inner: &Inner, key: &str) -> StoreResult<()> {
        if inner.values.contains_key(key) {
            return Err(StoreError::WrongType {
                key: key.to_string(),
                expected: "set".into(),
            });
        }
        Ok(())
    }

    fn write_value(&self, value: &str, ttl_ms: Option<u64>) -> ValueEntry {
        ValueEntry {
            value: value.to_string(),
            expires_at_ms: ttl_ms.map(|ttl| self.io.now_ms().saturating_add(ttl)),
        }
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    #[instrument(skip(self), level = "trace")]
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now_ms = self.io.now_ms();
        let mut inner = self.inner.lock().await;
        self.expire_if_due(&mut inner, key, now_ms);
        Self::ensure_not_set(&inner, key)?;
        Ok(inner.values.get(key).map(|entry| entry.value.clone()))
    }

    #[instrument(skip(self, value), level = "trace")]
    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        Self::ensure_not_set(&inner, key)?;
        let entry = self.write_value(value, None);
        inner.values.insert(key.to_string(), entry);
        Ok(())
    }

    #[instrument(skip(self, value), level = "trace")]
    async fn set_with_ttl(&self, key: &str, value: &str, ttl_ms: u64) -> StoreResult<()> {
        assert!(ttl_ms > 0, "ttl must be positive");
        let mut inner = self.inner.lock().await;
        Self::ensure_not_set(&inner, key)?;
        let entry = self.write_value(value, Some(ttl_ms));
        inner.values.insert(key.to_string(), entry);
        Ok(())
    }

    #[instrument(skip(self), level = "trace")]
    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let now_ms = self.io.now_ms();
        let mut inner = self.inner.lock().await;
        self.expire_if_due(&mut inner, key, now_ms);
        let removed_value = inner.values.remove(key).is_some();
        let removed_set = inner.sets.remove(key).is_some();
        Ok(removed_value || removed_set)
    }

    #[instrument(skip(self), level = "trace")]
    async fn delete_if_equals(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let now_ms = self.io.now_ms();
        let mut inner = self.inner.lock().await;
        self.expire_if_due(&mut inner, key, now_ms);
        Self::ensure_not_set(&inner, key)?;
        let matches = inner
            .values
            .get(key)
            .is_some_and(|entry| entry.value == expected);
        if matches {
            inner.values.remove(key);
        }
        Ok(matches)
    }

    #[instrument(skip(self), level = "trace")]
    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool> {
        let now_ms = self.io.now_ms();
        let mut inner = self.inner.lock().await;
        self.expire_if_due(&mut inner, key, now_ms);
        Self::ensure_not_value(&inner, key)?;
        Ok(inner
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    #[instrument(skip(self), level = "trace")]
    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        Self::ensure_not_value(&inner, key)?;
        let Some(set) = inner.sets.get_mut(key) else {
            return Ok(false);
        };
        let removed = set.remove(member);
        // An empty set does not exist
        if set.is_empty() {
            inner.sets.remove(key);
        }
        Ok(removed)
    }

    #[instrument(skip(self), level = "trace")]
    async fn set_contains(&self, key: &str, member: &str) -> StoreResult<bool> {
        let inner = self.inner.lock().await;
        Self::ensure_not_value(&inner, key)?;
        Ok(inner.sets.get(key).is_some_and(|set| set.contains(member)))
    }

    #[instrument(skip(self), level = "trace")]
    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let inner = self.inner.lock().await;
        Self::ensure_not_value(&inner, key)?;
        Ok(inner
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    #[instrument(skip(self), level = "trace")]
    async fn set_random_member(&self, key: &str) -> StoreResult<Option<String>> {
        let inner = self.inner.lock().await;
        Self::ensure_not_value(&inner, key)?;
        let Some(set) = inner.sets.get(key) else {
            return Ok(None);
        };
        if set.is_empty() {
            return Ok(None);
        }
        let index = self.io.rng.gen_index(set.len());
        Ok(set.iter().nth(index).cloned())
    }

    #[instrument(skip(self), level = "trace")]
    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let now_ms = self.io.now_ms();
        let inner = self.inner.lock().await;
        let mut keys: Vec<String> = inner
            .values
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && !entry.is_expired(now_ms))
            .map(|(key, _)| key.clone())
            .chain(
                inner
                    .sets
                    .keys()
                    .filter(|key| key.starts_with(prefix))
                    .cloned(),
            )
            .collect();
        keys.sort();
        Ok(keys)
    }

    #[instrument(skip(self, write), fields(key = %write.key), level = "trace")]
    async fn put_if_absent_linked(&self, write: &LinkedWrite) -> StoreResult<LinkOutcome> {
        let now_ms = self.io.now_ms();
        let mut inner = self.inner.lock().await;
        self.expire_if_due(&mut inner, &write.key, now_ms);
        Self::ensure_not_set(&inner, &write.key)?;
        Self::ensure_not_value(&inner, &write.index_key)?;
        Self::ensure_not_value(&inner, &write.guard_set)?;

        if let Some(existing) = inner.values.get(&write.key) {
            return Ok(LinkOutcome::Exists(existing.value.clone()));
        }

        let guarded = inner
            .sets
            .get(&write.guard_set)
            .is_some_and(|set| set.contains(&write.guard_member));
        if !guarded {
            return Ok(LinkOutcome::GuardMissing);
        }

        let entry = self.write_value(&write.value, None);
        inner.values.insert(write.key.clone(), entry);
        inner
            .sets
            .entry(write.index_key.clone())
            .or_default()
            .insert(write.index_member.clone());
        Ok(LinkOutcome::Written)
    }

    async fn subscribe_expirations(&self) -> StoreResult<ExpirationStream> {
        let rx = self.expirations.subscribe();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(key) => return Some((key, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Expiration subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

// =============================================================================
// Expiry Sweeper
// =============================================================================

/// Background task that periodically calls [`MemoryStore::sweep_expired`]
///
/// Runs until `stop()` is called or the handle is dropped.
pub struct ExpirySweeper {
    handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<watch::Sender<bool>>,
}

impl ExpirySweeper {
    fn start(store: MemoryStore, interval_ms: u64) -> Self {
        assert!(interval_ms > 0, "sweep interval must be positive");
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        tracing::debug!("Expiry sweeper shutting down");
                        break;
                    }
                    _ = store.io.sleep_ms(interval_ms) => {
                        let swept = store.sweep_expired().await;
                        if swept > 0 {
                            tracing::debug!(swept, "Expired keys swept");
                        }
                    }
                }
            }
        });

        Self {
            handle: Some(handle),
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Signal the sweeper to stop
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
    }

    /// Stop and wait for the task to exit
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

//! Scripted store for unit tests
//!
//! Wraps a [`MemoryStore`] and scripts specific calls, so races and store
//! failures replay the same way every run.

use async_trait::async_trait;
use courier_store::{
    ExpirationStream, LinkOutcome, LinkedWrite, MemoryStore, StateStore, StoreError, StoreResult,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Writes another actor makes while a call is in flight
#[derive(Debug, Clone, Default)]
pub(crate) struct Interleaved {
    sets: Vec<(String, String)>,
    set_adds: Vec<(String, String)>,
}

impl Interleaved {
    pub(crate) fn set(mut self, key: &str, value: &str) -> Self {
        self.sets.push((key.to_string(), value.to_string()));
        self
    }

    pub(crate) fn set_add(mut self, key: &str, member: &str) -> Self {
        self.set_adds.push((key.to_string(), member.to_string()));
        self
    }

    async fn apply(&self, store: &MemoryStore) -> StoreResult<()> {
        for (key, value) in &self.sets {
            store.set(key, value).await?;
        }
        for (key, member) in &self.set_adds {
            store.set_add(key, member).await?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct ScriptedStore {
    pub(crate) inner: MemoryStore,
    ttl_writes_to_fail: AtomicU64,
    ttl_write_delay_ms: AtomicU64,
    on_scan: Mutex<Option<(String, Interleaved)>>,
    on_link: Mutex<Option<(Interleaved, LinkOutcome)>>,
}

impl ScriptedStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            ttl_writes_to_fail: AtomicU64::new(0),
            ttl_write_delay_ms: AtomicU64::new(0),
            on_scan: Mutex::new(None),
            on_link: Mutex::new(None),
        }
    }

    /// Fail the next `count` TTL writes without applying them
    pub(crate) fn fail_ttl_writes(self, count: u64) -> Self {
        self.ttl_writes_to_fail.store(count, Ordering::SeqCst);
        self
    }

    /// Delay every TTL write on the tokio clock
    pub(crate) fn delay_ttl_writes_ms(self, delay_ms: u64) -> Self {
        self.ttl_write_delay_ms.store(delay_ms, Ordering::SeqCst);
        self
    }

    /// Apply `writes` once, just before the first scan of `prefix`
    pub(crate) fn on_scan(self, prefix: &str, writes: Interleaved) -> Self {
        *self.on_scan.lock().unwrap() = Some((prefix.to_string(), writes));
        self
    }

    /// Apply `writes` once and report `outcome` in place of the first linked write
    pub(crate) fn on_link(self, writes: Interleaved, outcome: LinkOutcome) -> Self {
        *self.on_link.lock().unwrap() = Some((writes, outcome));
        self
    }
}

#[async_trait]
impl StateStore for ScriptedStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.inner.set(key, value).await
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_ms: u64) -> StoreResult<()> {
        let delay_ms = self.ttl_write_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        let failing = self
            .ttl_writes_to_fail
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::operation_failed("set_with_ttl", key, "scripted failure"));
        }
        self.inner.set_with_ttl(key, value, ttl_ms).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.inner.delete(key).await
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> StoreResult<bool> {
        self.inner.delete_if_equals(key, expected).await
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.inner.set_add(key, member).await
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.inner.set_remove(key, member).await
    }

    async fn set_contains(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.inner.set_contains(key, member).await
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        self.inner.set_members(key).await
    }

    async fn set_random_member(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.set_random_member(key).await
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let writes = {
            let mut hook = self.on_scan.lock().unwrap();
            if matches!(hook.as_ref(), Some((target, _)) if target == prefix) {
                hook.take().map(|(_, writes)| writes)
            } else {
                None
            }
        };
        if let Some(writes) = writes {
            writes.apply(&self.inner).await?;
        }
        self.inner.scan_prefix(prefix).await
    }

    async fn put_if_absent_linked(&self, write: &LinkedWrite) -> StoreResult<LinkOutcome> {
        let scripted = self.on_link.lock().unwrap().take();
        if let Some((writes, outcome)) = scripted {
            writes.apply(&self.inner).await?;
            return Ok(outcome);
        }
        self.inner.put_if_absent_linked(write).await
    }

    async fn subscribe_expirations(&self) -> StoreResult<ExpirationStream> {
        self.inner.subscribe_expirations().await
    }
}

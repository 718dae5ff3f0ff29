//! Fault-injecting state store
//!
//! TigerStyle: Same store semantics as production memory, faults decided by
//! the shared injector.
//!
//! `SimStore` wraps a [`MemoryStore`] running on the simulated clock. Every
//! call first asks the [`FaultInjector`] whether to fail; an injected failure
//! returns a `StoreError` without touching the underlying state. Latency
//! faults advance the simulated clock before applying the call, which is what
//! makes a slow store able to push heartbeats past the staleness threshold.

use crate::fault::{
    FaultInjector, FaultType, OP_CLASS_EXPIRATION, OP_CLASS_STORE_READ, OP_CLASS_STORE_WRITE,
    OP_CLASS_SUBSCRIBE,
};
use crate::rng::DeterministicRng;
use async_trait::async_trait;
use courier_core::IoContext;
use courier_store::{
    ExpirationStream, LinkOutcome, LinkedWrite, MemoryStore, StateStore, StoreError, StoreResult,
};
use futures::StreamExt;
use std::sync::Arc;

/// Simulated shared store for DST
#[derive(Debug, Clone)]
pub struct SimStore {
    inner: MemoryStore,
    faults: Arc<FaultInjector>,
    rng: DeterministicRng,
    io: IoContext,
}

impl SimStore {
    pub fn new(
        inner: MemoryStore,
        faults: Arc<FaultInjector>,
        rng: DeterministicRng,
        io: IoContext,
    ) -> Self {
        Self {
            inner,
            faults,
            rng,
            io,
        }
    }

    /// The fault-free store underneath, for setup and inspection
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    async fn before(&self, class: &str, op: &'static str, key: &str) -> StoreResult<()> {
        let operation = format!("{}:{}:{}", class, op, key);
        let Some(fault) = self.faults.should_inject(&operation) else {
            return Ok(());
        };

        match fault {
            FaultType::StoreLatency { min_ms, max_ms } => {
                let delay_ms = if max_ms > min_ms {
                    self.rng.next_range(min_ms, max_ms + 1)
                } else {
                    min_ms
                };
                self.io.sleep_ms(delay_ms).await;
                Ok(())
            }
            FaultType::StoreTimeout => Err(StoreError::timeout(op, 0)),
            FaultType::SubscribeFail => Err(StoreError::SubscriptionFailed {
                reason: "injected fault".into(),
            }),
            other => Err(StoreError::operation_failed(
                op,
                key,
                format!("injected {}", other.name()),
            )),
        }
    }

    async fn before_read(&self, op: &'static str, key: &str) -> StoreResult<()> {
        self.before(OP_CLASS_STORE_READ, op, key).await
    }

    async fn before_write(&self, op: &'static str, key: &str) -> StoreResult<()> {
        self.before(OP_CLASS_STORE_WRITE, op, key).await
    }
}

#[async_trait]
impl StateStore for SimStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.before_read("get", key).await?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.before_write("set", key).await?;
        self.inner.set(key, value).await
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_ms: u64) -> StoreResult<()> {
        self.before_write("set_with_ttl", key).await?;
        self.inner.set_with_ttl(key, value, ttl_ms).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.before_write("delete", key).await?;
        self.inner.delete(key).await
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> StoreResult<bool> {
        self.before_write("delete_if_equals", key).await?;
        self.inner.delete_if_equals(key, expected).await
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.before_write("set_add", key).await?;
        self.inner.set_add(key, member).await
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.before_write("set_remove", key).await?;
        self.inner.set_remove(key, member).await
    }

    async fn set_contains(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.before_read("set_contains", key).await?;
        self.inner.set_contains(key, member).await
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        self.before_read("set_members", key).await?;
        self.inner.set_members(key).await
    }

    async fn set_random_member(&self, key: &str) -> StoreResult<Option<String>> {
        self.before_read("set_random_member", key).await?;
        self.inner.set_random_member(key).await
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.before_read("scan_prefix", prefix).await?;
        self.inner.scan_prefix(prefix).await
    }

    async fn put_if_absent_linked(&self, write: &LinkedWrite) -> StoreResult<LinkOutcome> {
        self.before_write("put_if_absent_linked", &write.key).await?;
        self.inner.put_if_absent_linked(write).await
    }

    async fn subscribe_expirations(&self) -> StoreResult<ExpirationStream> {
        self.before(OP_CLASS_SUBSCRIBE, "expirations", "").await?;
        let stream = self.inner.subscribe_expirations().await?;
        let faults = self.faults.clone();

        let faulty = stream.flat_map(move |key| {
            let operation = format!("{}:notify:{}", OP_CLASS_EXPIRATION, key);
            let copies = match faults.should_inject(&operation) {
                Some(FaultType::ExpirationDrop) => vec![],
                Some(FaultType::ExpirationDuplicate) => vec![key.clone(), key],
                _ => vec![key],
            };
            futures::stream::iter(copies)
        });
        Ok(faulty.boxed())
    }
}

//! Redis state store
//!
//! TigerStyle: One round trip per operation, compound writes as Lua scripts.
//!
//! Uses a [`ConnectionManager`] for commands (reconnects transparently, cheap
//! to clone per call) and a dedicated pub/sub connection per expiration
//! subscriber. Expiration notifications require the server to publish keyspace
//! events with at least the `Ex` flags; [`RedisStore::configure_keyspace_events`]
//! sets them when the deployment allows `CONFIG SET`.

use crate::error::{StoreError, StoreResult};
use crate::store::{ExpirationStream, LinkOutcome, LinkedWrite, StateStore};
use async_trait::async_trait;
use courier_core::RECONCILE_SCAN_BATCH_COUNT_MAX;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::instrument;

/// Pattern matching expired-key events in every database
const EXPIRED_EVENT_PATTERN: &str = "__keyevent@*__:expired";

/// KEYS: value key, index set, guard set
/// ARGV: value, index member, guard member
/// Returns {0, ""} written, {1, current} exists, {2, ""} guard missing
const LINKED_WRITE_SCRIPT: &str = r"
local current = redis.call('GET', KEYS[1])
if current then
    return {1, current}
end
if redis.call('SISMEMBER', KEYS[3], ARGV[3]) == 0 then
    return {2, ''}
end
redis.call('SET', KEYS[1], ARGV[1])
redis.call('SADD', KEYS[2], ARGV[2])
return {0, ''}
";

const DELETE_IF_EQUALS_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

/// Redis-backed implementation of [`StateStore`]
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    conn: ConnectionManager,
    linked_write: redis::Script,
    delete_if_equals: redis::Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("addr", &self.client.get_connection_info().addr)
            .finish()
    }
}

impl RedisStore {
    /// Connect to a Redis server (redis:// or rediss://)
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url).map_err(|e| StoreError::ConnectionFailed {
            reason: format!("invalid redis url: {}", e),
        })?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| StoreError::ConnectionFailed {
                reason: e.to_string(),
            })?;

        tracing::info!(addr = %client.get_connection_info().addr, "Connected to Redis");

        Ok(Self {
            client,
            conn,
            linked_write: redis::Script::new(LINKED_WRITE_SCRIPT),
            delete_if_equals: redis::Script::new(DELETE_IF_EQUALS_SCRIPT),
        })
    }

    /// Enable expired-key notifications on the server
    pub async fn configure_keyspace_events(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("CONFIG")
            .arg("SET")
            .arg("notify-keyspace-events")
            .arg("Ex")
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::ConfigurationFailed {
                reason: e.to_string(),
            })?;
        tracing::info!("Enabled keyspace expiration events");
        Ok(())
    }

    /// Round-trip check
    pub async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| op_error("PING", "", e))?;
        Ok(())
    }
}

fn op_error(operation: &str, key: &str, err: redis::RedisError) -> StoreError {
    match StoreError::from(err) {
        StoreError::OperationFailed { reason, .. } => {
            StoreError::operation_failed(operation, key, reason)
        }
        StoreError::Timeout { .. } => StoreError::timeout(operation, 0),
        other => other,
    }
}

#[async_trait]
impl StateStore for RedisStore {
    #[instrument(skip(self), level = "trace")]
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(|e| op_error("GET", key, e))
    }

    #[instrument(skip(self, value), level = "trace")]
    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(|e| op_error("SET", key, e))?;
        Ok(())
    }

    #[instrument(skip(self, value), level = "trace")]
    async fn set_with_ttl(&self, key: &str, value: &str, ttl_ms: u64) -> StoreResult<()> {
        assert!(ttl_ms > 0, "ttl must be positive");
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| op_error("SET PX", key, e))?;
        Ok(())
    }

    #[instrument(skip(self), level = "trace")]
    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(key).await.map_err(|e| op_error("DEL", key, e))?;
        Ok(removed > 0)
    }

    #[instrument(skip(self), level = "trace")]
    async fn delete_if_equals(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = self
            .delete_if_equals
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| op_error("DELIFEQ", key, e))?;
        Ok(removed > 0)
    }

    #[instrument(skip(self), level = "trace")]
    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let added: i64 = conn
            .sadd(key, member)
            .await
            .map_err(|e| op_error("SADD", key, e))?;
        Ok(added > 0)
    }

    #[instrument(skip(self), level = "trace")]
    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn
            .srem(key, member)
            .await
            .map_err(|e| op_error("SREM", key, e))?;
        Ok(removed > 0)
    }

    #[instrument(skip(self), level = "trace")]
    async fn set_contains(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        conn.sismember(key, member)
            .await
            .map_err(|e| op_error("SISMEMBER", key, e))
    }

    #[instrument(skip(self), level = "trace")]
    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.smembers(key)
            .await
            .map_err(|e| op_error("SMEMBERS", key, e))
    }

    #[instrument(skip(self), level = "trace")]
    async fn set_random_member(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("SRANDMEMBER")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| op_error("SRANDMEMBER", key, e))
    }

    #[instrument(skip(self), level = "trace")]
    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", prefix);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(RECONCILE_SCAN_BATCH_COUNT_MAX)
                .query_async(&mut conn)
                .await
                .map_err(|e| op_error("SCAN", prefix, e))?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    #[instrument(skip(self, write), fields(key = %write.key), level = "trace")]
    async fn put_if_absent_linked(&self, write: &LinkedWrite) -> StoreResult<LinkOutcome> {
        let mut conn = self.conn.clone();
        let (code, current): (i64, String) = self
            .linked_write
            .key(&write.key)
            .key(&write.index_key)
            .key(&write.guard_set)
            .arg(&write.value)
            .arg(&write.index_member)
            .arg(&write.guard_member)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| op_error("LINKEDWRITE", &write.key, e))?;

        match code {
            0 => Ok(LinkOutcome::Written),
            1 => Ok(LinkOutcome::Exists(current)),
            2 => Ok(LinkOutcome::GuardMissing),
            other => Err(StoreError::operation_failed(
                "LINKEDWRITE",
                &write.key,
                format!("unexpected script result {}", other),
            )),
        }
    }

    async fn subscribe_expirations(&self) -> StoreResult<ExpirationStream> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(|e| {
            StoreError::SubscriptionFailed {
                reason: e.to_string(),
            }
        })?;
        pubsub
            .psubscribe(EXPIRED_EVENT_PATTERN)
            .await
            .map_err(|e| StoreError::SubscriptionFailed {
                reason: e.to_string(),
            })?;

        tracing::info!(pattern = EXPIRED_EVENT_PATTERN, "Subscribed to expiration events");

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            match msg.get_payload::<String>() {
                Ok(key) => Some(key),
                Err(e) => {
                    tracing::warn!(error = %e, "Unreadable expiration event payload");
                    None
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

//! Liveness oracle
//!
//! TigerStyle: Pure read, explicit staleness threshold, explicit policy for
//! unreadable heartbeats.
//!
//! An instance is alive iff its heartbeat record exists and
//! `now - last_seen <= staleness_threshold_ms`. A timestamp ahead of the
//! local clock (skew between writer and reader) counts as fresh.

use crate::instance::InstanceId;
use crate::keys::KeySchema;
use courier_core::config::{LivenessConfig, ReadFailurePolicy};
use courier_core::io::IoContext;
use courier_store::StateStore;
use serde::Serialize;
use std::sync::Arc;

/// Why an instance is considered dead
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DeadReason {
    /// No heartbeat record (never written or TTL lapsed)
    Missing,
    /// Heartbeat older than the staleness threshold
    Stale { age_ms: u64 },
    /// Heartbeat value is not a unix-ms timestamp
    Malformed { value: String },
}

/// Result of a liveness check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Liveness {
    Alive { last_seen_ms: u64 },
    Dead(DeadReason),
    /// The heartbeat could not be read
    Unverified { error: String },
}

impl Liveness {
    /// Classify a raw heartbeat value read at `now_ms`
    pub fn classify(raw: Option<&str>, now_ms: u64, staleness_threshold_ms: u64) -> Self {
        let Some(raw) = raw else {
            return Self::Dead(DeadReason::Missing);
        };
        let Ok(last_seen_ms) = raw.trim().parse::<u64>() else {
            return Self::Dead(DeadReason::Malformed {
                value: raw.to_string(),
            });
        };

        let age_ms = now_ms.saturating_sub(last_seen_ms);
        if age_ms > staleness_threshold_ms {
            Self::Dead(DeadReason::Stale { age_ms })
        } else {
            Self::Alive { last_seen_ms }
        }
    }

    /// Collapse to a decision under the given read-failure policy
    pub fn is_alive_under(&self, policy: ReadFailurePolicy) -> bool {
        match self {
            Self::Alive { .. } => true,
            Self::Dead(_) => false,
            Self::Unverified { .. } => policy == ReadFailurePolicy::FailOpen,
        }
    }
}

/// Decides whether an instance is alive from its heartbeat record
#[derive(Debug, Clone)]
pub struct LivenessOracle {
    store: Arc<dyn StateStore>,
    keys: KeySchema,
    config: LivenessConfig,
    io: IoContext,
}

impl LivenessOracle {
    pub fn new(
        store: Arc<dyn StateStore>,
        keys: KeySchema,
        config: LivenessConfig,
        io: IoContext,
    ) -> Self {
        assert!(
            config.staleness_threshold_ms > 0,
            "staleness threshold must be positive"
        );
        Self {
            store,
            keys,
            config,
            io,
        }
    }

    pub fn config(&self) -> &LivenessConfig {
        &self.config
    }

    /// Read the heartbeat and classify it
    pub async fn check(&self, instance_id: &InstanceId) -> Liveness {
        let key = self.keys.heartbeat(instance_id);
        match self.store.get(&key).await {
            Ok(raw) => Liveness::classify(
                raw.as_deref(),
                self.io.now_ms(),
                self.config.staleness_threshold_ms,
            ),
            Err(e) => {
                tracing::warn!(
                    instance_id = %instance_id,
                    error = %e,
                    policy = ?self.config.read_failure_policy,
                    "Heartbeat read failed"
                );
                Liveness::Unverified {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Check liveness and apply the read-failure policy
    pub async fn is_alive(&self, instance_id: &InstanceId) -> bool {
        self.check(instance_id)
            .await
            .is_alive_under(self.config.read_failure_policy)
    }
}

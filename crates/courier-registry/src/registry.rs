//! Registry core
//!
//! TigerStyle: Bounded selection, idempotent eviction, store as the only
//! synchronization point.
//!
//! # Flow
//!
//! ```text
//! get_assignment(user)
//!   ├─ cached binding? ── alive + address ──────────────► return (sticky)
//!   │                 └─ dead ─► evict instance, release binding
//!   └─ draw ≤ N random candidates from available_services
//!        ├─ dead ─► evict, draw again
//!        └─ alive ─► linked write (assignment + reverse index, guarded)
//!              ├─ Written ─────────────────────────────► return
//!              ├─ Exists(other) ─► validate other ─────► return / draw again
//!              └─ GuardMissing ─► draw again
//! ```

use crate::error::{ExhaustionReason, RegistryError, RegistryResult};
use crate::instance::{Assignment, InstanceAddress, InstanceId, InstanceStatus, UserId};
use crate::keys::KeySchema;
use crate::liveness::LivenessOracle;
use crate::stats::{RegistryStats, RegistryStatsSnapshot};
use courier_core::config::{CourierConfig, LivenessConfig, RegistryConfig};
use courier_core::io::IoContext;
use courier_store::{LinkOutcome, LinkedWrite, StateStore};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

/// What an eviction removed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvictionReport {
    pub instance_id: InstanceId,
    /// Instance was in the available set before this call
    pub was_available: bool,
    /// Users found in the reverse index
    pub users_indexed: usize,
    /// Assignments deleted because they still named this instance
    pub users_released: usize,
}

impl EvictionReport {
    /// True when the call found nothing left to remove
    pub fn was_noop(&self) -> bool {
        !self.was_available && self.users_indexed == 0
    }
}

/// Sticky user-to-instance registry over a shared [`StateStore`]
#[derive(Debug, Clone)]
pub struct InstanceRegistry {
    pub(crate) store: Arc<dyn StateStore>,
    pub(crate) keys: KeySchema,
    liveness: LivenessOracle,
    config: RegistryConfig,
    stats: Arc<RegistryStats>,
}

impl InstanceRegistry {
    pub fn new(
        store: Arc<dyn StateStore>,
        keys: KeySchema,
        liveness: LivenessConfig,
        config: RegistryConfig,
        io: IoContext,
    ) -> Self {
        assert!(
            config.selection_attempts_max >= 1,
            "at least one selection attempt is required"
        );
        let liveness = LivenessOracle::new(store.clone(), keys.clone(), liveness, io);
        Self {
            store,
            keys,
            liveness,
            config,
            stats: Arc::new(RegistryStats::new()),
        }
    }

    /// Build from a full configuration
    pub fn from_config(store: Arc<dyn StateStore>, config: &CourierConfig, io: IoContext) -> Self {
        Self::new(
            store,
            KeySchema::new(config.store.key_namespace.clone()),
            config.liveness,
            config.registry,
            io,
        )
    }

    pub fn keys(&self) -> &KeySchema {
        &self.keys
    }

    pub fn liveness(&self) -> &LivenessOracle {
        &self.liveness
    }

    pub fn stats(&self) -> RegistryStatsSnapshot {
        self.stats.snapshot()
    }

    pub(crate) fn stats_handle(&self) -> &RegistryStats {
        &self.stats
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Record an instance's address and make it eligible for new bindings
    ///
    /// Idempotent. Returns true when the instance was not already available.
    /// The address is written first so an available instance always has one.
    #[instrument(skip_all, fields(instance_id = %instance_id, address = %address))]
    pub async fn register_instance(
        &self,
        instance_id: &InstanceId,
        address: &InstanceAddress,
    ) -> RegistryResult<bool> {
        self.store
            .set(&self.keys.address(instance_id), address.as_str())
            .await?;
        let added = self
            .store
            .set_add(&self.keys.available_set(), instance_id.as_str())
            .await?;

        self.stats.record_registration();
        if added {
            tracing::info!("Instance registered");
        } else {
            tracing::debug!("Instance re-registered");
        }
        Ok(added)
    }

    // =========================================================================
    // Assignment
    // =========================================================================

    /// Resolve the user's sticky instance, binding one if needed
    ///
    /// The only surfaced error is [`RegistryError::NoInstanceAvailable`];
    /// store failures along the way are logged and absorbed.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn get_assignment(&self, user_id: &UserId) -> RegistryResult<Assignment> {
        if let Some(assignment) = self.cached_assignment(user_id).await {
            return Ok(assignment);
        }

        let result = self.select_and_bind(user_id).await;
        if let Err(e) = &result {
            self.stats.record_failure();
            tracing::error!(error = %e, "Assignment failed");
        }
        result
    }

    async fn cached_assignment(&self, user_id: &UserId) -> Option<Assignment> {
        let key = self.keys.assignment(user_id);
        let bound = match self.store.get(&key).await {
            Ok(Some(bound)) => bound,
            Ok(None) => return None,
            Err(e) => {
                self.stats.record_absorbed_error();
                tracing::warn!(error = %e, "Assignment lookup failed, treating as miss");
                return None;
            }
        };

        match InstanceId::new(bound.clone()) {
            Ok(instance_id) => self.validate_binding(user_id, &instance_id).await,
            Err(_) => {
                tracing::warn!(bound = %bound, "Malformed binding, releasing");
                if let Err(e) = self.store.delete_if_equals(&key, &bound).await {
                    self.stats.record_absorbed_error();
                    tracing::warn!(error = %e, "Failed to release malformed binding");
                }
                None
            }
        }
    }

    /// Return the binding if its instance is usable, otherwise clean it up
    async fn validate_binding(
        &self,
        user_id: &UserId,
        instance_id: &InstanceId,
    ) -> Option<Assignment> {
        if !self.liveness.is_alive(instance_id).await {
            tracing::info!(instance_id = %instance_id, "Bound instance is dead, evicting");
            self.stats.record_dead_candidate();
            self.evict_absorbing(instance_id).await;
            self.release_binding(user_id, instance_id).await;
            return None;
        }

        match self.address_of(instance_id).await {
            Some(address) => {
                self.stats.record_cache_hit();
                tracing::debug!(instance_id = %instance_id, "Cache hit");
                Some(Assignment {
                    instance_id: instance_id.clone(),
                    address,
                    sticky: true,
                })
            }
            None => {
                // Alive but unregistered: the instance was evicted while still
                // heartbeating and will re-register. Drop only this binding.
                tracing::info!(
                    instance_id = %instance_id,
                    "Bound instance has no address, releasing binding"
                );
                self.release_binding(user_id, instance_id).await;
                None
            }
        }
    }

    async fn select_and_bind(&self, user_id: &UserId) -> RegistryResult<Assignment> {
        let available = self.keys.available_set();
        let mut candidates_checked: u32 = 0;

        for attempt in 0..self.config.selection_attempts_max {
            let raw = match self.store.set_random_member(&available).await {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    return Err(RegistryError::no_instance_available(
                        user_id.as_str(),
                        candidates_checked,
                        ExhaustionReason::EmptyPool,
                    ));
                }
                Err(e) => {
                    self.stats.record_absorbed_error();
                    tracing::warn!(attempt, error = %e, "Candidate draw failed");
                    continue;
                }
            };
            candidates_checked += 1;

            let candidate = match InstanceId::new(raw.clone()) {
                Ok(candidate) => candidate,
                Err(_) => {
                    tracing::warn!(raw = %raw, "Malformed member in available set, removing");
                    if let Err(e) = self.store.set_remove(&available, &raw).await {
                        self.stats.record_absorbed_error();
                        tracing::warn!(error = %e, "Failed to remove malformed member");
                    }
                    continue;
                }
            };

            if !self.liveness.is_alive(&candidate).await {
                tracing::warn!(attempt, instance_id = %candidate, "Candidate is dead, evicting");
                self.stats.record_dead_candidate();
                self.evict_absorbing(&candidate).await;
                continue;
            }

            let Some(address) = self.address_of(&candidate).await else {
                tracing::debug!(attempt, instance_id = %candidate, "Candidate has no address");
                continue;
            };

            let write = LinkedWrite {
                key: self.keys.assignment(user_id),
                value: candidate.as_str().to_string(),
                index_key: self.keys.reverse_index(&candidate),
                index_member: user_id.as_str().to_string(),
                guard_set: available.clone(),
                guard_member: candidate.as_str().to_string(),
            };

            match self.store.put_if_absent_linked(&write).await {
                Ok(LinkOutcome::Written) => {
                    self.stats.record_bound();
                    tracing::info!(instance_id = %candidate, attempt, "User bound to instance");
                    return Ok(Assignment {
                        instance_id: candidate,
                        address,
                        sticky: false,
                    });
                }
                Ok(LinkOutcome::Exists(existing)) => {
                    // A concurrent caller bound the user first; converge on it
                    if existing == candidate.as_str() {
                        self.stats.record_cache_hit();
                        return Ok(Assignment {
                            instance_id: candidate,
                            address,
                            sticky: true,
                        });
                    }
                    match InstanceId::new(existing) {
                        Ok(existing) => {
                            if let Some(assignment) =
                                self.validate_binding(user_id, &existing).await
                            {
                                return Ok(assignment);
                            }
                        }
                        Err(_) => {
                            // Releases the malformed value, or finds a newer binding
                            if let Some(assignment) = self.cached_assignment(user_id).await {
                                return Ok(assignment);
                            }
                        }
                    }
                }
                Ok(LinkOutcome::GuardMissing) => {
                    tracing::debug!(instance_id = %candidate, "Candidate evicted during bind");
                }
                Err(e) => {
                    self.stats.record_absorbed_error();
                    tracing::warn!(attempt, instance_id = %candidate, error = %e, "Bind failed");
                }
            }
        }

        Err(RegistryError::no_instance_available(
            user_id.as_str(),
            candidates_checked,
            ExhaustionReason::AttemptsExhausted,
        ))
    }

    async fn address_of(&self, instance_id: &InstanceId) -> Option<InstanceAddress> {
        match self.store.get(&self.keys.address(instance_id)).await {
            Ok(Some(raw)) => match InstanceAddress::new(raw) {
                Ok(address) => Some(address),
                Err(e) => {
                    tracing::warn!(
                        instance_id = %instance_id,
                        error = %e,
                        "Stored address is invalid, removing from available set"
                    );
                    if let Err(e) = self
                        .store
                        .set_remove(&self.keys.available_set(), instance_id.as_str())
                        .await
                    {
                        self.stats.record_absorbed_error();
                        tracing::warn!(error = %e, "Failed to remove instance with invalid address");
                    }
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                self.stats.record_absorbed_error();
                tracing::warn!(instance_id = %instance_id, error = %e, "Address lookup failed");
                None
            }
        }
    }

    /// Delete the user's binding if it still names `instance_id`
    async fn release_binding(&self, user_id: &UserId, instance_id: &InstanceId) {
        let key = self.keys.assignment(user_id);
        if let Err(e) = self.store.delete_if_equals(&key, instance_id.as_str()).await {
            self.stats.record_absorbed_error();
            tracing::warn!(error = %e, "Failed to release binding");
            return;
        }
        // Assignment first, then its index entry
        if let Err(e) = self
            .store
            .set_remove(&self.keys.reverse_index(instance_id), user_id.as_str())
            .await
        {
            self.stats.record_absorbed_error();
            tracing::warn!(error = %e, "Failed to remove reverse index entry");
        }
    }

    async fn evict_absorbing(&self, instance_id: &InstanceId) {
        if let Err(e) = self.evict_instance(instance_id).await {
            self.stats.record_absorbed_error();
            tracing::warn!(instance_id = %instance_id, error = %e, "Eviction failed");
        }
    }

    // =========================================================================
    // Eviction
    // =========================================================================

    /// Remove an instance from every index and release its users
    ///
    /// Idempotent. Assignments are deleted only if they still name this
    /// instance. The reverse index is deleted last, so a failure part way
    /// leaves enough state for a repeated call to finish the cascade.
    #[instrument(skip_all, fields(instance_id = %instance_id))]
    pub async fn evict_instance(&self, instance_id: &InstanceId) -> RegistryResult<EvictionReport> {
        let was_available = self
            .store
            .set_remove(&self.keys.available_set(), instance_id.as_str())
            .await?;
        self.store.delete(&self.keys.address(instance_id)).await?;

        let reverse_key = self.keys.reverse_index(instance_id);
        let users = self.store.set_members(&reverse_key).await?;

        let mut users_released = 0;
        for user in &users {
            let released = match UserId::new(user.clone()) {
                Ok(user_id) => {
                    self.store
                        .delete_if_equals(&self.keys.assignment(&user_id), instance_id.as_str())
                        .await?
                }
                Err(_) => {
                    tracing::warn!(user = %user, "Malformed member in reverse index");
                    false
                }
            };
            if released {
                users_released += 1;
            }
        }
        self.store.delete(&reverse_key).await?;

        let report = EvictionReport {
            instance_id: instance_id.clone(),
            was_available,
            users_indexed: users.len(),
            users_released,
        };

        if report.was_noop() {
            tracing::debug!("Eviction found nothing to remove");
        } else {
            self.stats.record_eviction(users_released as u64);
            tracing::info!(
                was_available,
                users_released,
                "Instance evicted"
            );
        }
        Ok(report)
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Every available instance with its address and liveness
    pub async fn list_instances(&self) -> RegistryResult<Vec<InstanceStatus>> {
        let members = self.store.set_members(&self.keys.available_set()).await?;
        let mut statuses = Vec::with_capacity(members.len());

        for raw in members {
            let Ok(instance_id) = InstanceId::new(raw.clone()) else {
                tracing::warn!(raw = %raw, "Skipping malformed member in available set");
                continue;
            };
            let address = self
                .store
                .get(&self.keys.address(&instance_id))
                .await?
                .and_then(|raw| InstanceAddress::new(raw).ok());
            let liveness = self.liveness.check(&instance_id).await;
            statuses.push(InstanceStatus {
                instance_id,
                address,
                liveness,
            });
        }
        statuses.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        Ok(statuses)
    }

    /// Users currently in an instance's reverse index
    pub async fn users_of(&self, instance_id: &InstanceId) -> RegistryResult<Vec<UserId>> {
        let members = self
            .store
            .set_members(&self.keys.reverse_index(instance_id))
            .await?;
        Ok(members
            .into_iter()
            .filter_map(|raw| UserId::new(raw).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::config::ReadFailurePolicy;
    use courier_core::io::{StdRngProvider, WallClockTime};
    use crate::test_support::{Interleaved, ScriptedStore};
    use courier_store::MemoryStore;

    fn setup() -> (InstanceRegistry, Arc<MemoryStore>, IoContext) {
        let io = IoContext::new(
            Arc::new(WallClockTime::new()),
            Arc::new(StdRngProvider::with_seed(42)),
        );
        let store = Arc::new(MemoryStore::with_io(io.clone()));
        let registry = InstanceRegistry::new(
            store.clone(),
            KeySchema::default(),
            LivenessConfig::default(),
            RegistryConfig::default(),
            io.clone(),
        );
        (registry, store, io)
    }

    fn id(raw: &str) -> InstanceId {
        InstanceId::new(raw).unwrap()
    }

    fn user(raw: &str) -> UserId {
        UserId::new(raw).unwrap()
    }

    fn addr(raw: &str) -> InstanceAddress {
        InstanceAddress::new(format!("ws://{}:8081/ws", raw)).unwrap()
    }

    async fn beat(store: &MemoryStore, io: &IoContext, instance: &str) {
        store
            .set_with_ttl(
                &format!("service_heartbeat:{}", instance),
                &io.now_ms().to_string(),
                5000,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let (registry, store, _) = setup();
        assert!(registry.register_instance(&id("a"), &addr("a")).await.unwrap());
        assert!(!registry.register_instance(&id("a"), &addr("a")).await.unwrap());

        assert_eq!(store.set_members("available_services").await.unwrap(), vec!["a"]);
        assert_eq!(
            store.get("service_address:a").await.unwrap(),
            Some("ws://a:8081/ws".to_string())
        );
    }

    #[tokio::test]
    async fn test_assignment_is_sticky() {
        let (registry, store, io) = setup();
        for name in ["a", "b", "c"] {
            registry.register_instance(&id(name), &addr(name)).await.unwrap();
            beat(&store, &io, name).await;
        }

        let first = registry.get_assignment(&user("u1")).await.unwrap();
        assert!(!first.sticky);
        for _ in 0..10 {
            let again = registry.get_assignment(&user("u1")).await.unwrap();
            assert_eq!(again.instance_id, first.instance_id);
            assert!(again.sticky);
        }

        let reverse = format!("service_users:{}", first.instance_id);
        assert_eq!(store.set_members(&reverse).await.unwrap(), vec!["u1"]);
        assert_eq!(registry.stats().assignments_bound, 1);
        assert_eq!(registry.stats().assignments_cached, 10);
    }

    #[tokio::test]
    async fn test_empty_pool() {
        let (registry, _, _) = setup();
        let err = registry.get_assignment(&user("u1")).await.unwrap_err();
        assert!(matches!(
            err,
            RegistryError::NoInstanceAvailable {
                candidates_checked: 0,
                reason: ExhaustionReason::EmptyPool,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_dead_cached_instance_is_replaced() {
        let (registry, store, io) = setup();
        registry.register_instance(&id("a"), &addr("a")).await.unwrap();
        beat(&store, &io, "a").await;
        let first = registry.get_assignment(&user("u1")).await.unwrap();
        assert_eq!(first.instance_id, id("a"));

        // a stops beating; b comes up
        store.delete("service_heartbeat:a").await.unwrap();
        registry.register_instance(&id("b"), &addr("b")).await.unwrap();
        beat(&store, &io, "b").await;

        let second = registry.get_assignment(&user("u1")).await.unwrap();
        assert_eq!(second.instance_id, id("b"));
        assert!(!store.set_contains("available_services", "a").await.unwrap());
        assert!(store.get("service_address:a").await.unwrap().is_none());
        assert!(store.set_members("service_users:a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_alive_without_address_releases_binding_only() {
        let (registry, store, io) = setup();
        registry.register_instance(&id("a"), &addr("a")).await.unwrap();
        registry.register_instance(&id("b"), &addr("b")).await.unwrap();
        beat(&store, &io, "a").await;
        beat(&store, &io, "b").await;

        store.set("user_service:u1", "a").await.unwrap();
        store.set_add("service_users:a", "u1").await.unwrap();
        store.delete("service_address:a").await.unwrap();
        store.set_remove("available_services", "a").await.unwrap();

        let assignment = registry.get_assignment(&user("u1")).await.unwrap();
        assert_eq!(assignment.instance_id, id("b"));
        assert!(store.set_members("service_users:a").await.unwrap().is_empty());
        assert_eq!(registry.stats().evictions, 0);
    }

    #[tokio::test]
    async fn test_evict_cascade_and_idempotence() {
        let (registry, store, io) = setup();
        registry.register_instance(&id("d"), &addr("d")).await.unwrap();
        beat(&store, &io, "d").await;
        for u in ["u1", "u2", "u3"] {
            registry.get_assignment(&user(u)).await.unwrap();
        }

        let report = registry.evict_instance(&id("d")).await.unwrap();
        assert!(report.was_available);
        assert_eq!(report.users_released, 3);

        for u in ["u1", "u2", "u3"] {
            assert!(store.get(&format!("user_service:{}", u)).await.unwrap().is_none());
        }
        assert!(store.set_members("service_users:d").await.unwrap().is_empty());

        let again = registry.evict_instance(&id("d")).await.unwrap();
        assert!(again.was_noop());
        assert_eq!(registry.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_evict_keeps_rebound_assignments() {
        let (registry, store, _) = setup();
        store.set("user_service:u1", "b").await.unwrap();
        store.set_add("service_users:a", "u1").await.unwrap();

        let report = registry.evict_instance(&id("a")).await.unwrap();
        assert_eq!(report.users_indexed, 1);
        assert_eq!(report.users_released, 0);
        assert_eq!(
            store.get("user_service:u1").await.unwrap(),
            Some("b".to_string())
        );
    }

    #[tokio::test]
    async fn test_dead_candidates_bounded() {
        let (registry, _store, _) = setup();
        for i in 0..30 {
            let name = format!("dead-{}", i);
            registry.register_instance(&id(&name), &addr(&name)).await.unwrap();
        }

        let err = registry.get_assignment(&user("u1")).await.unwrap_err();
        match err {
            RegistryError::NoInstanceAvailable {
                candidates_checked,
                reason,
                ..
            } => {
                assert_eq!(candidates_checked, 10);
                assert_eq!(reason, ExhaustionReason::AttemptsExhausted);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(registry.stats().dead_candidates, 10);
    }

    #[tokio::test]
    async fn test_list_instances() {
        let (registry, store, io) = setup();
        registry.register_instance(&id("a"), &addr("a")).await.unwrap();
        registry.register_instance(&id("b"), &addr("b")).await.unwrap();
        beat(&store, &io, "a").await;

        let statuses = registry.list_instances().await.unwrap();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].instance_id, id("a"));
        assert!(statuses[0]
            .liveness
            .is_alive_under(ReadFailurePolicy::FailClosed));
        assert!(!statuses[1]
            .liveness
            .is_alive_under(ReadFailurePolicy::FailOpen));
    }

    #[tokio::test]
    async fn test_concurrent_first_assignments_converge() {
        let (registry, store, io) = setup();
        for name in ["a", "b", "c", "d"] {
            registry.register_instance(&id(name), &addr(name)).await.unwrap();
            beat(&store, &io, name).await;
        }

        let registry = Arc::new(registry);
        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.get_assignment(&user("u1")).await.unwrap().instance_id
            }));
        }
        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        assert!(results.windows(2).all(|w| w[0] == w[1]));

        let mut indexed = 0;
        for name in ["a", "b", "c", "d"] {
            indexed += store
                .set_members(&format!("service_users:{}", name))
                .await
                .unwrap()
                .len();
        }
        assert_eq!(indexed, 1);
    }

    #[tokio::test]
    async fn test_malformed_conflict_returns_newer_binding() {
        let io = IoContext::new(
            Arc::new(WallClockTime::new()),
            Arc::new(StdRngProvider::with_seed(42)),
        );
        // Another caller binds u1 to b while our linked write sees a malformed value
        let store = Arc::new(ScriptedStore::new().on_link(
            Interleaved::default()
                .set("user_service:u1", "b")
                .set_add("service_users:b", "u1"),
            LinkOutcome::Exists("bad:id".into()),
        ));
        let registry = InstanceRegistry::new(
            store.clone(),
            KeySchema::default(),
            LivenessConfig::default(),
            RegistryConfig {
                selection_attempts_max: 1,
            },
            io.clone(),
        );
        for name in ["a", "b"] {
            registry.register_instance(&id(name), &addr(name)).await.unwrap();
            beat(&store.inner, &io, name).await;
        }

        let assignment = registry.get_assignment(&user("u1")).await.unwrap();
        assert_eq!(assignment.instance_id, id("b"));
        assert!(assignment.sticky);
        assert_eq!(registry.stats().assignments_bound, 0);
    }

    #[tokio::test]
    async fn test_invalid_stored_address_leaves_pool() {
        let (registry, store, io) = setup();
        registry.register_instance(&id("a"), &addr("a")).await.unwrap();
        beat(&store, &io, "a").await;
        store.set("service_address:a", "ws://a b/ws").await.unwrap();

        assert!(registry.get_assignment(&user("u1")).await.is_err());
        assert!(!store.set_contains("available_services", "a").await.unwrap());
        assert!(store.get("user_service:u1").await.unwrap().is_none());
    }
}

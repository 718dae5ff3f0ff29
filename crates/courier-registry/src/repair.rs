//! Reverse index reconciliation
//!
//! The reverse index is derived from the assignment family. `reconcile`
//! rebuilds it: every assignment to an available instance is indexed, every
//! assignment to an unavailable instance is released, and every index entry
//! whose assignment names another instance (or none) is dropped.

use crate::error::RegistryResult;
use crate::instance::{InstanceId, UserId};
use crate::keys::ParsedKey;
use crate::registry::InstanceRegistry;
use serde::Serialize;
use std::collections::HashSet;

/// What a reconcile pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub assignments_scanned: usize,
    /// Assignments whose reverse index entry was missing
    pub assignments_reindexed: usize,
    /// Assignments to instances outside the available set
    pub orphaned_assignments_released: usize,
    pub index_entries_scanned: usize,
    /// Index entries whose assignment no longer matched
    pub stale_index_entries_removed: usize,
    /// Keys in either family whose ID could not be parsed
    pub malformed_keys: usize,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.assignments_reindexed == 0
            && self.orphaned_assignments_released == 0
            && self.stale_index_entries_removed == 0
    }
}

impl InstanceRegistry {
    /// Restore assignment/reverse-index agreement in both directions
    pub async fn reconcile(&self) -> RegistryResult<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let available: HashSet<String> = self
            .store
            .set_members(&self.keys.available_set())
            .await?
            .into_iter()
            .collect();

        // Forward: assignment -> reverse index
        for key in self.store.scan_prefix(&self.keys.assignment_prefix()).await? {
            let user_id = match self.keys.parse_assignment(&key) {
                ParsedKey::Valid(user_id) => user_id,
                ParsedKey::Malformed(_) | ParsedKey::Foreign => {
                    report.malformed_keys += 1;
                    continue;
                }
            };
            let Some(bound) = self.store.get(&key).await? else {
                continue;
            };
            report.assignments_scanned += 1;

            let instance_id = match InstanceId::new(bound.clone()) {
                Ok(id) if available.contains(id.as_str()) => Some(id),
                // Registered after the snapshot was taken
                Ok(id) => self
                    .store
                    .set_contains(&self.keys.available_set(), id.as_str())
                    .await?
                    .then_some(id),
                Err(_) => None,
            };
            let Some(instance_id) = instance_id else {
                if self.store.delete_if_equals(&key, &bound).await? {
                    report.orphaned_assignments_released += 1;
                    tracing::info!(user_id = %user_id, bound = %bound, "Released orphaned assignment");
                }
                continue;
            };

            if self
                .store
                .set_add(&self.keys.reverse_index(&instance_id), user_id.as_str())
                .await?
            {
                report.assignments_reindexed += 1;
                tracing::info!(user_id = %user_id, instance_id = %instance_id, "Reindexed assignment");
            }
        }

        // Backward: reverse index -> assignment
        for key in self
            .store
            .scan_prefix(&self.keys.reverse_index_prefix())
            .await?
        {
            let instance_id = match self.keys.parse_reverse_index(&key) {
                ParsedKey::Valid(id) => id,
                ParsedKey::Malformed(_) | ParsedKey::Foreign => {
                    report.malformed_keys += 1;
                    continue;
                }
            };

            for member in self.store.set_members(&key).await? {
                report.index_entries_scanned += 1;
                let bound = match UserId::new(member.clone()) {
                    Ok(user_id) => self.store.get(&self.keys.assignment(&user_id)).await?,
                    Err(_) => None,
                };
                if bound.as_deref() != Some(instance_id.as_str()) {
                    self.store.set_remove(&key, &member).await?;
                    report.stale_index_entries_removed += 1;
                    tracing::info!(
                        instance_id = %instance_id,
                        user = %member,
                        "Removed stale reverse index entry"
                    );
                }
            }
        }

        if report.is_clean() {
            tracing::debug!(?report, "Reconcile found no drift");
        } else {
            tracing::warn!(?report, "Reconcile repaired drift");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeySchema;
    use crate::test_support::{Interleaved, ScriptedStore};
    use courier_core::config::{LivenessConfig, RegistryConfig};
    use courier_core::io::IoContext;
    use courier_store::{MemoryStore, StateStore};
    use std::sync::Arc;

    fn setup() -> (InstanceRegistry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let registry = InstanceRegistry::new(
            store.clone(),
            KeySchema::default(),
            LivenessConfig::default(),
            RegistryConfig::default(),
            IoContext::production(),
        );
        (registry, store)
    }

    #[tokio::test]
    async fn test_reconcile_clean_state() {
        let (registry, _) = setup();
        let report = registry.reconcile().await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.assignments_scanned, 0);
    }

    #[tokio::test]
    async fn test_reconcile_repairs_both_directions() {
        let (registry, store) = setup();
        store.set_add("available_services", "a").await.unwrap();

        // Missing index entry
        store.set("user_service:u1", "a").await.unwrap();
        // Assignment to an instance that is gone
        store.set("user_service:u2", "gone").await.unwrap();
        // Index entry whose assignment moved
        store.set("user_service:u3", "a").await.unwrap();
        store.set_add("service_users:a", "u3").await.unwrap();
        store.set_add("service_users:b", "u3").await.unwrap();
        // Index entry with no assignment at all
        store.set_add("service_users:b", "u4").await.unwrap();

        let report = registry.reconcile().await.unwrap();
        assert_eq!(report.assignments_scanned, 3);
        assert_eq!(report.assignments_reindexed, 1);
        assert_eq!(report.orphaned_assignments_released, 1);
        assert_eq!(report.stale_index_entries_removed, 2);

        assert_eq!(
            store.set_members("service_users:a").await.unwrap(),
            vec!["u1", "u3"]
        );
        assert!(store.set_members("service_users:b").await.unwrap().is_empty());
        assert!(store.get("user_service:u2").await.unwrap().is_none());

        assert!(registry.reconcile().await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn test_reconcile_keeps_binding_registered_mid_pass() {
        // `late` registers and a user binds to it after the available set is read
        let store = Arc::new(ScriptedStore::new().on_scan(
            "user_service:",
            Interleaved::default()
                .set("user_service:u9", "late")
                .set_add("available_services", "late")
                .set_add("service_users:late", "u9"),
        ));
        store.inner.set_add("available_services", "a").await.unwrap();
        store.inner.set("user_service:u1", "gone").await.unwrap();
        let registry = InstanceRegistry::new(
            store.clone(),
            KeySchema::default(),
            LivenessConfig::default(),
            RegistryConfig::default(),
            IoContext::production(),
        );

        let report = registry.reconcile().await.unwrap();

        // Only the assignment to the vanished instance is released
        assert_eq!(report.orphaned_assignments_released, 1);
        assert_eq!(report.stale_index_entries_removed, 0);
        assert_eq!(
            store.inner.get("user_service:u9").await.unwrap().as_deref(),
            Some("late")
        );
        assert!(store
            .inner
            .set_contains("service_users:late", "u9")
            .await
            .unwrap());
        assert!(store.inner.get("user_service:u1").await.unwrap().is_none());
    }
}

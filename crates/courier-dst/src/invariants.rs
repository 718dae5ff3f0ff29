//! Registry invariant verification
//!
//! Safety properties checked against a snapshot of the shared store during
//! simulation runs.
//!
//! # TigerStyle
//!
//! - Each invariant is a named, independent check
//! - Violations carry evidence for debugging
//! - Snapshots are read from the fault-free store, never through `SimStore`
//!
//! # Example
//!
//! ```rust,ignore
//! let checker = InvariantChecker::new().with_standard_invariants();
//! let snapshot = RegistrySnapshot::capture(env.store.inner(), &keys, env.now_ms())
//!     .await?
//!     .with_evicted("instance-a");
//! checker.verify_all(&snapshot)?;
//! ```

use courier_registry::{InstanceId, KeySchema, Liveness, ParsedKey};
use courier_store::{StateStore, StoreResult};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

// =============================================================================
// Core Types
// =============================================================================

/// An invariant did not hold
#[derive(Error, Debug, Clone)]
#[error("Invariant '{name}' violated: {message}")]
pub struct InvariantViolation {
    pub name: String,
    pub message: String,
    pub evidence: Option<String>,
}

impl InvariantViolation {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            evidence: None,
        }
    }

    pub fn with_evidence(
        name: impl Into<String>,
        message: impl Into<String>,
        evidence: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            evidence: Some(evidence.into()),
        }
    }
}

/// A safety property over a [`RegistrySnapshot`]
pub trait Invariant: Send + Sync {
    fn name(&self) -> &'static str;

    fn check(&self, snapshot: &RegistrySnapshot) -> Result<(), InvariantViolation>;
}

/// Runs a set of invariants
pub struct InvariantChecker {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantChecker {
    pub fn new() -> Self {
        Self {
            invariants: Vec::new(),
        }
    }

    pub fn with_invariant(mut self, invariant: impl Invariant + 'static) -> Self {
        self.invariants.push(Box::new(invariant));
        self
    }

    /// Invariants that hold in every reachable state, faults included
    pub fn with_standard_invariants(self) -> Self {
        self.with_invariant(AssignmentsIndexed)
            .with_invariant(EvictedUnavailable)
            .with_invariant(NoBindingToEvicted)
    }

    /// First violation, fail-fast
    pub fn verify_all(&self, snapshot: &RegistrySnapshot) -> Result<(), InvariantViolation> {
        for invariant in &self.invariants {
            invariant.check(snapshot)?;
        }
        Ok(())
    }

    /// Every violation
    pub fn verify_all_collect(&self, snapshot: &RegistrySnapshot) -> Vec<InvariantViolation> {
        self.invariants
            .iter()
            .filter_map(|invariant| invariant.check(snapshot).err())
            .collect()
    }

    pub fn invariant_names(&self) -> Vec<&'static str> {
        self.invariants.iter().map(|inv| inv.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Registry state read out of the store at one instant
///
/// Test drivers add what the store cannot tell on its own: which instances
/// were evicted (and not re-registered since) and which instances were
/// returned from assignment.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    pub now_ms: u64,
    pub staleness_threshold_ms: u64,
    pub available: BTreeSet<String>,
    /// Address per available instance
    pub addresses: BTreeMap<String, String>,
    /// Raw heartbeat per available instance
    pub heartbeats: BTreeMap<String, String>,
    /// user -> instance
    pub assignments: BTreeMap<String, String>,
    /// instance -> users
    pub reverse_index: BTreeMap<String, BTreeSet<String>>,
    pub evicted: BTreeSet<String>,
    /// (instance, heartbeat read at return time)
    pub returned: Vec<(String, Option<String>, u64)>,
}

impl RegistrySnapshot {
    pub fn new(now_ms: u64) -> Self {
        Self {
            now_ms,
            ..Self::default()
        }
    }

    /// Read every registry key family
    pub async fn capture(
        store: &dyn StateStore,
        keys: &KeySchema,
        now_ms: u64,
    ) -> StoreResult<Self> {
        let mut snapshot = Self::new(now_ms);

        for raw in store.set_members(&keys.available_set()).await? {
            if let Ok(id) = InstanceId::new(raw.clone()) {
                if let Some(address) = store.get(&keys.address(&id)).await? {
                    snapshot.addresses.insert(raw.clone(), address);
                }
                if let Some(heartbeat) = store.get(&keys.heartbeat(&id)).await? {
                    snapshot.heartbeats.insert(raw.clone(), heartbeat);
                }
            }
            snapshot.available.insert(raw);
        }

        for key in store.scan_prefix(&keys.assignment_prefix()).await? {
            if let ParsedKey::Valid(user_id) = keys.parse_assignment(&key) {
                if let Some(bound) = store.get(&key).await? {
                    snapshot
                        .assignments
                        .insert(user_id.as_str().to_string(), bound);
                }
            }
        }

        for key in store.scan_prefix(&keys.reverse_index_prefix()).await? {
            if let ParsedKey::Valid(instance_id) = keys.parse_reverse_index(&key) {
                let users: BTreeSet<String> = store.set_members(&key).await?.into_iter().collect();
                snapshot
                    .reverse_index
                    .insert(instance_id.as_str().to_string(), users);
            }
        }

        Ok(snapshot)
    }

    pub fn with_staleness_threshold_ms(mut self, threshold_ms: u64) -> Self {
        self.staleness_threshold_ms = threshold_ms;
        self
    }

    pub fn with_evicted(mut self, instance_id: impl Into<String>) -> Self {
        self.evicted.insert(instance_id.into());
        self
    }

    /// Record an instance returned from assignment with the heartbeat seen then
    pub fn with_returned(
        mut self,
        instance_id: impl Into<String>,
        heartbeat: Option<String>,
        at_ms: u64,
    ) -> Self {
        self.returned.push((instance_id.into(), heartbeat, at_ms));
        self
    }

    pub fn users_of(&self, instance_id: &str) -> BTreeSet<String> {
        self.reverse_index
            .get(instance_id)
            .cloned()
            .unwrap_or_default()
    }
}

// =============================================================================
// Invariants
// =============================================================================

/// Every assignment has a matching reverse index entry
pub struct AssignmentsIndexed;

impl Invariant for AssignmentsIndexed {
    fn name(&self) -> &'static str {
        "AssignmentsIndexed"
    }

    fn check(&self, snapshot: &RegistrySnapshot) -> Result<(), InvariantViolation> {
        for (user, instance) in &snapshot.assignments {
            let indexed = snapshot
                .reverse_index
                .get(instance)
                .is_some_and(|users| users.contains(user));
            if !indexed {
                return Err(InvariantViolation::with_evidence(
                    self.name(),
                    format!("user '{}' bound to '{}' but not indexed", user, instance),
                    format!("service_users:{} = {:?}", instance, snapshot.users_of(instance)),
                ));
            }
        }
        Ok(())
    }
}

/// No evicted instance is still in the available set
pub struct EvictedUnavailable;

impl Invariant for EvictedUnavailable {
    fn name(&self) -> &'static str {
        "EvictedUnavailable"
    }

    fn check(&self, snapshot: &RegistrySnapshot) -> Result<(), InvariantViolation> {
        match snapshot
            .evicted
            .iter()
            .find(|id| snapshot.available.contains(*id))
        {
            Some(id) => Err(InvariantViolation::with_evidence(
                self.name(),
                format!("evicted instance '{}' is available", id),
                format!("available = {:?}", snapshot.available),
            )),
            None => Ok(()),
        }
    }
}

/// No assignment or reverse index entry names an evicted instance
pub struct NoBindingToEvicted;

impl Invariant for NoBindingToEvicted {
    fn name(&self) -> &'static str {
        "NoBindingToEvicted"
    }

    fn check(&self, snapshot: &RegistrySnapshot) -> Result<(), InvariantViolation> {
        if let Some((user, instance)) = snapshot
            .assignments
            .iter()
            .find(|(_, instance)| snapshot.evicted.contains(*instance))
        {
            return Err(InvariantViolation::new(
                self.name(),
                format!("user '{}' still bound to evicted '{}'", user, instance),
            ));
        }
        if let Some(instance) = snapshot
            .evicted
            .iter()
            .find(|id| !snapshot.users_of(id).is_empty())
        {
            return Err(InvariantViolation::with_evidence(
                self.name(),
                format!("evicted instance '{}' still has a reverse index", instance),
                format!("{:?}", snapshot.users_of(instance)),
            ));
        }
        Ok(())
    }
}

/// Every instance returned from assignment was alive when returned
///
/// Only holds under the fail-closed read policy or without read faults.
pub struct ReturnedInstancesLive;

impl Invariant for ReturnedInstancesLive {
    fn name(&self) -> &'static str {
        "ReturnedInstancesLive"
    }

    fn check(&self, snapshot: &RegistrySnapshot) -> Result<(), InvariantViolation> {
        for (instance, heartbeat, at_ms) in &snapshot.returned {
            let liveness =
                Liveness::classify(heartbeat.as_deref(), *at_ms, snapshot.staleness_threshold_ms);
            if !matches!(liveness, Liveness::Alive { .. }) {
                return Err(InvariantViolation::with_evidence(
                    self.name(),
                    format!("instance '{}' returned at {} without a live heartbeat", instance, at_ms),
                    format!("{:?}", liveness),
                ));
            }
        }
        Ok(())
    }
}

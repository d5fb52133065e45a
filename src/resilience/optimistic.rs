//! Local overrides applied before the server confirms an action.
//!
//! State is a copy-on-write [`OverrideMap`]: every mutation builds a new
//! snapshot from the old one and swaps it in, touching only the named field
//! of the named resource. Readers holding an older snapshot never observe a
//! half-applied change.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

pub const ARCHIVED: &str = "archived";
pub const MARKED_READ: &str = "marked_read";
pub const COMPLETED: &str = "completed";
pub const CONVERTED: &str = "converted";
pub const DELETED: &str = "deleted";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimisticOverride {
    pub resource_id: String,
    pub field: String,
    pub value: bool,
    pub applied_at: DateTime<Utc>,
    /// Set once the server confirmed the action.
    pub committed: bool,
}

type Record = BTreeMap<String, OptimisticOverride>;

/// Immutable map of resource id to per-field overrides.
#[derive(Debug, Clone, Default)]
pub struct OverrideMap {
    records: Arc<HashMap<String, Arc<Record>>>,
}

impl OverrideMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, resource_id: &str, field: &str) -> Option<&OptimisticOverride> {
        self.records.get(resource_id)?.get(field)
    }

    /// All overrides for one resource, keyed by field.
    pub fn record(&self, resource_id: &str) -> Option<&BTreeMap<String, OptimisticOverride>> {
        self.records.get(resource_id).map(|r| r.as_ref())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn resource_ids(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(|k| k.as_str())
    }

    /// New map with `ov` merged into its resource's record. Other fields and
    /// other resources are carried over untouched.
    pub fn merge(&self, ov: OptimisticOverride) -> Self {
        let mut records = (*self.records).clone();
        let record = records.entry(ov.resource_id.clone()).or_default();
        Arc::make_mut(record).insert(ov.field.clone(), ov);
        Self {
            records: Arc::new(records),
        }
    }

    /// New map without `field` on `resource_id`. A record left with no
    /// fields is dropped entirely.
    pub fn remove_field(&self, resource_id: &str, field: &str) -> Self {
        let Some(existing) = self.records.get(resource_id) else {
            return self.clone();
        };
        if !existing.contains_key(field) {
            return self.clone();
        }

        let mut records = (*self.records).clone();
        let mut record = (**existing).clone();
        record.remove(field);
        if record.is_empty() {
            records.remove(resource_id);
        } else {
            records.insert(resource_id.to_string(), Arc::new(record));
        }
        Self {
            records: Arc::new(records),
        }
    }

    /// New map keeping only unconfirmed overrides, either on `resource_id` or
    /// on every resource when it is `None`. Also returns how many were dropped.
    pub fn without_committed(&self, resource_id: Option<&str>) -> (Self, usize) {
        let mut dropped = 0;
        let mut records = HashMap::with_capacity(self.records.len());
        for (id, record) in self.records.iter() {
            let untouched = resource_id.is_some_and(|only| only != id.as_str());
            if untouched || record.values().all(|ov| !ov.committed) {
                records.insert(id.clone(), record.clone());
                continue;
            }
            let pending: Record = record
                .iter()
                .filter(|(_, ov)| !ov.committed)
                .map(|(field, ov)| (field.clone(), ov.clone()))
                .collect();
            dropped += record.len() - pending.len();
            if !pending.is_empty() {
                records.insert(id.clone(), Arc::new(pending));
            }
        }
        (
            Self {
                records: Arc::new(records),
            },
            dropped,
        )
    }

    fn update_field(
        &self,
        resource_id: &str,
        field: &str,
        f: impl FnOnce(&mut OptimisticOverride),
    ) -> Option<Self> {
        let mut ov = self.get(resource_id, field)?.clone();
        f(&mut ov);
        Some(self.merge(ov))
    }
}

/// The shared holder of the current [`OverrideMap`] snapshot.
#[derive(Debug, Default)]
pub struct OptimisticState {
    current: Mutex<OverrideMap>,
}

impl OptimisticState {
    pub fn new() -> Self {
        Self::default()
    }

    fn swap(&self, f: impl FnOnce(&OverrideMap) -> OverrideMap) {
        let mut guard = self.current.lock().unwrap_or_else(|e| e.into_inner());
        let next = f(&guard);
        *guard = next;
    }

    pub fn snapshot(&self) -> OverrideMap {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Set `field` on `resource_id` to `value` ahead of server confirmation.
    pub fn apply(&self, resource_id: &str, field: &str, value: bool) {
        let ov = OptimisticOverride {
            resource_id: resource_id.to_string(),
            field: field.to_string(),
            value,
            applied_at: Utc::now(),
            committed: false,
        };
        log::debug!("Optimistic {}.{} = {}", resource_id, field, value);
        self.swap(|map| map.merge(ov));
    }

    /// Mark an applied override as confirmed. Returns false if none exists.
    pub fn commit(&self, resource_id: &str, field: &str) -> bool {
        let mut found = false;
        self.swap(|map| match map.update_field(resource_id, field, |ov| ov.committed = true) {
            Some(next) => {
                found = true;
                next
            }
            None => map.clone(),
        });
        found
    }

    /// Drop the override for `field`. Calling it again is a no-op.
    pub fn rollback(&self, resource_id: &str, field: &str) {
        log::debug!("Rolling back {}.{}", resource_id, field);
        self.swap(|map| map.remove_field(resource_id, field));
    }

    /// Put back whatever `field` held before a failed attempt: the earlier
    /// override if there was one, otherwise nothing.
    pub fn restore(&self, resource_id: &str, field: &str, prior: Option<OptimisticOverride>) {
        match prior {
            Some(ov) => {
                log::debug!("Restoring {}.{} = {}", resource_id, field, ov.value);
                self.swap(|map| map.merge(ov));
            }
            None => self.rollback(resource_id, field),
        }
    }

    /// Drop the confirmed overrides on one resource once its authoritative
    /// state has been reloaded. Pending ones stay.
    pub fn settle(&self, resource_id: &str) -> usize {
        let mut dropped = 0;
        self.swap(|map| {
            let (next, n) = map.without_committed(Some(resource_id));
            dropped = n;
            next
        });
        dropped
    }

    /// Drop every confirmed override. Pending ones stay.
    pub fn prune_committed(&self) -> usize {
        let mut dropped = 0;
        self.swap(|map| {
            let (next, n) = map.without_committed(None);
            dropped = n;
            next
        });
        if dropped > 0 {
            log::debug!("Pruned {} confirmed override(s)", dropped);
        }
        dropped
    }

    pub fn is_applied(&self, resource_id: &str, field: &str) -> bool {
        self.snapshot().get(resource_id, field).is_some()
    }

    pub fn value(&self, resource_id: &str, field: &str) -> Option<bool> {
        self.snapshot().get(resource_id, field).map(|ov| ov.value)
    }

    /// The value a view should show: the override if one exists, else the
    /// authoritative value.
    pub fn resolve(&self, resource_id: &str, field: &str, authoritative: bool) -> bool {
        self.value(resource_id, field).unwrap_or(authoritative)
    }

    pub fn clear(&self) {
        self.swap(|_| OverrideMap::new());
    }
}

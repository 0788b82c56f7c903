//! The per-observer object-state cache (C3): `observer -> observationPoint ->
//! ResourceKey -> serialized object`.
//!
//! Backed by a `parking_lot::RwLock`, matching `kube-runtime`'s preference
//! for `parking_lot` over `std::sync` locks. `Initialize`/`Write` take the
//! exclusive lock; `Read` takes the shared lock, per spec.md §4.2.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::resource::{ObservationPoint, ResourceKey};

type ByResourceKey = HashMap<ResourceKey, String>;
type ByObservationPoint = HashMap<ObservationPoint, ByResourceKey>;
type ByObserver = HashMap<String, ByObservationPoint>;

/// The coordinator's lazily-populated object-state cache.
#[derive(Default)]
pub struct ObjectStateCache {
    inner: RwLock<ByObserver>,
}

impl ObjectStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotently creates the nested entry for `(observer, point, key)`,
    /// seeding it with `"{}"` if it did not already exist (spec.md §4.2,
    /// invariant I2).
    pub fn initialize(&self, observer: &str, point: &ObservationPoint, key: &ResourceKey) {
        let mut guard = self.inner.write();
        let by_point = guard.entry(observer.to_string()).or_default();
        let by_key = by_point.entry(point.clone()).or_default();
        by_key.entry(key.clone()).or_insert_with(|| "{}".to_string());
    }

    /// Returns the stored serialized object, or `"{}"` if the slot has never
    /// been initialized (callers are expected to `initialize` first, per the
    /// RPC handler contract in spec.md §4.7, but `read` never panics).
    pub fn read(&self, observer: &str, point: &ObservationPoint, key: &ResourceKey) -> String {
        let guard = self.inner.read();
        guard
            .get(observer)
            .and_then(|by_point| by_point.get(point))
            .and_then(|by_key| by_key.get(key))
            .cloned()
            .unwrap_or_else(|| "{}".to_string())
    }

    /// Replaces the stored value for `(observer, point, key)`.
    pub fn write(&self, observer: &str, point: &ObservationPoint, key: &ResourceKey, value: String) {
        let mut guard = self.inner.write();
        let by_point = guard.entry(observer.to_string()).or_default();
        let by_key = by_point.entry(point.clone()).or_default();
        by_key.insert(key.clone(), value);
    }
}

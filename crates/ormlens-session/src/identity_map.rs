//! Identity map: one persistent instance per identity key within a session.

use std::collections::HashMap;

use ormlens_mapper::IdentityKey;

use crate::instance::Instance;

/// Persistent instances of a session keyed by identity.
///
/// Entries are strong references; an instance leaves the map only through
/// expunge.
#[derive(Default)]
pub struct IdentityMap {
    entries: HashMap<IdentityKey, Instance>,
    /// Keys in insertion order, so iteration is deterministic.
    order: Vec<IdentityKey>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &IdentityKey) -> Option<&Instance> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &IdentityKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert `instance` under `key`, returning the instance it replaced.
    pub fn insert(&mut self, key: IdentityKey, instance: Instance) -> Option<Instance> {
        let previous = self.entries.insert(key.clone(), instance);
        if previous.is_none() {
            self.order.push(key);
        }
        previous
    }

    pub fn remove(&mut self, key: &IdentityKey) -> Option<Instance> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.order.retain(|k| k != key);
        }
        removed
    }

    /// Instances in insertion order.
    pub fn instances(&self) -> Vec<Instance> {
        self.order
            .iter()
            .filter_map(|k| self.entries.get(k).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

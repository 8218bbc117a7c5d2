//! Unit ID cache
//!
//! Bounded `UnitDescriptor → unit ID` map with LRU eviction. Clients that
//! drop a descriptor for good can evict it explicitly with `forget`.

use std::collections::HashMap;

use crate::key::UnitDescriptor;

struct CacheEntry {
    unit_id: i32,
    /// Logical clock value of the last access
    last_access: u64,
}

/// LRU cache of resolved unit IDs
///
/// Not synchronized; the manager keeps it under its own lock.
pub struct UnitIdCache {
    entries: HashMap<UnitDescriptor, CacheEntry>,
    capacity: usize,
    clock: u64,
}

impl UnitIdCache {
    /// `capacity == 0` disables caching
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
            clock: 0,
        }
    }

    pub fn get(&mut self, unit: &UnitDescriptor) -> Option<i32> {
        self.clock += 1;
        let clock = self.clock;
        self.entries.get_mut(unit).map(|entry| {
            entry.last_access = clock;
            entry.unit_id
        })
    }

    pub fn insert(&mut self, unit: UnitDescriptor, unit_id: i32) {
        if self.capacity == 0 {
            return;
        }
        self.clock += 1;
        if !self.entries.contains_key(&unit) && self.entries.len() >= self.capacity {
            self.evict_oldest();
        }
        self.entries.insert(
            unit,
            CacheEntry {
                unit_id,
                last_access: self.clock,
            },
        );
    }

    /// Drop the mapping of a descriptor the client no longer uses
    pub fn forget(&mut self, unit: &UnitDescriptor) -> Option<i32> {
        self.entries.remove(unit).map(|entry| entry.unit_id)
    }

    /// Drop every mapping that resolves to `unit_id`
    pub fn forget_unit_id(&mut self, unit_id: i32) {
        self.entries.retain(|_, entry| entry.unit_id != unit_id);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(unit, _)| unit.clone());
        if let Some(unit) = oldest {
            self.entries.remove(&unit);
        }
    }
}

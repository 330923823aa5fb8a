//! # Keyed Locks
//!
//! One mutex per key, created on demand and dropped once no caller holds
//! or waits for it. Used to serialize operations on the same listing.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug)]
pub struct KeyedLocks<K> {
    slots: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Copy> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Run `f` while holding the lock for `key`.
    ///
    /// Calls for different keys never contend beyond the brief slot lookup.
    pub fn with_lock<R>(&self, key: K, f: impl FnOnce() -> R) -> R {
        let slot = Arc::clone(self.slots.lock().entry(key).or_default());
        let result = {
            let _guard = slot.lock();
            f()
        };
        let mut slots = self.slots.lock();
        // The map and this call hold the only references: nobody waits.
        if Arc::strong_count(&slot) == 2 {
            slots.remove(&key);
        }
        result
    }

    /// Number of keys currently locked or awaited.
    pub fn active(&self) -> usize {
        self.slots.lock().len()
    }
}

impl<K: Eq + Hash + Copy> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

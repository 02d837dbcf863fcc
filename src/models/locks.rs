use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;

/// Per-key mutual exclusion. Slots are created on demand and dropped once no
/// caller holds or waits on them.
#[derive(Default)]
pub struct KeyedLocks {
    slots: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` while holding the lock for `key`.
    pub fn with_lock<T>(&self, key: &str, f: impl FnOnce() -> T) -> T {
        // declared first so it runs after the slot guard and handle are gone,
        // on unwind as well
        let _prune = Prune {
            slots: &self.slots,
            key,
        };
        let slot = self.slots.lock().entry(key.to_string()).or_default().clone();
        let _guard = slot.lock();
        f()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

struct Prune<'a> {
    slots: &'a Mutex<HashMap<String, Arc<Mutex<()>>>>,
    key: &'a str,
}

impl Drop for Prune<'_> {
    fn drop(&mut self) {
        let mut slots = self.slots.lock();
        if slots
            .get(self.key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(self.key);
        }
    }
}

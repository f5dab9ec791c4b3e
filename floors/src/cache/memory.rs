use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde_json::Value;

use super::CacheEntry;

/// Bounded in-memory tier.
///
/// Entries are sharded across a `DashMap`, so concurrent loads touching different keys don't
/// serialize on one lock. Eviction removes the entry with the oldest write (timestamp, then
/// insertion sequence); reads don't refresh recency. A capacity of zero disables the tier.
#[derive(Debug)]
pub(crate) struct MemoryTier {
    entries: DashMap<String, Slot>,
    capacity: usize,
    seq: AtomicU64,
}

#[derive(Clone, Debug)]
struct Slot {
    entry: CacheEntry,
    seq: u64,
}

impl MemoryTier {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
            seq: AtomicU64::new(0),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Inserts an entry and returns how many entries were evicted to stay within capacity.
    pub(crate) fn put(&self, entry: CacheEntry) -> usize {
        if self.capacity == 0 {
            return 0;
        }
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(entry.key.clone(), Slot { entry, seq });

        let mut evicted = 0;
        while self.entries.len() > self.capacity {
            let Some(victim) = self.oldest_key() else {
                break;
            };
            if self.entries.remove(&victim).is_some() {
                ftrace!(key = victim.as_str(), "memory tier evicted");
                evicted += 1;
            }
        }
        evicted
    }

    /// Returns the value if present and fresh; an expired entry is removed.
    pub(crate) fn get(&self, key: &str, now_ms: u64) -> Option<Value> {
        {
            let slot = self.entries.get(key)?;
            if !slot.entry.is_expired(now_ms) {
                return Some(slot.entry.value.clone());
            }
        }
        self.entries
            .remove_if(key, |_, slot| slot.entry.is_expired(now_ms));
        None
    }

    pub(crate) fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub(crate) fn clear(&self) {
        self.entries.clear();
    }

    pub(crate) fn purge_expired(&self, now_ms: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, slot| !slot.entry.is_expired(now_ms));
        before.saturating_sub(self.entries.len())
    }

    fn oldest_key(&self) -> Option<String> {
        self.entries
            .iter()
            .min_by_key(|slot| (slot.entry.stored_at_ms, slot.seq))
            .map(|slot| slot.key().clone())
    }
}

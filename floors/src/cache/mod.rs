//! Two-tier block data cache.
//!
//! The memory tier is a bounded concurrent map; the disk tier stores one JSON record per key.
//! Which tiers a read or write touches is chosen per call by a [`CachePolicy`]:
//!
//! - `Memory` / `Disk`: only that tier.
//! - `Both`: writes go to both tiers; reads check memory first and promote a disk hit.
//! - `None`: every operation is a no-op.
//!
//! Disk failures are logged, counted in [`CacheStats::disk_errors`] and reported as a miss, so
//! callers can always fall through to the original source.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{CachePolicy, Clock, FloorError};

mod disk;
mod memory;

use disk::DiskTier;
use memory::MemoryTier;

pub const DEFAULT_MEMORY_CAPACITY: usize = 64;
pub const DEFAULT_MEMORY_TTL_MS: u64 = 30 * 60 * 1000;
pub const DEFAULT_DISK_TTL_MS: u64 = 24 * 60 * 60 * 1000;

/// A cached value with its write time. `ttl_ms == 0` never expires.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub stored_at_ms: u64,
    pub ttl_ms: u64,
}

impl CacheEntry {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.ttl_ms > 0 && now_ms.saturating_sub(self.stored_at_ms) > self.ttl_ms
    }
}

/// Selects the tier(s) affected by [`CacheStore::clear`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheTier {
    Memory,
    Disk,
    All,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries kept in memory. Zero disables the memory tier.
    pub memory_capacity: usize,
    pub memory_ttl_ms: u64,
    /// Directory for the disk tier. The disk tier is disabled when unset.
    pub disk_dir: Option<PathBuf>,
    pub disk_ttl_ms: u64,
    #[serde(skip)]
    pub clock: Clock,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            memory_ttl_ms: DEFAULT_MEMORY_TTL_MS,
            disk_dir: None,
            disk_ttl_ms: DEFAULT_DISK_TTL_MS,
            clock: Clock::System,
        }
    }
}

impl CacheConfig {
    pub fn with_memory_capacity(mut self, capacity: usize) -> Self {
        self.memory_capacity = capacity;
        self
    }

    pub fn with_memory_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.memory_ttl_ms = ttl_ms;
        self
    }

    pub fn with_disk_dir(mut self, dir: Option<impl Into<PathBuf>>) -> Self {
        self.disk_dir = dir.map(Into::into);
        self
    }

    pub fn with_disk_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.disk_ttl_ms = ttl_ms;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub disk_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    disk_errors: AtomicU64,
}

/// The block data cache, shared between the orchestrator and its load tasks.
#[derive(Debug)]
pub struct CacheStore {
    memory: MemoryTier,
    disk: Option<DiskTier>,
    memory_ttl_ms: u64,
    disk_ttl_ms: u64,
    clock: Clock,
    counters: Counters,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl CacheStore {
    pub fn new(config: CacheConfig) -> Self {
        fdebug!(
            memory_capacity = config.memory_capacity,
            disk = config.disk_dir.is_some(),
            "CacheStore::new"
        );
        Self {
            memory: MemoryTier::new(config.memory_capacity),
            disk: config.disk_dir.map(DiskTier::new),
            memory_ttl_ms: config.memory_ttl_ms,
            disk_ttl_ms: config.disk_ttl_ms,
            clock: config.clock,
            counters: Counters::default(),
        }
    }

    pub fn memory_capacity(&self) -> usize {
        self.memory.capacity()
    }

    /// Number of entries currently held by the memory tier (expired ones included until purged).
    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.len() == 0
    }

    pub fn has_disk_tier(&self) -> bool {
        self.disk.is_some()
    }

    pub fn disk_dir(&self) -> Option<&std::path::Path> {
        self.disk.as_ref().map(DiskTier::dir)
    }

    /// Stores `value` with each tier's default TTL.
    pub fn put(&self, key: &str, value: Value, policy: CachePolicy) {
        self.store(key, value, policy, None);
    }

    /// Stores `value` with an explicit TTL for every tier touched.
    pub fn put_with_ttl(&self, key: &str, value: Value, policy: CachePolicy, ttl_ms: u64) {
        self.store(key, value, policy, Some(ttl_ms));
    }

    fn store(&self, key: &str, value: Value, policy: CachePolicy, ttl_ms: Option<u64>) {
        if policy == CachePolicy::None {
            return;
        }
        let now = self.clock.now_ms();

        if policy.uses_disk() {
            if let Some(disk) = &self.disk {
                let entry = CacheEntry {
                    key: key.to_owned(),
                    value: value.clone(),
                    stored_at_ms: now,
                    ttl_ms: ttl_ms.unwrap_or(self.disk_ttl_ms),
                };
                if let Err(e) = disk.put(&entry) {
                    self.disk_failed(&e);
                }
            }
        }

        if policy.uses_memory() {
            let evicted = self.memory.put(CacheEntry {
                key: key.to_owned(),
                value,
                stored_at_ms: now,
                ttl_ms: ttl_ms.unwrap_or(self.memory_ttl_ms),
            });
            self.counters
                .evictions
                .fetch_add(evicted as u64, Ordering::Relaxed);
        }
    }

    /// Reads a fresh value, or `None` on miss, expiry, or disk failure.
    pub fn get(&self, key: &str, policy: CachePolicy) -> Option<Value> {
        if policy == CachePolicy::None {
            return None;
        }
        let now = self.clock.now_ms();

        if policy.uses_memory() {
            if let Some(v) = self.memory.get(key, now) {
                self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
                return Some(v);
            }
        }

        if policy.uses_disk() {
            if let Some(disk) = &self.disk {
                match disk.get(key, now) {
                    Ok(Some(v)) => {
                        self.counters.disk_hits.fetch_add(1, Ordering::Relaxed);
                        if policy == CachePolicy::Both {
                            ftrace!(key, "promoting disk hit");
                            let evicted = self.memory.put(CacheEntry {
                                key: key.to_owned(),
                                value: v.clone(),
                                stored_at_ms: now,
                                ttl_ms: self.memory_ttl_ms,
                            });
                            self.counters
                                .evictions
                                .fetch_add(evicted as u64, Ordering::Relaxed);
                        }
                        return Some(v);
                    }
                    Ok(None) => {}
                    Err(e) => self.disk_failed(&e),
                }
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn contains(&self, key: &str, policy: CachePolicy) -> bool {
        self.get(key, policy).is_some()
    }

    /// Removes `key` from every tier.
    pub fn invalidate(&self, key: &str) {
        self.memory.remove(key);
        if let Some(disk) = &self.disk {
            if let Err(e) = disk.remove(key) {
                self.disk_failed(&e);
            }
        }
    }

    pub fn clear(&self, tier: CacheTier) {
        fdebug!(?tier, "CacheStore::clear");
        if matches!(tier, CacheTier::Memory | CacheTier::All) {
            self.memory.clear();
        }
        if matches!(tier, CacheTier::Disk | CacheTier::All) {
            if let Some(disk) = &self.disk {
                if let Err(e) = disk.clear() {
                    self.disk_failed(&e);
                }
            }
        }
    }

    /// Sweeps expired entries out of both tiers. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut purged = self.memory.purge_expired(now);
        if let Some(disk) = &self.disk {
            match disk.purge_expired(now) {
                Ok(n) => purged += n,
                Err(e) => self.disk_failed(&e),
            }
        }
        purged
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            memory_hits: self.counters.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.counters.disk_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            disk_errors: self.counters.disk_errors.load(Ordering::Relaxed),
        }
    }

    fn disk_failed(&self, e: &FloorError) {
        fwarn!(code = e.code(), error = %e, "disk cache failure treated as miss");
        self.counters.disk_errors.fetch_add(1, Ordering::Relaxed);
    }
}

//! Bounded dimension cache with eviction revival.
//!
//! Two tiers: an LRU primary and an unbounded side map fed by the primary's
//! evictions. An entry evicted mid-cycle by capacity pressure is revived on
//! its next access; an entry that goes one full flush cycle untouched is
//! reclaimed for good when the side map is cleared. This lets the cache
//! absorb short-lived cardinality spikes without losing dimension snapshots
//! for keys that are still accumulating.

use crate::core::{Error, Result};
use lru::LruCache;
use rustc_hash::FxHashMap;
use std::hash::Hash;
use std::num::NonZeroUsize;

/// Capacity-bounded store with an evicted-items side map.
pub struct EvictionCache<K, V>
where
    K: Hash + Eq + Clone,
{
    primary: LruCache<K, V>,
    evicted: FxHashMap<K, V>,
}

impl<K, V> std::fmt::Debug for EvictionCache<K, V>
where
    K: Hash + Eq + Clone,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvictionCache")
            .field("capacity", &self.primary.cap())
            .field("primary_len", &self.primary.len())
            .field("evicted_len", &self.evicted.len())
            .finish()
    }
}

impl<K, V> EvictionCache<K, V>
where
    K: Hash + Eq + Clone,
{
    /// Creates a cache with the given primary capacity. Zero is a fatal
    /// configuration error.
    pub fn new(capacity: usize) -> Result<Self> {
        let capacity =
            NonZeroUsize::new(capacity).ok_or(Error::InvalidCacheSize { size: capacity })?;
        Ok(Self {
            primary: LruCache::new(capacity),
            evicted: FxHashMap::default(),
        })
    }

    /// Inserts or updates an entry. The LRU victim, if any, moves into the
    /// side map; a same-key value replacement is not an eviction.
    pub fn add(&mut self, key: K, value: V) {
        if let Some((victim_key, victim_value)) = self.primary.push(key.clone(), value) {
            if victim_key != key {
                self.evicted.insert(victim_key, victim_value);
            }
        }
    }

    /// Looks up an entry, updating its recency. A hit in the side map
    /// revives the entry back into the primary (possibly cascading a new
    /// eviction) and still counts as a hit.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        if self.primary.contains(key) {
            return self.primary.get(key);
        }
        let value = self.evicted.remove(key)?;
        self.add(key.clone(), value);
        self.primary.get(key)
    }

    /// Primary-only membership test, no recency update.
    ///
    /// Flush reconciliation relies on this being blind to the side map:
    /// evicted-and-unrevived keys must report as absent.
    pub fn contains(&self, key: &K) -> bool {
        self.primary.contains(key)
    }

    /// Clears the side map without touching the primary. Called once per
    /// flush after the export snapshot is built.
    pub fn remove_evicted_items(&mut self) {
        self.evicted.clear();
    }

    /// Clears both tiers (delta-temporality reset).
    pub fn purge(&mut self) {
        self.primary.clear();
        self.evicted.clear();
    }

    /// Number of entries in the primary store.
    pub fn len(&self) -> usize {
        self.primary.len()
    }

    /// Whether the primary store is empty.
    pub fn is_empty(&self) -> bool {
        self.primary.is_empty()
    }
}

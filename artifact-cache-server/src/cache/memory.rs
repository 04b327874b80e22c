//! Memory tier
//!
//! Bounded in-process LRU map of live entries; the fast path of every lookup.
//! Capacity is counted in entries. Bytes are tracked per category for
//! reporting only.

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::core::{CacheEntry, CacheKey, Category, now_millis};

/// Outcome of a memory-tier lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryLookup {
    Hit(Bytes),
    Miss,
    /// The entry was resident but past `expires_at`; it has been removed
    Expired,
}

/// Per-category residency
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct TierUsage {
    pub entries: usize,
    pub bytes: u64,
}

/// Memory tier statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryStats {
    pub entries: usize,
    pub max_entries: usize,
    pub total_bytes: u64,
    pub lru_evictions: u64,
    pub expirations: u64,
    pub usage_percent: f64,
    pub by_category: BTreeMap<Category, TierUsage>,
}

struct LruState {
    entries: LruCache<CacheKey, CacheEntry>,
    usage: BTreeMap<Category, TierUsage>,
    lru_evictions: u64,
    expirations: u64,
    /// Bumped by every `clear`
    generation: u64,
}

impl LruState {
    fn account_insert(&mut self, entry: &CacheEntry) {
        let usage = self.usage.entry(entry.category()).or_default();
        usage.entries += 1;
        usage.bytes += entry.size_bytes;
    }

    fn account_remove(&mut self, entry: &CacheEntry) {
        let usage = self.usage.entry(entry.category()).or_default();
        usage.entries = usage.entries.saturating_sub(1);
        usage.bytes = usage.bytes.saturating_sub(entry.size_bytes);
    }

    fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let removed = self.entries.pop(key)?;
        self.account_remove(&removed);
        Some(removed)
    }
}

/// In-memory LRU tier, cheap to clone and share
#[derive(Clone)]
pub struct MemoryTier {
    state: Arc<Mutex<LruState>>,
    max_entries: usize,
    eviction_batch: usize,
}

impl MemoryTier {
    /// Create a tier holding at most `max_entries`, evicting `eviction_batch`
    /// entries per pass once over capacity
    pub fn new(max_entries: usize, eviction_batch: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(LruState {
                entries: LruCache::unbounded(),
                usage: BTreeMap::new(),
                lru_evictions: 0,
                expirations: 0,
                generation: 0,
            })),
            max_entries: max_entries.max(1),
            eviction_batch: eviction_batch.max(1),
        }
    }

    /// Look up a key, promoting it to most recently used on a hit
    pub fn get(&self, key: &CacheKey) -> MemoryLookup {
        let now = now_millis();
        let mut state = self.state.lock();

        let live = match state.entries.peek(key) {
            None => {
                debug!("Memory MISS: {}", key);
                return MemoryLookup::Miss;
            }
            Some(entry) => entry.is_live_at(now),
        };

        if !live {
            state.remove(key);
            state.expirations += 1;
            debug!("Memory EXPIRED: {}", key);
            return MemoryLookup::Expired;
        }

        match state.entries.get_mut(key) {
            Some(entry) => {
                entry.last_accessed_at = now;
                debug!("Memory HIT: {}", key);
                MemoryLookup::Hit(entry.payload.clone())
            }
            None => MemoryLookup::Miss,
        }
    }

    /// Check residency without touching LRU order
    pub fn contains(&self, key: &CacheKey) -> bool {
        let now = now_millis();
        self.state
            .lock()
            .entries
            .peek(key)
            .is_some_and(|entry| entry.is_live_at(now))
    }

    /// Store a payload that expires `ttl` from now.
    ///
    /// Returns the categories of entries evicted to make room.
    pub fn set(&self, key: CacheKey, payload: Bytes, ttl: Duration) -> Vec<Category> {
        self.insert(CacheEntry::new(key, payload, ttl))
    }

    /// Store a fully-formed entry, keeping its timestamps.
    ///
    /// Returns the categories of entries evicted to make room.
    pub fn insert(&self, entry: CacheEntry) -> Vec<Category> {
        let mut state = self.state.lock();
        self.insert_locked(&mut state, entry)
    }

    /// Clear generation, read before fetching an entry to [`promote`](Self::promote)
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Insert an entry read from a slower tier.
    ///
    /// Skipped (`None`) when a `clear` ran since `generation` was read, or
    /// when a live entry at least as new is already resident.
    pub fn promote(&self, entry: CacheEntry, generation: u64) -> Option<Vec<Category>> {
        let now = now_millis();
        let mut state = self.state.lock();

        if state.generation != generation {
            debug!("Memory PROMOTE skipped, cleared since read: {}", entry.key);
            return None;
        }
        let superseded = state
            .entries
            .peek(&entry.key)
            .is_some_and(|resident| {
                resident.is_live_at(now) && resident.created_at >= entry.created_at
            });
        if superseded {
            debug!("Memory PROMOTE skipped, newer copy resident: {}", entry.key);
            return None;
        }

        Some(self.insert_locked(&mut state, entry))
    }

    fn insert_locked(&self, state: &mut LruState, entry: CacheEntry) -> Vec<Category> {
        let mut evicted = Vec::new();

        debug!("Memory PUT: {} ({} bytes)", entry.key, entry.size_bytes);

        state.account_insert(&entry);
        if let Some(previous) = state.entries.put(entry.key.clone(), entry) {
            state.account_remove(&previous);
        }

        // The entry just inserted is most recent and is never evicted here
        while state.entries.len() > self.max_entries {
            for _ in 0..self.eviction_batch {
                if state.entries.len() <= 1 {
                    break;
                }
                if let Some((key, old)) = state.entries.pop_lru() {
                    state.account_remove(&old);
                    state.lru_evictions += 1;
                    evicted.push(old.category());
                    debug!("Memory EVICT: {}", key);
                }
            }
        }

        if !evicted.is_empty() {
            debug!(
                "Memory tier evicted {} entries (limit={})",
                evicted.len(),
                self.max_entries
            );
        }

        evicted
    }

    /// Remove a key; returns whether it was resident
    pub fn delete(&self, key: &CacheKey) -> bool {
        let removed = self.state.lock().remove(key).is_some();
        if removed {
            debug!("Memory DELETE: {}", key);
        }
        removed
    }

    /// Drop every expired entry; returns the category of each one removed
    pub fn remove_expired(&self) -> Vec<Category> {
        let now = now_millis();
        let mut state = self.state.lock();

        let expired: Vec<CacheKey> = state
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_live_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        let mut categories = Vec::with_capacity(expired.len());
        for key in expired {
            if let Some(entry) = state.remove(&key) {
                categories.push(entry.category());
            }
        }
        state.expirations += categories.len() as u64;

        categories
    }

    /// Remove every entry, or every entry of one category
    pub fn clear(&self, category: Option<Category>) -> usize {
        let mut state = self.state.lock();
        state.generation += 1;

        let Some(category) = category else {
            let count = state.entries.len();
            state.entries.clear();
            state.usage.clear();
            return count;
        };

        let keys: Vec<CacheKey> = state
            .entries
            .iter()
            .filter(|(key, _)| key.category() == category)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &keys {
            state.remove(key);
        }
        keys.len()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Get memory tier statistics
    pub fn stats(&self) -> MemoryStats {
        let state = self.state.lock();
        let entries = state.entries.len();

        MemoryStats {
            entries,
            max_entries: self.max_entries,
            total_bytes: state.usage.values().map(|u| u.bytes).sum(),
            lru_evictions: state.lru_evictions,
            expirations: state.expirations,
            usage_percent: (entries as f64 / self.max_entries as f64) * 100.0,
            by_category: state.usage.clone(),
        }
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new(1000, 100)
    }
}

//! Persistent storage interface
//!
//! The coordinator only talks to the durable tier through [`PersistentStore`],
//! so the filesystem implementation in [`super::disk`] can be replaced by an
//! external store. Implementations are blocking; the coordinator calls them
//! from `spawn_blocking`.

use serde::Serialize;
use std::collections::BTreeMap;

use super::memory::TierUsage;
use crate::core::{CacheEntry, CacheKey, Category, Result};

/// Outcome of a durable-tier lookup
#[derive(Debug, Clone)]
pub enum DiskLookup {
    Hit(CacheEntry),
    Miss,
    /// Found but past `expires_at`; the stored copy has been removed
    Expired,
}

/// Entries removed by a sweep, size enforcement or clear
#[derive(Debug, Clone, Default)]
pub struct SweepOutcome {
    pub removed: Vec<CacheKey>,
    /// Entries that could not be removed after all retries
    pub failed: usize,
}

impl SweepOutcome {
    pub fn merge(&mut self, other: SweepOutcome) {
        self.removed.extend(other.removed);
        self.failed += other.failed;
    }
}

/// Durable tier statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiskStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub size_mb: f64,
    pub max_bytes: u64,
    pub utilization: f64,
    pub expirations: u64,
    pub size_evictions: u64,
    pub corrupt_entries: u64,
    pub by_category: BTreeMap<Category, TierUsage>,
}

/// Key-value contract of the durable tier
pub trait PersistentStore: Send + Sync {
    /// Read an entry. Corrupt entries are removed and reported as an error.
    fn get(&self, key: &CacheKey) -> Result<DiskLookup>;

    /// Atomically store an entry, then enforce the size cap. Returns the
    /// entries evicted by the cap.
    fn put(&self, entry: &CacheEntry) -> Result<SweepOutcome>;

    /// Remove an entry; returns whether it existed
    fn delete(&self, key: &CacheKey) -> Result<bool>;

    /// Total bytes currently stored
    fn size_bytes(&self) -> u64;

    /// Remove every entry past `expires_at`
    fn remove_expired(&self) -> SweepOutcome;

    /// Remove oldest entries (by creation time) until under the size cap
    fn enforce_capacity(&self) -> SweepOutcome;

    /// Remove every entry, or every entry of one category
    fn clear(&self, category: Option<Category>) -> SweepOutcome;

    fn stats(&self) -> DiskStats;

    /// Verify the store is reachable and writable
    fn check_health(&self) -> Result<()>;
}

//! Cache Module
//!
//! Two storage tiers behind a single coordinator:
//! - Memory: bounded LRU with per-entry TTL
//! - Disk: persistent, compressed, size-capped store
//! - Coordinator: lookups, promotion, write-back, single-flight
//! - Cleanup: periodic background sweep

pub mod cleanup;
pub mod coordinator;
pub mod disk;
pub mod memory;
pub mod single_flight;
pub mod storage;

pub use cleanup::{CleanupHandle, CleanupReport, CleanupStats};
pub use coordinator::{CacheCoordinator, CacheHealth, CacheStats, CategoryCacheStats};
pub use disk::{DiskTier, DiskTierConfig};
pub use memory::{MemoryLookup, MemoryStats, MemoryTier, TierUsage};
pub use single_flight::SingleFlight;
pub use storage::{DiskLookup, DiskStats, PersistentStore, SweepOutcome};

//! Cache Coordinator
//!
//! Two-tier read path (memory, then disk with promotion), write-through with
//! deferred disk writes, clearing, single-flight computation and lifecycle of
//! the background cleanup task.
//!
//! Disk writes spawned by `set` hold a read guard on the write gate until
//! they land. Sweeps, clears, `flush` and `shutdown` take the write guard, so
//! they never observe a half-finished write.

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::cleanup::{self, CleanupHandle, CleanupStats};
use super::disk::{DiskTier, DiskTierConfig};
use super::memory::{MemoryLookup, MemoryStats, MemoryTier};
use super::single_flight::SingleFlight;
use super::storage::{DiskLookup, DiskStats, PersistentStore, SweepOutcome};
use crate::config::CacheConfig;
use crate::core::key::{self, CacheParams};
use crate::core::{CacheEntry, CacheError, CacheKey, Category, ClearReport, Result};
use crate::metrics;
use crate::monitoring::PerformanceMonitor;
use crate::monitoring::performance::producer_operation;

/// Per-category view combining monitor counters and tier residency
#[derive(Debug, Clone, Default, Serialize)]
pub struct CategoryCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    /// Bytes held by the disk tier
    pub bytes_stored: u64,
    pub memory_entries: usize,
    pub disk_entries: usize,
    pub hit_rate: f64,
    pub avg_latency_ms: f64,
    pub time_saved_ms: f64,
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub categories: BTreeMap<Category, CategoryCacheStats>,
    /// Total hits over total lookups (0-1)
    pub hit_ratio: f64,
    pub time_saved_ms: f64,
    pub in_flight: usize,
    pub memory: MemoryStats,
    pub disk: DiskStats,
    pub cleanup: Option<CleanupStats>,
}

/// Health of the cache subsystem
#[derive(Debug, Clone, Serialize)]
pub struct CacheHealth {
    /// `healthy`, `degraded` or `disabled`
    pub status: &'static str,
    pub enabled: bool,
    pub disk_reachable: bool,
    pub disk_within_cap: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_error: Option<String>,
    pub memory_entries: usize,
    pub disk_entries: usize,
    pub disk_bytes: u64,
    pub disk_max_bytes: u64,
}

impl CacheHealth {
    pub fn is_healthy(&self) -> bool {
        self.status != "degraded"
    }
}

/// Run a blocking store call off the async workers
async fn run_blocking<T, F>(disk: Arc<dyn PersistentStore>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn PersistentStore) -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(disk.as_ref()))
        .await
        .map_err(|e| CacheError::InternalError(format!("disk task failed: {}", e)))?
}

/// Write an entry to the disk tier, retrying with linear backoff.
///
/// Returns whether the entry was persisted.
async fn persist(
    disk: Arc<dyn PersistentStore>,
    monitor: Arc<PerformanceMonitor>,
    entry: CacheEntry,
    attempts: u32,
    delay: Duration,
) -> bool {
    let attempts = attempts.max(1);
    let entry = Arc::new(entry);

    for attempt in 1..=attempts {
        let started = Instant::now();
        let write = Arc::clone(&entry);
        match run_blocking(Arc::clone(&disk), move |store| store.put(&write)).await {
            Ok(evicted) => {
                metrics::record_disk_write("success");
                metrics::record_op("disk_put", started.elapsed().as_secs_f64());
                record_size_evictions(&monitor, &evicted);
                return true;
            }
            Err(e) if attempt < attempts => {
                metrics::record_disk_write("retry");
                warn!(
                    "Disk write failed for {} (attempt {}/{}): {}",
                    entry.key, attempt, attempts, e
                );
                tokio::time::sleep(delay * attempt).await;
            }
            Err(e) => {
                metrics::record_disk_write("failed");
                error!(
                    "Disk write lost for {} after {} attempts, entry is memory-only: {}",
                    entry.key, attempts, e
                );
            }
        }
    }

    false
}

fn record_size_evictions(monitor: &PerformanceMonitor, outcome: &SweepOutcome) {
    for key in &outcome.removed {
        monitor.record_evictions(key.category(), 1);
    }
    metrics::record_evictions("disk", "size_cap", outcome.removed.len() as u64);
}

/// Entry point of the cache subsystem
pub struct CacheCoordinator {
    config: CacheConfig,
    memory: MemoryTier,
    disk: Arc<dyn PersistentStore>,
    monitor: Arc<PerformanceMonitor>,
    flights: SingleFlight<Bytes>,
    write_gate: Arc<RwLock<()>>,
    cleanup: Mutex<Option<CleanupHandle>>,
    shutting_down: AtomicBool,
}

impl CacheCoordinator {
    /// Open both tiers without starting background cleanup
    pub fn open(config: CacheConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let disk = DiskTier::open(DiskTierConfig::from(&config))?;
        Ok(Self::with_store(config, Arc::new(disk)))
    }

    /// Build a coordinator on top of any persistent store
    pub fn with_store(config: CacheConfig, disk: Arc<dyn PersistentStore>) -> Arc<Self> {
        let memory = MemoryTier::new(config.max_memory_entries, config.lru_eviction_batch);

        info!(
            "Cache coordinator ready (enabled={}, memory={} entries, disk cap={} MB, async writes={})",
            config.enabled,
            config.max_memory_entries,
            config.max_disk_size_mb,
            config.async_disk_writes
        );

        Arc::new(Self {
            config,
            memory,
            disk,
            monitor: Arc::new(PerformanceMonitor::new()),
            flights: SingleFlight::new(),
            write_gate: Arc::new(RwLock::new(())),
            cleanup: Mutex::new(None),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Open both tiers and launch the cleanup task. Must run inside a tokio
    /// runtime.
    pub fn start(config: CacheConfig) -> Result<Arc<Self>> {
        let coordinator = Self::open(config)?;
        coordinator.start_cleanup();
        Ok(coordinator)
    }

    /// Launch the cleanup task if it is not already running
    pub fn start_cleanup(self: &Arc<Self>) {
        let mut slot = self.cleanup.lock();
        if slot.is_none() {
            *slot = Some(cleanup::spawn(
                Arc::downgrade(self),
                self.config.cleanup_period(),
            ));
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn memory(&self) -> &MemoryTier {
        &self.memory
    }

    pub fn disk(&self) -> &Arc<dyn PersistentStore> {
        &self.disk
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    /// Look up a cached artifact
    pub async fn get(&self, category: Category, params: &CacheParams) -> Option<Bytes> {
        self.lookup(&key::build(category, params)).await
    }

    /// Look up by a prebuilt key
    pub async fn lookup(&self, key: &CacheKey) -> Option<Bytes> {
        let started = Instant::now();
        let category = key.category();

        if !self.config.enabled {
            self.record_miss(category, started);
            return None;
        }

        let mut expired = false;
        match self.memory.get(key) {
            MemoryLookup::Hit(payload) => {
                self.monitor.record_hit(category);
                metrics::record_lookup(
                    category.as_str(),
                    "memory",
                    "hit",
                    started.elapsed().as_secs_f64(),
                );
                return Some(payload);
            }
            MemoryLookup::Expired => expired = true,
            MemoryLookup::Miss => {}
        }

        let generation = self.memory.generation();
        let read_key = key.clone();
        let found = run_blocking(Arc::clone(&self.disk), move |store| store.get(&read_key)).await;

        match found {
            Ok(DiskLookup::Hit(entry)) => {
                let payload = entry.payload.clone();
                debug!("Promoting disk hit into memory: {}", key);
                if let Some(evicted) = self.memory.promote(entry, generation) {
                    self.record_memory_evictions(&evicted);
                }

                self.monitor.record_hit(category);
                metrics::record_lookup(
                    category.as_str(),
                    "disk",
                    "hit",
                    started.elapsed().as_secs_f64(),
                );
                Some(payload)
            }
            Ok(DiskLookup::Expired) => {
                self.memory.delete(key);
                self.record_expired(category);
                self.record_miss(category, started);
                None
            }
            Ok(DiskLookup::Miss) => {
                if expired {
                    self.record_expired(category);
                }
                self.record_miss(category, started);
                None
            }
            Err(e) => {
                warn!("Disk read failed for {}, treating as miss: {}", key, e);
                let doomed = key.clone();
                if let Err(e) =
                    run_blocking(Arc::clone(&self.disk), move |store| store.delete(&doomed)).await
                {
                    warn!("Failed to delete unreadable entry {}: {}", key, e);
                }
                if expired {
                    self.record_expired(category);
                }
                self.record_miss(category, started);
                None
            }
        }
    }

    /// Store an artifact with its category TTL
    pub async fn set(&self, category: Category, params: &CacheParams, payload: impl Into<Bytes>) {
        let ttl = self.config.ttl_for(category);
        self.store(key::build(category, params), payload.into(), ttl)
            .await;
    }

    /// Store an artifact with an explicit TTL
    pub async fn set_with_ttl(
        &self,
        category: Category,
        params: &CacheParams,
        payload: impl Into<Bytes>,
        ttl: Duration,
    ) {
        self.store(key::build(category, params), payload.into(), ttl)
            .await;
    }

    /// Store under a prebuilt key. Memory is written before returning; the
    /// disk copy follows in the background unless async writes are off.
    pub async fn store(&self, key: CacheKey, payload: Bytes, ttl: Duration) {
        if !self.config.enabled {
            return;
        }
        if self.shutting_down.load(Ordering::Acquire) {
            debug!("Ignoring write during shutdown: {}", key);
            return;
        }

        let started = Instant::now();
        let entry = CacheEntry::new(key, payload, ttl);
        let evicted = self.memory.insert(entry.clone());
        self.record_memory_evictions(&evicted);

        let disk = Arc::clone(&self.disk);
        let monitor = Arc::clone(&self.monitor);
        let attempts = self.config.retry_attempts;
        let delay = self.config.retry_delay();

        if self.config.async_disk_writes {
            let gate = Arc::clone(&self.write_gate);
            match gate.clone().try_read_owned() {
                Ok(guard) => {
                    tokio::spawn(async move {
                        persist(disk, monitor, entry, attempts, delay).await;
                        drop(guard);
                    });
                }
                // A sweep or flush holds the gate: write once it is released
                Err(_) => {
                    tokio::spawn(async move {
                        let _guard = gate.read_owned().await;
                        persist(disk, monitor, entry, attempts, delay).await;
                    });
                }
            }
        } else {
            let _guard = self.write_gate.read().await;
            persist(disk, monitor, entry, attempts, delay).await;
        }

        metrics::record_op("set", started.elapsed().as_secs_f64());
    }

    /// Look up and deserialize a JSON artifact. Undecodable payloads are
    /// treated as misses.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        category: Category,
        params: &CacheParams,
    ) -> Option<T> {
        let payload = self.get(category, params).await?;
        match serde_json::from_slice(&payload) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Cached {} payload is not valid JSON: {}", category, e);
                None
            }
        }
    }

    /// Serialize and store a JSON artifact; skipped with a warning if the
    /// value cannot be serialized
    pub async fn set_json<T: Serialize + ?Sized>(
        &self,
        category: Category,
        params: &CacheParams,
        value: &T,
    ) {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.set(category, params, bytes).await,
            Err(e) => warn!("Skipping cache write for {}: serialization failed: {}", category, e),
        }
    }

    /// Run `producer` at most once at a time per key
    pub async fn single_flight<F, Fut>(&self, key: &CacheKey, producer: F) -> Result<Bytes>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes>> + Send + 'static,
    {
        self.flights.run(key.as_str(), producer).await
    }

    /// Return the cached artifact, or compute it once (shared with concurrent
    /// callers for the same key) and cache the result
    pub async fn get_or_compute<F, Fut>(
        self: &Arc<Self>,
        category: Category,
        params: &CacheParams,
        producer: F,
    ) -> Result<Bytes>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Bytes>> + Send + 'static,
    {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(CacheError::ShuttingDown);
        }

        let operation = producer_operation(category);
        let started = Instant::now();
        let key = key::build(category, params);

        if let Some(payload) = self.lookup(&key).await {
            self.monitor
                .track_operation(operation, started.elapsed(), true);
            return Ok(payload);
        }

        let this = Arc::clone(self);
        let flight_key = key.clone();
        self.single_flight(&key, move || async move {
            // A flight that finished between our miss and now already cached it
            if let MemoryLookup::Hit(payload) = this.memory.get(&flight_key) {
                return Ok(payload);
            }

            let computing = Instant::now();
            let payload = producer().await?;
            let latency = computing.elapsed();

            this.monitor.record_latency(category, latency);
            this.monitor.track_operation(operation, latency, false);

            let ttl = this.config.ttl_for(category);
            this.store(flight_key, payload.clone(), ttl).await;
            Ok::<Bytes, CacheError>(payload)
        })
        .await
    }

    /// Remove expired entries from both tiers. Idempotent.
    pub async fn clear_expired(&self) -> ClearReport {
        let _gate = self.write_gate.write().await;
        let started = Instant::now();

        let memory_expired = self.memory.remove_expired();
        for category in &memory_expired {
            self.monitor.record_expirations(*category, 1);
        }

        let outcome = run_blocking(Arc::clone(&self.disk), |store| Ok(store.remove_expired()))
            .await
            .unwrap_or_else(|e| {
                warn!("Disk expiry sweep failed: {}", e);
                SweepOutcome::default()
            });
        // Memory copies share `expires_at` and went in the pass above; a
        // resident entry for one of these keys now is a newer write
        for key in &outcome.removed {
            self.monitor.record_expirations(key.category(), 1);
        }

        metrics::record_evictions("memory", "expired", memory_expired.len() as u64);
        metrics::record_evictions("disk", "expired", outcome.removed.len() as u64);
        metrics::record_op("clear_expired", started.elapsed().as_secs_f64());

        let report = ClearReport {
            memory: memory_expired.len(),
            disk: outcome.removed.len(),
        };
        if report.total() > 0 || outcome.failed > 0 {
            info!(
                "Expired entries removed: memory={}, disk={}, failed={}",
                report.memory, report.disk, outcome.failed
            );
        }
        report
    }

    /// Bring the disk tier back under its size cap; returns entries removed
    pub async fn enforce_capacity(&self) -> usize {
        let _gate = self.write_gate.write().await;

        let outcome = run_blocking(Arc::clone(&self.disk), |store| Ok(store.enforce_capacity()))
            .await
            .unwrap_or_else(|e| {
                warn!("Disk size enforcement failed: {}", e);
                SweepOutcome::default()
            });
        record_size_evictions(&self.monitor, &outcome);
        outcome.removed.len()
    }

    /// Remove every entry, or every entry of one category, from both tiers
    pub async fn clear_all(&self, category: Option<Category>) -> ClearReport {
        let _gate = self.write_gate.write().await;

        // Disk first: a lookup that read a disk copy before it was removed
        // sees the memory clear and drops its promotion
        let outcome = run_blocking(Arc::clone(&self.disk), move |store| Ok(store.clear(category)))
            .await
            .unwrap_or_else(|e| {
                warn!("Disk clear failed: {}", e);
                SweepOutcome::default()
            });
        let memory = self.memory.clear(category);

        metrics::record_evictions("memory", "cleared", memory as u64);
        metrics::record_evictions("disk", "cleared", outcome.removed.len() as u64);

        let scope = category.map_or("all categories", |c| c.as_str());
        info!(
            "Cache cleared ({}): memory={}, disk={}, failed={}",
            scope,
            memory,
            outcome.removed.len(),
            outcome.failed
        );

        ClearReport {
            memory,
            disk: outcome.removed.len(),
        }
    }

    pub fn stats(&self) -> CacheStats {
        let memory = self.memory.stats();
        let disk = self.disk.stats();

        metrics::update_tier_usage("memory", memory.entries, memory.total_bytes);
        metrics::update_tier_usage("disk", disk.entries, disk.total_bytes);

        let mut total_hits = 0;
        let mut total_lookups = 0;
        let mut time_saved_ms = 0.0;

        let categories = Category::ALL
            .into_iter()
            .map(|category| {
                let perf = self.monitor.category_stats(category);
                let mem = memory.by_category.get(&category).copied().unwrap_or_default();
                let dsk = disk.by_category.get(&category).copied().unwrap_or_default();

                total_hits += perf.hits;
                total_lookups += perf.hits + perf.misses;
                time_saved_ms += perf.time_saved_ms;

                (
                    category,
                    CategoryCacheStats {
                        hits: perf.hits,
                        misses: perf.misses,
                        evictions: perf.evictions,
                        expirations: perf.expirations,
                        bytes_stored: dsk.bytes,
                        memory_entries: mem.entries,
                        disk_entries: dsk.entries,
                        hit_rate: perf.hit_rate,
                        avg_latency_ms: perf.avg_latency_ms,
                        time_saved_ms: perf.time_saved_ms,
                    },
                )
            })
            .collect();

        CacheStats {
            enabled: self.config.enabled,
            categories,
            hit_ratio: if total_lookups == 0 {
                0.0
            } else {
                total_hits as f64 / total_lookups as f64
            },
            time_saved_ms,
            in_flight: self.flights.in_flight(),
            memory,
            disk,
            cleanup: self.cleanup.lock().as_ref().map(|h| h.stats()),
        }
    }

    /// Check that the disk tier is reachable and within its cap
    pub async fn health(&self) -> CacheHealth {
        let probe = run_blocking(Arc::clone(&self.disk), |store| store.check_health()).await;
        let disk = self.disk.stats();
        let disk_within_cap = disk.total_bytes <= disk.max_bytes;

        let status = if !self.config.enabled {
            "disabled"
        } else if probe.is_ok() && disk_within_cap {
            "healthy"
        } else {
            "degraded"
        };

        CacheHealth {
            status,
            enabled: self.config.enabled,
            disk_reachable: probe.is_ok(),
            disk_within_cap,
            disk_error: probe.err().map(|e| e.to_string()),
            memory_entries: self.memory.len(),
            disk_entries: disk.entries,
            disk_bytes: disk.total_bytes,
            disk_max_bytes: disk.max_bytes,
        }
    }

    /// Wait for every pending disk write to finish
    pub async fn flush(&self) {
        let _gate = self.write_gate.write().await;
    }

    /// Stop cleanup, refuse new writes and drain pending disk writes
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Cache coordinator shutting down");

        let handle = self.cleanup.lock().take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }

        self.flush().await;
        info!("Cache coordinator stopped");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    fn record_miss(&self, category: Category, started: Instant) {
        self.monitor.record_miss(category);
        metrics::record_lookup(
            category.as_str(),
            "none",
            "miss",
            started.elapsed().as_secs_f64(),
        );
    }

    fn record_expired(&self, category: Category) {
        self.monitor.record_expirations(category, 1);
        metrics::record_evictions("memory", "expired", 1);
    }

    fn record_memory_evictions(&self, evicted: &[Category]) {
        for category in evicted {
            self.monitor.record_evictions(*category, 1);
        }
        metrics::record_evictions("memory", "lru", evicted.len() as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::atomic::AtomicUsize;
    use tempfile::{TempDir, tempdir};

    fn config(dir: &TempDir) -> CacheConfig {
        CacheConfig {
            storage_path: dir.path().to_path_buf(),
            async_disk_writes: false,
            retry_delay: 1,
            ..Default::default()
        }
    }

    fn params(symbol: &str) -> CacheParams {
        CacheParams::new()
            .with("symbol", symbol)
            .with("interval", "1d")
            .with("candles", 100i64)
    }

    #[tokio::test]
    async fn test_set_then_get_hits_memory() {
        let dir = tempdir().unwrap();
        let cache = CacheCoordinator::open(config(&dir)).unwrap();

        cache
            .set(Category::Data, &params("AAPL"), &b"ohlcv"[..])
            .await;

        let hit = cache.get(Category::Data, &params("aapl")).await;
        assert_eq!(hit.as_deref(), Some(&b"ohlcv"[..]));
        assert!(cache.get(Category::Chart, &params("AAPL")).await.is_none());

        let stats = cache.stats();
        assert_eq!(stats.categories[&Category::Data].hits, 1);
        assert_eq!(stats.categories[&Category::Chart].misses, 1);
        assert!((stats.hit_ratio - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_disk_hit_is_promoted() {
        let dir = tempdir().unwrap();
        let cache = CacheCoordinator::open(config(&dir)).unwrap();
        let key = key::build(Category::Chart, &params("MSFT"));

        cache
            .set(Category::Chart, &params("MSFT"), &b"png"[..])
            .await;
        cache.memory().clear(None);
        assert!(!cache.memory().contains(&key));

        let hit = cache.get(Category::Chart, &params("MSFT")).await;
        assert_eq!(hit.as_deref(), Some(&b"png"[..]));
        assert!(cache.memory().contains(&key));
    }

    #[tokio::test]
    async fn test_disabled_cache_always_misses() {
        let dir = tempdir().unwrap();
        let mut cfg = config(&dir);
        cfg.enabled = false;
        let cache = CacheCoordinator::open(cfg).unwrap();

        cache
            .set(Category::Data, &params("AAPL"), &b"ohlcv"[..])
            .await;

        assert!(cache.get(Category::Data, &params("AAPL")).await.is_none());
        assert_eq!(cache.stats().memory.entries, 0);
        assert_eq!(cache.health().await.status, "disabled");
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Snapshot {
        symbol: String,
        closes: Vec<f64>,
    }

    #[tokio::test]
    async fn test_json_round_trip() {
        let dir = tempdir().unwrap();
        let cache = CacheCoordinator::open(config(&dir)).unwrap();
        let value = Snapshot {
            symbol: "AAPL".to_string(),
            closes: vec![189.5, 190.25],
        };

        cache.set_json(Category::Data, &params("AAPL"), &value).await;

        let found: Option<Snapshot> = cache.get_json(Category::Data, &params("AAPL")).await;
        assert_eq!(found, Some(value));

        cache
            .set(Category::Data, &params("BAD"), &b"not json"[..])
            .await;
        let bad: Option<Snapshot> = cache.get_json(Category::Data, &params("BAD")).await;
        assert!(bad.is_none());
    }

    #[tokio::test]
    async fn test_get_or_compute_caches_result() {
        let dir = tempdir().unwrap();
        let cache = CacheCoordinator::open(config(&dir)).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let out = cache
                .get_or_compute(Category::Analysis, &params("AAPL"), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Bytes::from_static(b"bullish"))
                })
                .await
                .unwrap();
            assert_eq!(out.as_ref(), b"bullish");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.monitor().category_stats(Category::Analysis);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_get_or_compute_concurrent_callers_compute_once() {
        let dir = tempdir().unwrap();
        let cache = CacheCoordinator::open(config(&dir)).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(Category::Chart, &params("TSLA"), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(Bytes::from_static(b"chart"))
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().as_ref(), b"chart");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_producer_error_is_not_cached() {
        let dir = tempdir().unwrap();
        let cache = CacheCoordinator::open(config(&dir)).unwrap();

        let failed = cache
            .get_or_compute(Category::Data, &params("AAPL"), || async {
                Err(CacheError::ProducerFailed("exchange offline".to_string()))
            })
            .await;
        assert!(matches!(failed, Err(CacheError::ProducerFailed(_))));
        assert!(cache.get(Category::Data, &params("AAPL")).await.is_none());
    }

    #[tokio::test]
    async fn test_clear_expired_is_idempotent() {
        let dir = tempdir().unwrap();
        let cache = CacheCoordinator::open(config(&dir)).unwrap();

        cache
            .set_with_ttl(
                Category::Data,
                &params("OLD"),
                &b"1"[..],
                Duration::from_millis(30),
            )
            .await;
        cache.set(Category::Data, &params("NEW"), &b"2"[..]).await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        let first = cache.clear_expired().await;
        assert_eq!(first, ClearReport { memory: 1, disk: 1 });
        assert_eq!(cache.clear_expired().await.total(), 0);
        assert!(cache.get(Category::Data, &params("NEW")).await.is_some());
    }

    #[tokio::test]
    async fn test_clear_all_by_category() {
        let dir = tempdir().unwrap();
        let cache = CacheCoordinator::open(config(&dir)).unwrap();

        cache.set(Category::Data, &params("A"), &b"1"[..]).await;
        cache.set(Category::Chart, &params("A"), &b"2"[..]).await;

        let report = cache.clear_all(Some(Category::Chart)).await;
        assert_eq!(report, ClearReport { memory: 1, disk: 1 });
        assert!(cache.get(Category::Chart, &params("A")).await.is_none());
        assert!(cache.get(Category::Data, &params("A")).await.is_some());

        assert_eq!(cache.clear_all(None).await.total(), 2);
        assert_eq!(cache.clear_all(None).await.total(), 0);
    }

    #[tokio::test]
    async fn test_flush_waits_for_background_writes() {
        let dir = tempdir().unwrap();
        let mut cfg = config(&dir);
        cfg.async_disk_writes = true;
        let cache = CacheCoordinator::open(cfg).unwrap();

        for symbol in ["A", "B", "C"] {
            cache.set(Category::Data, &params(symbol), &b"x"[..]).await;
        }
        cache.flush().await;

        assert_eq!(cache.stats().disk.entries, 3);
    }

    #[tokio::test]
    async fn test_memory_eviction_keeps_disk_copy() {
        let dir = tempdir().unwrap();
        let mut cfg = config(&dir);
        cfg.max_memory_entries = 2;
        cfg.lru_eviction_batch = 1;
        let cache = CacheCoordinator::open(cfg).unwrap();

        for symbol in ["A", "B", "C"] {
            cache.set(Category::Data, &params(symbol), &b"x"[..]).await;
        }

        let stats = cache.stats();
        assert_eq!(stats.memory.entries, 2);
        assert_eq!(stats.disk.entries, 3);
        assert_eq!(stats.categories[&Category::Data].evictions, 1);
        assert!(cache.get(Category::Data, &params("A")).await.is_some());
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work() {
        let dir = tempdir().unwrap();
        let cache = CacheCoordinator::start(config(&dir)).unwrap();

        cache.shutdown().await;
        cache.shutdown().await;

        let result = cache
            .get_or_compute(Category::Data, &params("AAPL"), || async {
                Ok(Bytes::from_static(b"x"))
            })
            .await;
        assert_eq!(result, Err(CacheError::ShuttingDown));
        assert!(cache.stats().cleanup.is_none());
    }

    #[tokio::test]
    async fn test_health_reports_disk() {
        let dir = tempdir().unwrap();
        let cache = CacheCoordinator::open(config(&dir)).unwrap();

        let health = cache.health().await;
        assert_eq!(health.status, "healthy");
        assert!(health.disk_reachable);
        assert!(health.disk_within_cap);
        assert!(health.is_healthy());
    }

    /// Disk tier with injectable latency and write failures
    struct ScriptedStore {
        inner: DiskTier,
        slow_put_payload: Option<&'static [u8]>,
        get_delay: Duration,
        fail_puts: bool,
        puts: AtomicUsize,
    }

    impl ScriptedStore {
        fn new(dir: &TempDir) -> Self {
            let inner = DiskTier::open(DiskTierConfig::from(&config(dir))).unwrap();
            Self {
                inner,
                slow_put_payload: None,
                get_delay: Duration::ZERO,
                fail_puts: false,
                puts: AtomicUsize::new(0),
            }
        }
    }

    impl PersistentStore for ScriptedStore {
        fn get(&self, key: &CacheKey) -> Result<DiskLookup> {
            std::thread::sleep(self.get_delay);
            self.inner.get(key)
        }

        fn put(&self, entry: &CacheEntry) -> Result<SweepOutcome> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            if self.fail_puts {
                return Err(CacheError::InternalError("no space left on device".to_string()));
            }
            if self.slow_put_payload == Some(entry.payload.as_ref()) {
                std::thread::sleep(Duration::from_millis(200));
            }
            self.inner.put(entry)
        }

        fn delete(&self, key: &CacheKey) -> Result<bool> {
            self.inner.delete(key)
        }

        fn size_bytes(&self) -> u64 {
            self.inner.size_bytes()
        }

        fn remove_expired(&self) -> SweepOutcome {
            self.inner.remove_expired()
        }

        fn enforce_capacity(&self) -> SweepOutcome {
            self.inner.enforce_capacity()
        }

        fn clear(&self, category: Option<Category>) -> SweepOutcome {
            self.inner.clear(category)
        }

        fn stats(&self) -> DiskStats {
            self.inner.stats()
        }

        fn check_health(&self) -> Result<()> {
            self.inner.check_health()
        }
    }

    #[tokio::test]
    async fn test_overlapping_writes_keep_latest_on_disk() {
        let dir = tempdir().unwrap();
        let mut store = ScriptedStore::new(&dir);
        store.slow_put_payload = Some(b"old");
        let mut cfg = config(&dir);
        cfg.async_disk_writes = true;
        let cache = CacheCoordinator::with_store(cfg, Arc::new(store));

        cache.set(Category::Chart, &params("AAPL"), &b"old"[..]).await;
        cache.set(Category::Chart, &params("AAPL"), &b"new"[..]).await;
        cache.flush().await;

        cache.memory().clear(None);
        let hit = cache.get(Category::Chart, &params("AAPL")).await;
        assert_eq!(hit.as_deref(), Some(&b"new"[..]));
    }

    #[tokio::test]
    async fn test_promotion_does_not_overwrite_newer_write() {
        let dir = tempdir().unwrap();
        let mut store = ScriptedStore::new(&dir);
        store.get_delay = Duration::from_millis(150);
        let cache = CacheCoordinator::with_store(config(&dir), Arc::new(store));

        cache.set(Category::Data, &params("AAPL"), &b"stale"[..]).await;
        cache.memory().clear(None);

        let reader = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get(Category::Data, &params("AAPL")).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        cache.set(Category::Data, &params("AAPL"), &b"fresh"[..]).await;

        // The slow read started before the write and may return either copy
        assert!(reader.await.unwrap().is_some());

        let key = key::build(Category::Data, &params("AAPL"));
        assert_eq!(cache.memory().get(&key), MemoryLookup::Hit(Bytes::from_static(b"fresh")));
    }

    #[tokio::test]
    async fn test_failed_disk_write_leaves_entry_in_memory() {
        let dir = tempdir().unwrap();
        let mut store = ScriptedStore::new(&dir);
        store.fail_puts = true;
        let store = Arc::new(store);
        let mut cfg = config(&dir);
        cfg.retry_attempts = 3;
        let cache = CacheCoordinator::with_store(cfg, store.clone());

        cache.set(Category::Analysis, &params("TSLA"), &b"summary"[..]).await;

        assert_eq!(store.puts.load(Ordering::SeqCst), 3);
        assert_eq!(cache.stats().disk.entries, 0);
        let hit = cache.get(Category::Analysis, &params("TSLA")).await;
        assert_eq!(hit.as_deref(), Some(&b"summary"[..]));
    }
}

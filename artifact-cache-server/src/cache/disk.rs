//! Disk tier
//!
//! Persistent store surviving restarts, one directory per category:
//!
//! ```text
//! <storage_path>/<category>/<key>.cache
//! ```
//!
//! Each file is `MAGIC | u32 LE metadata length | bincode metadata | payload`.
//! The metadata carries `expires_at`, the uncompressed size, the compression
//! flag and a CRC32 of the original payload. Writes go to a temporary file in
//! the same directory and are renamed into place, so a crash never leaves a
//! partially written entry visible.

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::memory::TierUsage;
use super::storage::{DiskLookup, DiskStats, PersistentStore, SweepOutcome};
use crate::compression::{CompressionAlgorithm, CompressionConfig, Compressor};
use crate::config::CacheConfig;
use crate::core::{CacheEntry, CacheError, CacheKey, Category, Result, now_millis};

const MAGIC: &[u8; 8] = b"ACACHE01";
const HEADER_LEN: usize = MAGIC.len() + 4;
const MAX_META_LEN: usize = 64 * 1024;
const FILE_EXT: &str = "cache";
const TMP_MARKER: &str = ".tmp-";

/// Metadata persisted in front of every payload
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryMeta {
    key: String,
    category: Category,
    created_at: u64,
    expires_at: u64,
    size_bytes: u64,
    compression: CompressionAlgorithm,
    checksum: u32,
}

/// In-memory view of one stored file
#[derive(Debug, Clone)]
struct IndexEntry {
    created_at: u64,
    expires_at: u64,
    file_bytes: u64,
}

#[derive(Debug, Default)]
struct DiskCounters {
    expirations: u64,
    size_evictions: u64,
    corrupt: u64,
}

/// Disk tier configuration
#[derive(Debug, Clone)]
pub struct DiskTierConfig {
    pub directory: PathBuf,
    pub max_size_bytes: u64,
    pub compression: CompressionConfig,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for DiskTierConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./cache_data"),
            max_size_bytes: 500 * 1024 * 1024,
            compression: CompressionConfig::default(),
            retry_attempts: 3,
            retry_delay: Duration::from_millis(100),
        }
    }
}

impl From<&CacheConfig> for DiskTierConfig {
    fn from(config: &CacheConfig) -> Self {
        Self {
            directory: config.storage_path.clone(),
            max_size_bytes: config.max_disk_bytes(),
            compression: config.compression(),
            retry_attempts: config.retry_attempts.max(1),
            retry_delay: config.retry_delay(),
        }
    }
}

/// Filesystem-backed [`PersistentStore`]
pub struct DiskTier {
    config: DiskTierConfig,
    compressor: Compressor,
    index: RwLock<HashMap<CacheKey, IndexEntry>>,
    counters: Mutex<DiskCounters>,
}

impl DiskTier {
    /// Open (or create) the store and rebuild its index from file headers
    pub fn open(config: DiskTierConfig) -> Result<Self> {
        for category in Category::ALL {
            fs::create_dir_all(config.directory.join(category.as_str()))?;
        }

        let tier = Self {
            compressor: Compressor::new(config.compression.clone()),
            config,
            index: RwLock::new(HashMap::new()),
            counters: Mutex::new(DiskCounters::default()),
        };

        let loaded = tier.rebuild_index()?;
        info!(
            "Disk tier opened at {:?}: {} entries, {} bytes (cap {} bytes)",
            tier.config.directory,
            loaded,
            tier.size_bytes(),
            tier.config.max_size_bytes
        );

        Ok(tier)
    }

    pub fn directory(&self) -> &Path {
        &self.config.directory
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn category_dir(&self, category: Category) -> PathBuf {
        self.config.directory.join(category.as_str())
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.category_dir(key.category())
            .join(format!("{}.{}", key.as_str(), FILE_EXT))
    }

    /// Scan every category directory, indexing valid entries and deleting
    /// temp leftovers and unreadable files
    fn rebuild_index(&self) -> Result<usize> {
        let mut index = HashMap::new();

        for category in Category::ALL {
            for dir_entry in fs::read_dir(self.category_dir(category))? {
                let dir_entry = match dir_entry {
                    Ok(e) => e,
                    Err(e) => {
                        warn!("Skipping unreadable directory entry: {}", e);
                        continue;
                    }
                };
                let path = dir_entry.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };

                if name.contains(TMP_MARKER) {
                    debug!("Removing stale temp file {:?}", path);
                    let _ = fs::remove_file(&path);
                    continue;
                }

                let Some(stem) = name.strip_suffix(&format!(".{}", FILE_EXT)) else {
                    continue;
                };

                match Self::read_meta(&path) {
                    Ok((meta, file_bytes)) if meta.key == stem && meta.category == category => {
                        index.insert(
                            CacheKey::new(category, meta.key),
                            IndexEntry {
                                created_at: meta.created_at,
                                expires_at: meta.expires_at,
                                file_bytes,
                            },
                        );
                    }
                    Ok(_) => {
                        warn!("Removing misplaced cache file {:?}", path);
                        let _ = fs::remove_file(&path);
                        self.counters.lock().corrupt += 1;
                    }
                    Err(e) => {
                        warn!("Removing unreadable cache file {:?}: {}", path, e);
                        let _ = fs::remove_file(&path);
                        self.counters.lock().corrupt += 1;
                    }
                }
            }
        }

        let count = index.len();
        *self.index.write() = index;
        Ok(count)
    }

    /// Read only the header of a stored file
    fn read_meta(path: &Path) -> Result<(EntryMeta, u64)> {
        let mut file = File::open(path)?;
        let file_bytes = file.metadata()?.len();

        let mut header = [0u8; HEADER_LEN];
        file.read_exact(&mut header)
            .map_err(|e| CacheError::CorruptEntry(format!("short header: {}", e)))?;
        let meta_len = Self::parse_header(&header)?;

        let mut meta_bytes = vec![0u8; meta_len];
        file.read_exact(&mut meta_bytes)
            .map_err(|e| CacheError::CorruptEntry(format!("short metadata: {}", e)))?;

        Ok((Self::decode_meta(&meta_bytes)?, file_bytes))
    }

    fn parse_header(header: &[u8]) -> Result<usize> {
        if header.len() < HEADER_LEN || &header[..MAGIC.len()] != MAGIC {
            return Err(CacheError::CorruptEntry("bad magic".to_string()));
        }
        let mut len = [0u8; 4];
        len.copy_from_slice(&header[MAGIC.len()..HEADER_LEN]);
        let meta_len = u32::from_le_bytes(len) as usize;
        if meta_len > MAX_META_LEN {
            return Err(CacheError::CorruptEntry(format!(
                "metadata length {} exceeds limit",
                meta_len
            )));
        }
        Ok(meta_len)
    }

    fn decode_meta(bytes: &[u8]) -> Result<EntryMeta> {
        bincode::serde::decode_from_slice::<EntryMeta, _>(bytes, bincode::config::standard())
            .map(|(meta, _)| meta)
            .map_err(|e| CacheError::CorruptEntry(format!("metadata: {}", e)))
    }

    /// Serialize an entry into its on-disk representation
    fn encode(&self, entry: &CacheEntry) -> Result<Vec<u8>> {
        let (stored, compression) = self.compressor.compress(&entry.payload);

        let meta = EntryMeta {
            key: entry.key.as_str().to_string(),
            category: entry.category(),
            created_at: entry.created_at,
            expires_at: entry.expires_at,
            size_bytes: entry.payload.len() as u64,
            compression,
            checksum: crc32fast::hash(&entry.payload),
        };
        let meta_bytes = bincode::serde::encode_to_vec(&meta, bincode::config::standard())
            .map_err(|e| CacheError::SerializationError(e.to_string()))?;

        let mut buf = Vec::with_capacity(HEADER_LEN + meta_bytes.len() + stored.len());
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&(meta_bytes.len() as u32).to_le_bytes());
        buf.extend_from_slice(&meta_bytes);
        buf.extend_from_slice(&stored);
        Ok(buf)
    }

    /// Parse and verify a stored file, returning its metadata and payload
    fn decode(&self, bytes: &[u8]) -> Result<(EntryMeta, Vec<u8>)> {
        let meta_len = Self::parse_header(bytes)?;
        let payload_start = HEADER_LEN + meta_len;
        if bytes.len() < payload_start {
            return Err(CacheError::CorruptEntry("truncated metadata".to_string()));
        }

        let meta = Self::decode_meta(&bytes[HEADER_LEN..payload_start])?;
        let payload = self
            .compressor
            .decompress(&bytes[payload_start..], meta.compression)
            .map_err(|e| CacheError::CorruptEntry(format!("decompress: {}", e)))?;

        if payload.len() as u64 != meta.size_bytes || crc32fast::hash(&payload) != meta.checksum {
            return Err(CacheError::CorruptEntry("checksum mismatch".to_string()));
        }

        Ok((meta, payload))
    }

    /// Remove a file, retrying transient failures. `Ok(false)` if it was
    /// already gone.
    fn remove_file_with_retry(&self, path: &Path) -> io::Result<bool> {
        let attempts = self.config.retry_attempts.max(1);
        let mut attempt = 1;
        loop {
            match fs::remove_file(path) {
                Ok(()) => return Ok(true),
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
                Err(e) if attempt < attempts => {
                    warn!(
                        "Failed to remove {:?} (attempt {}/{}): {}",
                        path, attempt, attempts, e
                    );
                    std::thread::sleep(self.config.retry_delay * attempt);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Remove a set of indexed entries, isolating failures per entry
    fn remove_keys(&self, keys: Vec<CacheKey>, reason: &str) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();

        for key in keys {
            match self.remove_file_with_retry(&self.entry_path(&key)) {
                Ok(_) => {
                    self.index.write().remove(&key);
                    outcome.removed.push(key);
                }
                Err(e) => {
                    warn!("Could not remove {} entry {}: {}", reason, key, e);
                    outcome.failed += 1;
                }
            }
        }

        outcome
    }

    /// Drop a corrupt entry; failures are only logged
    fn discard_corrupt(&self, key: &CacheKey, path: &Path, err: &CacheError) {
        warn!("Discarding corrupt disk entry {}: {}", key, err);
        self.counters.lock().corrupt += 1;
        if let Err(e) = self.remove_file_with_retry(path) {
            warn!("Failed to remove corrupt entry {:?}: {}", path, e);
        }
        self.index.write().remove(key);
    }
}

impl PersistentStore for DiskTier {
    fn get(&self, key: &CacheKey) -> Result<DiskLookup> {
        let path = self.entry_path(key);

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.index.write().remove(key);
                debug!("Disk MISS: {}", key);
                return Ok(DiskLookup::Miss);
            }
            Err(e) => return Err(e.into()),
        };

        let (meta, payload) = match self.decode(&bytes) {
            Ok(decoded) if decoded.0.key == key.as_str() => decoded,
            Ok(_) => {
                let err = CacheError::CorruptEntry("key mismatch".to_string());
                self.discard_corrupt(key, &path, &err);
                return Err(err);
            }
            Err(err) => {
                self.discard_corrupt(key, &path, &err);
                return Err(err);
            }
        };

        let now = now_millis();
        if now >= meta.expires_at {
            if let Err(e) = self.remove_file_with_retry(&path) {
                warn!("Failed to remove expired entry {:?}: {}", path, e);
            }
            self.index.write().remove(key);
            self.counters.lock().expirations += 1;
            debug!("Disk EXPIRED: {}", key);
            return Ok(DiskLookup::Expired);
        }

        debug!("Disk HIT: {} ({} bytes)", key, meta.size_bytes);
        Ok(DiskLookup::Hit(CacheEntry {
            key: key.clone(),
            payload: Bytes::from(payload),
            created_at: meta.created_at,
            expires_at: meta.expires_at,
            last_accessed_at: now,
            size_bytes: meta.size_bytes,
        }))
    }

    fn put(&self, entry: &CacheEntry) -> Result<SweepOutcome> {
        let encoded = self.encode(entry)?;

        let dir = self.category_dir(entry.category());
        fs::create_dir_all(&dir)?;

        let final_path = self.entry_path(&entry.key);
        let tmp_path = dir.join(format!(
            "{}.{}{}{}",
            entry.key.as_str(),
            FILE_EXT,
            TMP_MARKER,
            Uuid::new_v4().simple()
        ));

        let written = File::create(&tmp_path).and_then(|mut file| {
            file.write_all(&encoded)?;
            file.sync_all()
        });
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        {
            let mut index = self.index.write();
            // A newer write for this key already landed
            let superseded = index
                .get(&entry.key)
                .is_some_and(|current| current.created_at > entry.created_at);
            if superseded {
                drop(index);
                let _ = fs::remove_file(&tmp_path);
                debug!("Disk PUT skipped, newer copy on disk: {}", entry.key);
                return Ok(SweepOutcome::default());
            }
            if let Err(e) = fs::rename(&tmp_path, &final_path) {
                let _ = fs::remove_file(&tmp_path);
                return Err(e.into());
            }
            index.insert(
                entry.key.clone(),
                IndexEntry {
                    created_at: entry.created_at,
                    expires_at: entry.expires_at,
                    file_bytes: encoded.len() as u64,
                },
            );
        }

        debug!(
            "Disk PUT: {} ({} bytes payload, {} bytes stored)",
            entry.key,
            entry.size_bytes,
            encoded.len()
        );

        Ok(self.enforce_capacity())
    }

    fn delete(&self, key: &CacheKey) -> Result<bool> {
        let existed = self.remove_file_with_retry(&self.entry_path(key))?;
        self.index.write().remove(key);
        Ok(existed)
    }

    fn size_bytes(&self) -> u64 {
        self.index.read().values().map(|e| e.file_bytes).sum()
    }

    fn remove_expired(&self) -> SweepOutcome {
        let now = now_millis();
        let expired: Vec<CacheKey> = self
            .index
            .read()
            .iter()
            .filter(|(_, e)| now >= e.expires_at)
            .map(|(key, _)| key.clone())
            .collect();

        if expired.is_empty() {
            return SweepOutcome::default();
        }

        let outcome = self.remove_keys(expired, "expired");
        self.counters.lock().expirations += outcome.removed.len() as u64;
        debug!(
            "Disk sweep removed {} expired entries ({} failed)",
            outcome.removed.len(),
            outcome.failed
        );
        outcome
    }

    fn enforce_capacity(&self) -> SweepOutcome {
        let max = self.config.max_size_bytes;

        let (mut excess, mut candidates) = {
            let index = self.index.read();
            let total: u64 = index.values().map(|e| e.file_bytes).sum();
            if total <= max {
                return SweepOutcome::default();
            }
            let candidates: Vec<(CacheKey, u64, u64)> = index
                .iter()
                .map(|(key, e)| (key.clone(), e.created_at, e.file_bytes))
                .collect();
            (total - max, candidates)
        };

        // Oldest first by creation time; this is a safety valve, not LRU
        candidates.sort_by_key(|(_, created_at, _)| *created_at);

        let mut outcome = SweepOutcome::default();
        for (key, _, file_bytes) in candidates {
            if excess == 0 {
                break;
            }
            match self.remove_file_with_retry(&self.entry_path(&key)) {
                Ok(_) => {
                    self.index.write().remove(&key);
                    excess = excess.saturating_sub(file_bytes);
                    outcome.removed.push(key);
                }
                Err(e) => {
                    warn!("Size cap: failed to remove {}: {}", key, e);
                    outcome.failed += 1;
                }
            }
        }

        self.counters.lock().size_evictions += outcome.removed.len() as u64;
        if excess > 0 {
            warn!(
                "Disk tier still {} bytes over its {} byte cap",
                excess, max
            );
        } else {
            debug!(
                "Size cap evicted {} entries from disk tier",
                outcome.removed.len()
            );
        }

        outcome
    }

    fn clear(&self, category: Option<Category>) -> SweepOutcome {
        let keys: Vec<CacheKey> = self
            .index
            .read()
            .keys()
            .filter(|key| category.is_none_or(|c| key.category() == c))
            .cloned()
            .collect();

        self.remove_keys(keys, "cleared")
    }

    fn stats(&self) -> DiskStats {
        let index = self.index.read();
        let counters = self.counters.lock();

        let mut by_category: BTreeMap<Category, TierUsage> = BTreeMap::new();
        for (key, entry) in index.iter() {
            let usage = by_category.entry(key.category()).or_default();
            usage.entries += 1;
            usage.bytes += entry.file_bytes;
        }

        let total_bytes: u64 = index.values().map(|e| e.file_bytes).sum();
        let max_bytes = self.config.max_size_bytes;

        DiskStats {
            entries: index.len(),
            total_bytes,
            size_mb: total_bytes as f64 / (1024.0 * 1024.0),
            max_bytes,
            utilization: if max_bytes == 0 {
                100.0
            } else {
                (total_bytes as f64 / max_bytes as f64) * 100.0
            },
            expirations: counters.expirations,
            size_evictions: counters.size_evictions,
            corrupt_entries: counters.corrupt,
            by_category,
        }
    }

    fn check_health(&self) -> Result<()> {
        for category in Category::ALL {
            let dir = self.category_dir(category);
            if !dir.is_dir() {
                fs::create_dir_all(&dir)?;
            }
        }

        let probe = self
            .config
            .directory
            .join(format!(".health{}{}", TMP_MARKER, Uuid::new_v4().simple()));
        fs::write(&probe, b"ok")?;
        fs::remove_file(&probe)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::key::{self, CacheParams};
    use tempfile::tempdir;

    fn config(dir: &Path) -> DiskTierConfig {
        DiskTierConfig {
            directory: dir.to_path_buf(),
            max_size_bytes: 10 * 1024 * 1024,
            retry_attempts: 2,
            retry_delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn entry(category: Category, symbol: &str, payload: Vec<u8>, ttl: Duration) -> CacheEntry {
        let key = key::build(category, &CacheParams::new().with("symbol", symbol));
        CacheEntry::new(key, Bytes::from(payload), ttl)
    }

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn test_put_get_round_trip() {
        let dir = tempdir().unwrap();
        let tier = DiskTier::open(config(dir.path())).unwrap();

        let payload = b"timestamp,close\n".repeat(200);
        let e = entry(Category::Data, "AAPL", payload.clone(), TTL);
        tier.put(&e).unwrap();

        match tier.get(&e.key).unwrap() {
            DiskLookup::Hit(found) => {
                assert_eq!(found.payload.as_ref(), payload.as_slice());
                assert_eq!(found.expires_at, e.expires_at);
                assert_eq!(found.created_at, e.created_at);
                assert_eq!(found.size_bytes, payload.len() as u64);
            }
            other => panic!("expected hit, got {:?}", other),
        }

        // Compressible payload is stored smaller than it is
        assert!(tier.size_bytes() < payload.len() as u64);
    }

    #[test]
    fn test_layout_is_per_category() {
        let dir = tempdir().unwrap();
        let tier = DiskTier::open(config(dir.path())).unwrap();

        let e = entry(Category::Chart, "AAPL", b"png".to_vec(), TTL);
        tier.put(&e).unwrap();

        let path = dir
            .path()
            .join("chart")
            .join(format!("{}.cache", e.key.as_str()));
        assert!(path.is_file());
        assert!(dir.path().join("data").is_dir());
        assert!(dir.path().join("analysis").is_dir());
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let e = entry(Category::Analysis, "AAPL", b"bullish divergence".to_vec(), TTL);

        {
            let tier = DiskTier::open(config(dir.path())).unwrap();
            tier.put(&e).unwrap();
        }

        let reopened = DiskTier::open(config(dir.path())).unwrap();
        assert_eq!(reopened.len(), 1);
        assert!(matches!(reopened.get(&e.key).unwrap(), DiskLookup::Hit(_)));
    }

    #[test]
    fn test_late_older_write_does_not_replace_newer() {
        let dir = tempdir().unwrap();
        let tier = DiskTier::open(config(dir.path())).unwrap();

        let older = entry(Category::Chart, "AAPL", b"old render".to_vec(), TTL);
        let newer = entry(Category::Chart, "AAPL", b"new render".to_vec(), TTL);
        assert!(newer.created_at > older.created_at);

        tier.put(&newer).unwrap();
        tier.put(&older).unwrap();

        match tier.get(&newer.key).unwrap() {
            DiskLookup::Hit(found) => assert_eq!(found.payload.as_ref(), b"new render"),
            other => panic!("expected hit, got {:?}", other),
        }
        assert_eq!(tier.len(), 1);

        // No stray temp file left behind by the skipped write
        let leftovers = fs::read_dir(dir.path().join("chart"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(TMP_MARKER))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_expired_entry_removed_on_read() {
        let dir = tempdir().unwrap();
        let tier = DiskTier::open(config(dir.path())).unwrap();

        let mut e = entry(Category::Data, "AAPL", b"old".to_vec(), TTL);
        e.expires_at = now_millis().saturating_sub(1);
        tier.put(&e).unwrap();

        assert!(matches!(tier.get(&e.key).unwrap(), DiskLookup::Expired));
        assert!(matches!(tier.get(&e.key).unwrap(), DiskLookup::Miss));
        assert_eq!(tier.stats().expirations, 1);
    }

    #[test]
    fn test_corrupt_file_is_deleted() {
        let dir = tempdir().unwrap();
        let tier = DiskTier::open(config(dir.path())).unwrap();

        let e = entry(Category::Data, "AAPL", b"good".to_vec(), TTL);
        tier.put(&e).unwrap();

        let path = tier.entry_path(&e.key);
        fs::write(&path, b"ACACHE01garbage").unwrap();

        assert!(matches!(tier.get(&e.key), Err(CacheError::CorruptEntry(_))));
        assert!(!path.exists());
        assert!(matches!(tier.get(&e.key).unwrap(), DiskLookup::Miss));
        assert_eq!(tier.stats().corrupt_entries, 1);
    }

    #[test]
    fn test_flipped_payload_byte_fails_checksum() {
        let dir = tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.compression.enabled = false;
        let tier = DiskTier::open(cfg).unwrap();

        let e = entry(Category::Chart, "AAPL", b"0123456789".to_vec(), TTL);
        tier.put(&e).unwrap();

        let path = tier.entry_path(&e.key);
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        assert!(tier.get(&e.key).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_open_discards_temp_and_corrupt_files() {
        let dir = tempdir().unwrap();
        {
            let tier = DiskTier::open(config(dir.path())).unwrap();
            tier.put(&entry(Category::Data, "AAPL", b"ok".to_vec(), TTL))
                .unwrap();
        }
        let data_dir = dir.path().join("data");
        fs::write(data_dir.join("data&symbol=x.cache.tmp-abc"), b"partial").unwrap();
        fs::write(data_dir.join("data&symbol=y.cache"), b"not a cache file").unwrap();

        let tier = DiskTier::open(config(dir.path())).unwrap();

        assert_eq!(tier.len(), 1);
        assert!(!data_dir.join("data&symbol=x.cache.tmp-abc").exists());
        assert!(!data_dir.join("data&symbol=y.cache").exists());
    }

    #[test]
    fn test_size_cap_removes_oldest_first() {
        let dir = tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.compression.enabled = false;
        cfg.max_size_bytes = 2_500;
        let tier = DiskTier::open(cfg).unwrap();

        let mut first = entry(Category::Data, "A", vec![1u8; 1000], TTL);
        first.created_at -= 2_000;
        let mut second = entry(Category::Chart, "B", vec![2u8; 1000], TTL);
        second.created_at -= 1_000;
        let third = entry(Category::Analysis, "C", vec![3u8; 1000], TTL);

        assert!(tier.put(&first).unwrap().removed.is_empty());
        assert!(tier.put(&second).unwrap().removed.is_empty());
        let evicted = tier.put(&third).unwrap();

        assert_eq!(evicted.removed, vec![first.key.clone()]);
        assert!(tier.size_bytes() <= 2_500);
        assert!(matches!(tier.get(&second.key).unwrap(), DiskLookup::Hit(_)));
        assert!(matches!(tier.get(&third.key).unwrap(), DiskLookup::Hit(_)));
        assert_eq!(tier.stats().size_evictions, 1);
    }

    #[test]
    fn test_remove_expired_is_idempotent() {
        let dir = tempdir().unwrap();
        let tier = DiskTier::open(config(dir.path())).unwrap();

        let mut stale = entry(Category::Data, "OLD", b"1".to_vec(), TTL);
        stale.expires_at = now_millis().saturating_sub(1);
        tier.put(&stale).unwrap();
        tier.put(&entry(Category::Data, "NEW", b"2".to_vec(), TTL))
            .unwrap();

        assert_eq!(tier.remove_expired().removed, vec![stale.key.clone()]);
        assert!(tier.remove_expired().removed.is_empty());
        assert_eq!(tier.len(), 1);
    }

    #[test]
    fn test_clear_by_category() {
        let dir = tempdir().unwrap();
        let tier = DiskTier::open(config(dir.path())).unwrap();

        tier.put(&entry(Category::Data, "A", b"1".to_vec(), TTL)).unwrap();
        tier.put(&entry(Category::Chart, "A", b"2".to_vec(), TTL)).unwrap();

        assert_eq!(tier.clear(Some(Category::Chart)).removed.len(), 1);
        assert_eq!(tier.len(), 1);
        assert_eq!(tier.clear(None).removed.len(), 1);
        assert!(tier.is_empty());
        assert_eq!(tier.size_bytes(), 0);
    }

    #[test]
    fn test_delete_and_health() {
        let dir = tempdir().unwrap();
        let tier = DiskTier::open(config(dir.path())).unwrap();

        let e = entry(Category::Data, "AAPL", b"1".to_vec(), TTL);
        tier.put(&e).unwrap();

        assert!(tier.delete(&e.key).unwrap());
        assert!(!tier.delete(&e.key).unwrap());
        assert!(tier.check_health().is_ok());
    }
}

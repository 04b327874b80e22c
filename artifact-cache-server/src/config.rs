use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::compression::{CompressionAlgorithm, CompressionConfig};
use crate::core::{CacheError, Category};

/// Main server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: Server,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8700,
        }
    }
}

/// Cache subsystem configuration. Every field has a default and can be
/// overridden individually from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Master switch; when off every lookup misses and writes are dropped
    pub enabled: bool,
    /// Root directory of the disk tier
    pub storage_path: PathBuf,
    /// TTL of market-data entries, seconds
    pub data_ttl: u64,
    /// TTL of chart entries, seconds
    pub chart_ttl: u64,
    /// TTL of analysis entries, seconds
    pub analysis_ttl: u64,
    pub max_memory_entries: usize,
    pub max_disk_size_mb: u64,
    /// Background sweep period, seconds
    pub cleanup_interval: u64,
    /// Entries evicted per pass once the memory tier is over capacity
    pub lru_eviction_batch: usize,
    pub enable_compression: bool,
    pub compression_algorithm: CompressionAlgorithm,
    pub compression_level: i32,
    /// Attempts for disk writes and deletes before giving up
    pub retry_attempts: u32,
    /// Base backoff between attempts, milliseconds
    pub retry_delay: u64,
    /// Write the disk copy from a background task instead of inline
    pub async_disk_writes: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            storage_path: PathBuf::from("./cache_data"),
            data_ttl: 300,      // 5 minutes
            chart_ttl: 600,     // 10 minutes
            analysis_ttl: 1800, // 30 minutes
            max_memory_entries: 1000,
            max_disk_size_mb: 500,
            cleanup_interval: 3600, // 1 hour
            lru_eviction_batch: 100,
            enable_compression: true,
            compression_algorithm: CompressionAlgorithm::Zstd,
            compression_level: 3,
            retry_attempts: 3,
            retry_delay: 100,
            async_disk_writes: true,
        }
    }
}

impl CacheConfig {
    /// TTL applied to new entries of a category
    pub fn ttl_for(&self, category: Category) -> Duration {
        let secs = match category {
            Category::Data => self.data_ttl,
            Category::Chart => self.chart_ttl,
            Category::Analysis => self.analysis_ttl,
        };
        Duration::from_secs(secs)
    }

    pub fn max_disk_bytes(&self) -> u64 {
        self.max_disk_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn cleanup_period(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay)
    }

    pub fn compression(&self) -> CompressionConfig {
        CompressionConfig {
            enabled: self.enable_compression,
            algorithm: self.compression_algorithm,
            level: self.compression_level,
            ..Default::default()
        }
    }

    /// Reject settings the tiers cannot operate with
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.max_memory_entries == 0 {
            return Err(CacheError::InvalidConfig(
                "max_memory_entries must be at least 1".to_string(),
            ));
        }
        if self.lru_eviction_batch == 0 {
            return Err(CacheError::InvalidConfig(
                "lru_eviction_batch must be at least 1".to_string(),
            ));
        }
        if self.cleanup_interval == 0 {
            return Err(CacheError::InvalidConfig(
                "cleanup_interval must be at least 1 second".to_string(),
            ));
        }
        if self.retry_attempts == 0 {
            return Err(CacheError::InvalidConfig(
                "retry_attempts must be at least 1".to_string(),
            ));
        }
        if let Some(category) = Category::ALL
            .into_iter()
            .find(|c| self.ttl_for(*c).is_zero())
        {
            return Err(CacheError::InvalidConfig(format!(
                "{}_ttl must be at least 1 second",
                category
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `json` or `pretty`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: ServerConfig = serde_yaml::from_str(&content)?;
        config.cache.validate()?;
        Ok(config)
    }

    /// Get server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

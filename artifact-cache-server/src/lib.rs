pub mod cache;
pub mod compression;
pub mod config;
pub mod core;
pub mod metrics;
pub mod monitoring;
pub mod server;

// Re-export commonly used types
pub use cache::{CacheCoordinator, CacheHealth, CacheStats, DiskTier, MemoryTier, PersistentStore};
pub use compression::{CompressionAlgorithm, Compressor};
pub use config::{CacheConfig, ServerConfig};
pub use crate::core::{CacheError, CacheKey, CacheParams, Category, ClearReport, ParamValue, Result};
pub use monitoring::PerformanceMonitor;
pub use server::{AppState, create_router};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::error::CacheError;

/// Logical partition of cached artifacts
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Market-data snapshots
    Data,
    /// Rendered chart images
    Chart,
    /// Narrative analysis text
    Analysis,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Data, Category::Chart, Category::Analysis];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Chart => "chart",
            Self::Analysis => "analysis",
        }
    }

    /// Human-readable label used in reports
    pub fn label(&self) -> &'static str {
        match self {
            Self::Data => "Market data",
            Self::Chart => "Chart rendering",
            Self::Analysis => "Analysis",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "data" => Ok(Self::Data),
            "chart" => Ok(Self::Chart),
            "analysis" => Ok(Self::Analysis),
            other => Err(CacheError::UnknownCategory(other.to_string())),
        }
    }
}

/// Stable fingerprint of a (category, parameters) request.
///
/// Built by [`crate::core::key::build`]; safe to use as a file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    category: Category,
    value: String,
}

impl CacheKey {
    pub(crate) fn new(category: Category, value: String) -> Self {
        Self { category, value }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// A cached artifact plus the metadata both tiers agree on
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub payload: Bytes,
    /// Creation time, ms since the Unix epoch
    pub created_at: u64,
    /// Expiration time, ms since the Unix epoch. Authoritative for every tier.
    pub expires_at: u64,
    /// Last read, ms since the Unix epoch
    pub last_accessed_at: u64,
    /// Uncompressed payload size
    pub size_bytes: u64,
}

impl CacheEntry {
    /// Create an entry that expires `ttl` from now
    pub fn new(key: CacheKey, payload: Bytes, ttl: Duration) -> Self {
        let now = next_created_at();
        Self {
            key,
            size_bytes: payload.len() as u64,
            payload,
            created_at: now,
            expires_at: now.saturating_add(ttl.as_millis() as u64),
            last_accessed_at: now,
        }
    }

    pub fn category(&self) -> Category {
        self.key.category()
    }

    /// An entry is live iff `now < expires_at`
    pub fn is_live_at(&self, now: u64) -> bool {
        now < self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        !self.is_live_at(now_millis())
    }

    /// Remaining time to live (zero once expired)
    pub fn remaining_ttl(&self) -> Duration {
        Duration::from_millis(self.expires_at.saturating_sub(now_millis()))
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

static LAST_CREATED_AT: AtomicU64 = AtomicU64::new(0);

/// Creation stamp for a new entry: wall-clock ms, bumped so that every entry
/// created by this process is strictly newer than the previous one. Tiers use
/// it to tell which of two writes for the same key is the latest.
fn next_created_at() -> u64 {
    let now = now_millis();
    let previous = LAST_CREATED_AT
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or(now);
    now.max(previous + 1)
}

/// Entries removed by a clear or sweep, per tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearReport {
    pub memory: usize,
    pub disk: usize,
}

impl ClearReport {
    pub fn total(&self) -> usize {
        self.memory + self.disk
    }
}

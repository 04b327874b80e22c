//! Performance Monitor
//!
//! Per-category cache effectiveness (hits, misses, evictions, expirations,
//! producer latency and time saved), per-operation timing records and
//! request-level session counters. Purely observational: nothing here fails
//! or panics.

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt::Write as _;
use std::time::Duration;

use crate::core::{Category, now_millis};

/// Records kept per operation
pub const MAX_RECORDS_PER_OPERATION: usize = 1000;

/// Smoothing factor of the producer latency average
pub const LATENCY_EMA_ALPHA: f64 = 0.2;

/// Default window for operation statistics
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(3600);

/// Operation name under which producer runs of a category are recorded
pub fn producer_operation(category: Category) -> &'static str {
    match category {
        Category::Data => "data_fetch",
        Category::Chart => "chart_generation",
        Category::Analysis => "analysis_generation",
    }
}

#[derive(Debug, Clone, Copy)]
struct OperationRecord {
    at: u64,
    duration: Duration,
    cache_hit: bool,
}

#[derive(Debug, Clone, Default)]
struct CategoryCounters {
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
    avg_latency_ms: Option<f64>,
    time_saved_ms: f64,
}

#[derive(Debug, Clone)]
struct SessionCounters {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    average_response_ms: f64,
    started_at: u64,
}

impl SessionCounters {
    fn new() -> Self {
        Self {
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            average_response_ms: 0.0,
            started_at: now_millis(),
        }
    }
}

struct MonitorState {
    categories: BTreeMap<Category, CategoryCounters>,
    operations: HashMap<String, VecDeque<OperationRecord>>,
    session: SessionCounters,
}

impl MonitorState {
    fn new() -> Self {
        Self {
            categories: Category::ALL
                .into_iter()
                .map(|c| (c, CategoryCounters::default()))
                .collect(),
            operations: HashMap::new(),
            session: SessionCounters::new(),
        }
    }

    fn category(&mut self, category: Category) -> &mut CategoryCounters {
        self.categories.entry(category).or_default()
    }
}

/// Cache effectiveness of one category
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CategoryStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    /// Hit percentage (0-100)
    pub hit_rate: f64,
    /// Moving average of producer latency
    pub avg_latency_ms: f64,
    pub time_saved_ms: f64,
}

/// Windowed statistics of one operation
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct OperationStats {
    pub operation: String,
    pub window_secs: u64,
    pub count: usize,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub cache_hit_rate: f64,
}

/// Request-level counters since start or last reset
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SessionStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
    pub average_response_ms: f64,
    pub uptime_secs: u64,
    pub requests_per_minute: f64,
}

/// Serializable view of everything the monitor knows
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSnapshot {
    pub generated_at: String,
    pub session: SessionStats,
    pub categories: BTreeMap<Category, CategoryStats>,
    /// Mean of the per-category hit rates
    pub overall_hit_rate: f64,
    pub total_time_saved_ms: f64,
    pub operations: BTreeMap<String, OperationStats>,
}

fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64 * 100.0
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Thread-safe cache performance tracker
pub struct PerformanceMonitor {
    state: Mutex<MonitorState>,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MonitorState::new()),
        }
    }

    /// Count a hit; adds the category's current average latency to time saved
    pub fn record_hit(&self, category: Category) {
        let mut state = self.state.lock();
        let counters = state.category(category);
        counters.hits += 1;
        counters.time_saved_ms += counters.avg_latency_ms.unwrap_or(0.0);
    }

    pub fn record_miss(&self, category: Category) {
        self.state.lock().category(category).misses += 1;
    }

    /// Count capacity evictions
    pub fn record_evictions(&self, category: Category, count: u64) {
        self.state.lock().category(category).evictions += count;
    }

    /// Count TTL expirations
    pub fn record_expirations(&self, category: Category, count: u64) {
        self.state.lock().category(category).expirations += count;
    }

    /// Feed a producer latency sample into the category's moving average
    pub fn record_latency(&self, category: Category, latency: Duration) {
        let sample = millis(latency);
        let mut state = self.state.lock();
        let counters = state.category(category);
        counters.avg_latency_ms = Some(match counters.avg_latency_ms {
            None => sample,
            Some(avg) => LATENCY_EMA_ALPHA * sample + (1.0 - LATENCY_EMA_ALPHA) * avg,
        });
    }

    /// Append a timing record for a named operation
    pub fn track_operation(&self, operation: &str, duration: Duration, cache_hit: bool) {
        let record = OperationRecord {
            at: now_millis(),
            duration,
            cache_hit,
        };

        let mut state = self.state.lock();
        let records = state
            .operations
            .entry(operation.to_string())
            .or_insert_with(|| VecDeque::with_capacity(64));
        if records.len() >= MAX_RECORDS_PER_OPERATION {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Count a complete request and fold it into the running average
    pub fn track_request(&self, success: bool, duration: Duration) {
        let mut state = self.state.lock();
        let session = &mut state.session;

        session.total_requests += 1;
        if success {
            session.successful_requests += 1;
        } else {
            session.failed_requests += 1;
        }

        let n = session.total_requests as f64;
        session.average_response_ms =
            (session.average_response_ms * (n - 1.0) + millis(duration)) / n;
    }

    pub fn category_stats(&self, category: Category) -> CategoryStats {
        let state = self.state.lock();
        state
            .categories
            .get(&category)
            .map(Self::to_category_stats)
            .unwrap_or_default()
    }

    /// Statistics of one operation over the trailing `window`
    pub fn operation_stats(&self, operation: &str, window: Duration) -> OperationStats {
        let state = self.state.lock();
        Self::compute_operation_stats(&state, operation, window, now_millis())
    }

    /// Overall hit rate: mean of per-category hit rates
    pub fn overall_hit_rate(&self) -> f64 {
        let state = self.state.lock();
        Self::mean_hit_rate(&state.categories)
    }

    pub fn snapshot(&self) -> PerformanceSnapshot {
        let now = now_millis();
        let state = self.state.lock();

        let categories: BTreeMap<Category, CategoryStats> = state
            .categories
            .iter()
            .map(|(c, counters)| (*c, Self::to_category_stats(counters)))
            .collect();

        let mut names: Vec<&str> = Category::ALL.into_iter().map(producer_operation).collect();
        for name in state.operations.keys() {
            if !names.contains(&name.as_str()) {
                names.push(name.as_str());
            }
        }
        let operations = names
            .into_iter()
            .map(|name| {
                (
                    name.to_string(),
                    Self::compute_operation_stats(&state, name, DEFAULT_WINDOW, now),
                )
            })
            .collect();

        let session = &state.session;
        let uptime_ms = now.saturating_sub(session.started_at);
        let uptime_minutes = uptime_ms as f64 / 60_000.0;

        PerformanceSnapshot {
            generated_at: Utc::now().to_rfc3339(),
            session: SessionStats {
                total_requests: session.total_requests,
                successful_requests: session.successful_requests,
                failed_requests: session.failed_requests,
                success_rate: hit_rate(session.successful_requests, session.failed_requests),
                average_response_ms: session.average_response_ms,
                uptime_secs: uptime_ms / 1000,
                requests_per_minute: if uptime_minutes > 0.0 {
                    session.total_requests as f64 / uptime_minutes
                } else {
                    0.0
                },
            },
            overall_hit_rate: Self::mean_hit_rate(&state.categories),
            total_time_saved_ms: state.categories.values().map(|c| c.time_saved_ms).sum(),
            categories,
            operations,
        }
    }

    /// Human-readable report with tuning advice
    pub fn report(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = String::new();

        let _ = writeln!(out, "=== Artifact Cache Performance Report ===");
        let _ = writeln!(out, "Generated: {}", snapshot.generated_at);
        let _ = writeln!(out);

        let s = &snapshot.session;
        let _ = writeln!(out, "Session:");
        let _ = writeln!(out, "  Total requests:      {}", s.total_requests);
        let _ = writeln!(out, "  Successful:          {}", s.successful_requests);
        let _ = writeln!(out, "  Failed:              {}", s.failed_requests);
        let _ = writeln!(out, "  Success rate:        {:.1}%", s.success_rate);
        let _ = writeln!(out, "  Avg response time:   {:.2}s", s.average_response_ms / 1000.0);
        let _ = writeln!(out, "  Requests per minute: {:.1}", s.requests_per_minute);
        let _ = writeln!(out);

        let _ = writeln!(out, "Cache hit rates:");
        for (category, stats) in &snapshot.categories {
            let _ = writeln!(
                out,
                "  {:<16} {:>5.1}%  (hits {}, misses {}, saved {:.2}s)",
                category.label(),
                stats.hit_rate,
                stats.hits,
                stats.misses,
                stats.time_saved_ms / 1000.0
            );
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "Operations (last hour):");
        for stats in snapshot.operations.values().filter(|o| o.count > 0) {
            let _ = writeln!(out, "  {}:", stats.operation);
            let _ = writeln!(out, "    Count:     {}", stats.count);
            let _ = writeln!(out, "    Average:   {:.2}s", stats.avg_ms / 1000.0);
            let _ = writeln!(out, "    Fastest:   {:.2}s", stats.min_ms / 1000.0);
            let _ = writeln!(out, "    Slowest:   {:.2}s", stats.max_ms / 1000.0);
            let _ = writeln!(out, "    Hit rate:  {:.1}%", stats.cache_hit_rate);
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "Analysis:");
        for line in Self::advice(snapshot.overall_hit_rate, s.average_response_ms) {
            let _ = writeln!(out, "  {}", line);
        }

        out
    }

    /// Clear every counter and record
    pub fn reset(&self) {
        *self.state.lock() = MonitorState::new();
        tracing::info!("Performance statistics reset");
    }

    fn advice(overall_hit_rate: f64, average_response_ms: f64) -> Vec<&'static str> {
        let mut lines = Vec::new();

        if overall_hit_rate < 50.0 {
            lines.push("WARN: low cache hit rate; consider longer TTLs or review key parameters");
        } else if overall_hit_rate > 80.0 {
            lines.push("OK: cache is highly effective");
        } else {
            lines.push("INFO: moderate cache hit rate; there is room to improve");
        }

        if average_response_ms > 20_000.0 {
            lines.push("WARN: average response time is high; check the slowest operation");
        } else if average_response_ms < 5_000.0 {
            lines.push("OK: response times are good");
        }

        lines
    }

    fn to_category_stats(counters: &CategoryCounters) -> CategoryStats {
        CategoryStats {
            hits: counters.hits,
            misses: counters.misses,
            evictions: counters.evictions,
            expirations: counters.expirations,
            hit_rate: hit_rate(counters.hits, counters.misses),
            avg_latency_ms: counters.avg_latency_ms.unwrap_or(0.0),
            time_saved_ms: counters.time_saved_ms,
        }
    }

    fn mean_hit_rate(categories: &BTreeMap<Category, CategoryCounters>) -> f64 {
        if categories.is_empty() {
            return 0.0;
        }
        let sum: f64 = categories
            .values()
            .map(|c| hit_rate(c.hits, c.misses))
            .sum();
        sum / categories.len() as f64
    }

    fn compute_operation_stats(
        state: &MonitorState,
        operation: &str,
        window: Duration,
        now: u64,
    ) -> OperationStats {
        let cutoff = now.saturating_sub(window.as_millis() as u64);
        let mut stats = OperationStats {
            operation: operation.to_string(),
            window_secs: window.as_secs(),
            ..Default::default()
        };

        let Some(records) = state.operations.get(operation) else {
            return stats;
        };

        let mut total_ms = 0.0;
        let mut min_ms = f64::MAX;
        let mut max_ms: f64 = 0.0;
        for record in records.iter().filter(|r| r.at >= cutoff) {
            let ms = millis(record.duration);
            stats.count += 1;
            total_ms += ms;
            min_ms = min_ms.min(ms);
            max_ms = max_ms.max(ms);
            if record.cache_hit {
                stats.cache_hits += 1;
            }
        }

        if stats.count > 0 {
            stats.avg_ms = total_ms / stats.count as f64;
            stats.min_ms = min_ms;
            stats.max_ms = max_ms;
            stats.cache_misses = stats.count - stats.cache_hits;
            stats.cache_hit_rate = stats.cache_hits as f64 / stats.count as f64 * 100.0;
        }

        stats
    }
}

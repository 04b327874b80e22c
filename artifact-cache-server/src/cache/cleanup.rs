//! Eviction & cleanup manager
//!
//! Periodic background sweep: expired entries in both tiers, then the disk
//! size cap. The first cycle runs one full interval after start.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::coordinator::CacheCoordinator;
use crate::core::{ClearReport, now_millis};

/// Result of one cleanup cycle
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CleanupReport {
    pub expired: ClearReport,
    pub size_evicted: usize,
    pub duration_ms: u64,
}

/// Counters of the cleanup task
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupStats {
    pub interval_secs: u64,
    pub cycles: u64,
    pub last_cycle_at: Option<u64>,
    pub last_report: Option<CleanupReport>,
    pub total_removed: u64,
}

/// Handle to a running cleanup task, owned by the coordinator
pub struct CleanupHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    stats: Arc<Mutex<CleanupStats>>,
}

impl CleanupHandle {
    pub fn stats(&self) -> CleanupStats {
        self.stats.lock().clone()
    }

    /// Signal the task and wait for it to stop. A cycle in progress finishes
    /// first.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            warn!("Cleanup task ended abnormally: {}", e);
        }
        info!("Cache cleanup task stopped");
    }
}

/// Run one cleanup cycle: drain pending writes, sweep expired entries, then
/// enforce the disk size cap
pub async fn run_cycle(coordinator: &CacheCoordinator) -> CleanupReport {
    let started = Instant::now();

    let expired = coordinator.clear_expired().await;
    let size_evicted = coordinator.enforce_capacity().await;

    CleanupReport {
        expired,
        size_evicted,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

/// Start the cleanup task. It stops on the shutdown signal, when its handle
/// is dropped, or once the coordinator is gone.
pub fn spawn(coordinator: Weak<CacheCoordinator>, period: Duration) -> CleanupHandle {
    let period = period.max(Duration::from_secs(1));
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let stats = Arc::new(Mutex::new(CleanupStats {
        interval_secs: period.as_secs(),
        ..Default::default()
    }));

    info!("Starting cache cleanup task (interval={}s)", period.as_secs());

    let task_stats = Arc::clone(&stats);
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(coordinator) = coordinator.upgrade() else {
                        debug!("Cache coordinator dropped, cleanup task exiting");
                        break;
                    };

                    let report = run_cycle(&coordinator).await;
                    drop(coordinator);

                    let removed = report.expired.total() + report.size_evicted;
                    {
                        let mut stats = task_stats.lock();
                        stats.cycles += 1;
                        stats.last_cycle_at = Some(now_millis());
                        stats.last_report = Some(report);
                        stats.total_removed += removed as u64;
                    }

                    if removed > 0 {
                        info!(
                            "Cleanup cycle removed {} entries (memory={}, disk={}, size cap={}) in {}ms",
                            removed,
                            report.expired.memory,
                            report.expired.disk,
                            report.size_evicted,
                            report.duration_ms
                        );
                    } else {
                        debug!("Cleanup cycle found nothing to remove ({}ms)", report.duration_ms);
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    });

    CleanupHandle {
        shutdown_tx,
        task,
        stats,
    }
}

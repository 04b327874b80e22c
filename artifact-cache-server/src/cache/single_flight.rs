//! Per-key request coalescing
//!
//! The first caller for a key spawns the producer and registers a shared
//! handle; callers arriving while it runs await that handle instead of
//! starting their own computation. The producer runs in its own task, so a
//! caller that gives up never cancels work other waiters depend on. The task
//! unregisters the key when it finishes.

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use crate::core::{CacheError, Result};

type Flight<T> = Shared<BoxFuture<'static, Result<T>>>;
type Registry<T> = Arc<Mutex<HashMap<String, Flight<T>>>>;

/// Unregisters a key when the producer task ends, including by panic
struct FlightGuard<T: Clone + Send + Sync + 'static> {
    registry: Registry<T>,
    key: String,
}

impl<T: Clone + Send + Sync + 'static> Drop for FlightGuard<T> {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.key);
    }
}

/// Coalesces concurrent computations of the same key
pub struct SingleFlight<T: Clone + Send + Sync + 'static> {
    in_flight: Registry<T>,
}

impl<T: Clone + Send + Sync + 'static> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run `producer` for `key` unless a run is already in flight, in which
    /// case wait for that run. Every caller sees the same result or error.
    ///
    /// `producer` is not invoked when a flight for `key` is already
    /// registered. It is called without the registry lock held; if another
    /// caller registers first, the returned future is dropped unpolled.
    pub async fn run<F, Fut>(&self, key: &str, producer: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let existing = self.in_flight.lock().get(key).cloned();
        if let Some(existing) = existing {
            debug!("Joining in-flight computation: {}", key);
            return existing.await;
        }

        // Build the producer future outside the registry lock
        let work = producer();

        let flight = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(key) {
                // Another caller registered while `producer` ran; `work` was
                // never polled and is dropped
                Some(existing) => {
                    debug!("Joining in-flight computation: {}", key);
                    existing.clone()
                }
                None => {
                    let guard = FlightGuard {
                        registry: Arc::clone(&self.in_flight),
                        key: key.to_string(),
                    };
                    // The task cannot unregister before this insert: it
                    // needs the lock we are holding.
                    let handle = tokio::spawn(async move {
                        let _guard = guard;
                        work.await
                    });

                    let flight: Flight<T> = async move {
                        handle.await.unwrap_or_else(|e| {
                            Err(CacheError::ProducerFailed(format!(
                                "producer task aborted: {}",
                                e
                            )))
                        })
                    }
                    .boxed()
                    .shared();

                    debug!("Starting computation: {}", key);
                    in_flight.insert(key.to_string(), flight.clone());
                    flight
                }
            }
        };

        flight.await
    }

    /// Number of keys currently being computed
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }
}

use artifact_cache_server::core::key;
use artifact_cache_server::{CacheConfig, CacheCoordinator, CacheError, CacheParams, Category};
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::{TempDir, tempdir};

fn config(dir: &TempDir) -> CacheConfig {
    CacheConfig {
        storage_path: dir.path().to_path_buf(),
        retry_delay: 1,
        ..Default::default()
    }
}

fn request(symbol: &str) -> CacheParams {
    CacheParams::new()
        .with("symbol", symbol)
        .with("venue", "NASDAQ")
        .with("interval", "1h")
        .with("candles", 200i64)
}

#[tokio::test]
async fn test_ttl_expiry_removes_both_copies() {
    let dir = tempdir().unwrap();
    let mut cfg = config(&dir);
    cfg.data_ttl = 1;
    let cache = CacheCoordinator::open(cfg).unwrap();

    cache
        .set(Category::Data, &request("AAPL"), &b"ohlcv"[..])
        .await;
    cache.flush().await;

    assert!(cache.get(Category::Data, &request("AAPL")).await.is_some());
    assert_eq!(cache.stats().disk.entries, 1);

    tokio::time::sleep(Duration::from_millis(1200)).await;

    assert!(cache.get(Category::Data, &request("AAPL")).await.is_none());
    let stats = cache.stats();
    assert_eq!(stats.memory.entries, 0);
    assert_eq!(stats.disk.entries, 0, "disk copy shares the same expiry");
    assert_eq!(stats.categories[&Category::Data].expirations, 1);
}

#[tokio::test]
async fn test_entries_survive_restart() {
    let dir = tempdir().unwrap();

    {
        let cache = CacheCoordinator::start(config(&dir)).unwrap();
        cache
            .set(Category::Analysis, &request("NVDA"), &b"momentum is fading"[..])
            .await;
        cache.shutdown().await;
    }

    let reopened = CacheCoordinator::open(config(&dir)).unwrap();
    assert_eq!(reopened.stats().memory.entries, 0);

    let hit = reopened.get(Category::Analysis, &request("nvda")).await;
    assert_eq!(hit.as_deref(), Some(&b"momentum is fading"[..]));
    assert_eq!(reopened.stats().memory.entries, 1, "disk hit is promoted");
}

#[tokio::test]
async fn test_single_flight_shares_result_and_error() {
    let dir = tempdir().unwrap();
    let cache = CacheCoordinator::open(config(&dir)).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let cache = cache.clone();
        let calls = calls.clone();
        handles.push(tokio::spawn(async move {
            cache
                .get_or_compute(Category::Analysis, &request("AMD"), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Err::<Bytes, _>(CacheError::ProducerFailed("model timeout".to_string()))
                })
                .await
        }));
    }

    for handle in handles {
        let result = handle.await.unwrap();
        assert_eq!(
            result,
            Err(CacheError::ProducerFailed("model timeout".to_string()))
        );
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Failure was not cached: the next call computes again
    let value = cache
        .get_or_compute(Category::Analysis, &request("AMD"), || async {
            Ok(Bytes::from_static(b"recovered"))
        })
        .await
        .unwrap();
    assert_eq!(value.as_ref(), b"recovered");
}

#[tokio::test]
async fn test_corrupt_disk_entry_is_a_miss_and_deleted() {
    let dir = tempdir().unwrap();
    let mut cfg = config(&dir);
    cfg.async_disk_writes = false;
    let cache = CacheCoordinator::open(cfg).unwrap();

    cache
        .set(Category::Chart, &request("AAPL"), vec![7u8; 4096])
        .await;
    cache.memory().clear(None);

    let key = key::build(Category::Chart, &request("AAPL"));
    let path = dir
        .path()
        .join("chart")
        .join(format!("{}.cache", key.as_str()));
    std::fs::write(&path, b"truncated").unwrap();

    assert!(cache.get(Category::Chart, &request("AAPL")).await.is_none());
    assert!(!path.exists());
    assert_eq!(cache.stats().disk.entries, 0);
}

#[tokio::test]
async fn test_disk_size_cap_removes_oldest() {
    let dir = tempdir().unwrap();
    let mut cfg = config(&dir);
    cfg.async_disk_writes = false;
    cfg.enable_compression = false;
    cfg.max_disk_size_mb = 1;
    let cache = CacheCoordinator::open(cfg).unwrap();

    for symbol in ["S1", "S2", "S3", "S4"] {
        cache
            .set(Category::Chart, &request(symbol), vec![1u8; 400 * 1024])
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let stats = cache.stats();
    assert!(stats.disk.total_bytes <= 1024 * 1024);
    assert_eq!(stats.disk.entries, 2);
    assert_eq!(stats.memory.entries, 4, "size cap leaves memory copies alone");

    cache.memory().clear(None);
    assert!(cache.get(Category::Chart, &request("S1")).await.is_none());
    assert!(cache.get(Category::Chart, &request("S2")).await.is_none());
    assert!(cache.get(Category::Chart, &request("S4")).await.is_some());
}

#[tokio::test]
async fn test_clear_operations_are_idempotent() {
    let dir = tempdir().unwrap();
    let cache = CacheCoordinator::open(config(&dir)).unwrap();

    for category in Category::ALL {
        cache.set(category, &request("AAPL"), &b"x"[..]).await;
    }
    cache.flush().await;

    assert_eq!(cache.clear_expired().await.total(), 0);

    let cleared = cache.clear_all(None).await;
    assert_eq!(cleared.memory, 3);
    assert_eq!(cleared.disk, 3);
    assert_eq!(cache.clear_all(None).await.total(), 0);
    assert_eq!(cache.clear_expired().await.total(), 0);
}

#[tokio::test]
async fn test_disabled_cache() {
    let dir = tempdir().unwrap();
    let mut cfg = config(&dir);
    cfg.enabled = false;
    let cache = CacheCoordinator::open(cfg).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let calls = calls.clone();
        cache
            .get_or_compute(Category::Data, &request("AAPL"), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Bytes::from_static(b"fresh"))
            })
            .await
            .unwrap();
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.stats().categories[&Category::Data].misses, 2);
}

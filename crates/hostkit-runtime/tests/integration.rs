//! Runtime-level tests: scheduler and storage working together.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use hostkit_runtime::HostRuntime;
use hostkit_sched::TickDriver;
use hostkit_store::{CacheMode, Persist, Store, StoreConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Score(u32);

impl Persist for Score {
    const TAG: &'static str = "score";
}

#[tokio::test]
async fn periodic_flush_runs_on_the_shared_driver() {
    let driver = TickDriver::new();
    let runtime = HostRuntime::new(driver.clone());

    let store = runtime
        .open_store(
            StoreConfig::new("arena")
                .in_memory()
                .mode(CacheMode::WritePeriodic)
                .flush_every(10),
        )
        .unwrap();

    store.set("scores", "alice", &Score(100)).await.unwrap();
    assert_eq!(store.info().pending_writes, 1);

    // First flush lands at tick 10.
    driver.advance(11);
    for _ in 0..200 {
        if store.info().pending_writes == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(store.info().pending_writes, 0);

    runtime.shutdown().await;
}

#[tokio::test]
async fn sequences_and_stores_compose() {
    let driver = TickDriver::new();
    let runtime = HostRuntime::new(driver.clone());

    let store = runtime
        .open_store(StoreConfig::new("arena").in_memory())
        .unwrap();

    // A repeating sequence that bumps a counter; the store records writes
    // independently on the same runtime.
    let rounds = Arc::new(AtomicU32::new(0));
    let r = rounds.clone();
    let seq = runtime
        .sequence()
        .repeat(3, 2, move || {
            r.fetch_add(1, Ordering::SeqCst);
        })
        .build();
    seq.start(true).unwrap();

    store.set("scores", "bob", &Score(7)).await.unwrap();
    driver.advance(5);

    assert_eq!(rounds.load(Ordering::SeqCst), 3);
    let got: Option<Score> = store.get("scores", "bob").await.unwrap();
    assert_eq!(got, Some(Score(7)));

    runtime.shutdown().await;
}

#[tokio::test]
async fn shutdown_flushes_buffered_writes_durably() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("arena.db");

    {
        let runtime = HostRuntime::new(TickDriver::new());
        let store = runtime
            .open_store(
                StoreConfig::new("arena")
                    .path(&path)
                    .mode(CacheMode::Full),
            )
            .unwrap();

        store.set("scores", "alice", &Score(42)).await.unwrap();
        assert_eq!(store.info().pending_writes, 1);

        // Buffered write never saw an explicit flush.
        runtime.shutdown().await;
        assert!(store.is_closed());
    }

    let check = Store::open(StoreConfig::new("arena").path(&path), None).unwrap();
    let got: Option<Score> = check.get("scores", "alice").await.unwrap();
    assert_eq!(got, Some(Score(42)));
    check.close().await.unwrap();
}

#[tokio::test]
async fn shutdown_stops_periodic_sequences_before_closing_stores() {
    let driver = TickDriver::new();
    let runtime = HostRuntime::new(driver.clone());

    let store = runtime
        .open_store(
            StoreConfig::new("arena")
                .in_memory()
                .mode(CacheMode::WritePeriodic)
                .flush_every(2),
        )
        .unwrap();
    store.set("scores", "carol", &Score(1)).await.unwrap();

    runtime.shutdown().await;

    // Ticks after shutdown are inert: the flush sequence is destroyed and
    // the store already flushed during close.
    driver.advance(10);
    assert_eq!(runtime.scheduler().count(), 0);
    assert!(store.is_closed());
}

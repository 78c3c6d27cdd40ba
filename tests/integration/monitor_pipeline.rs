//! Monitor loop behaviour as seen through a session
//!
//! Tests cover:
//! - One snapshot per tick with strictly increasing sequence and timestamp
//! - Failing units: degraded, then inactive and excluded from overall health
//! - Metric history and runtime unit registration

use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use watchtower::sources::{MemorySource, UnitBehavior};
use watchtower::{LATENCY_MS, MEMORY_MB, MonitoredUnit};

use crate::helpers::*;

#[tokio::test(start_paused = true)]
async fn test_ticker_emits_one_snapshot_per_tick() {
    let source = MemorySource::new();
    source.set("api", MEMORY_MB, 64.0);
    let session = builder(&source).start().unwrap();

    let (tx, mut rx) = mpsc::channel(32);
    session.on_snapshot(tx).await;

    // adaptive starts at the balanced tier, polling every 5s
    tokio::time::sleep(Duration::from_secs(26)).await;

    let snapshots = drain(&mut rx);
    assert_eq!(snapshots.len(), 5);

    for pair in snapshots.windows(2) {
        assert_eq!(pair[1].sequence, pair[0].sequence + 1);
        assert!(
            pair[1].timestamp > pair[0].timestamp,
            "timestamps must strictly increase"
        );
    }

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_immediate_ticks_keep_timestamps_monotonic() {
    let source = MemorySource::new();
    source.set("api", MEMORY_MB, 64.0);
    let session = builder(&source).start().unwrap();

    let mut previous = tick(&session).await;
    for _ in 0..10 {
        let next = tick(&session).await;
        assert!(next.sequence > previous.sequence);
        assert!(next.timestamp > previous.timestamp);
        previous = next;
    }

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_failing_unit_becomes_inactive_and_is_excluded() {
    let source = MemorySource::new();
    source.set("api", MEMORY_MB, 256.0);
    source.set("db", MEMORY_MB, 0.0);
    source.set_behavior("db", UnitBehavior::Failing);

    let session = builder(&source).unit("db", "postgres").start().unwrap();

    let first = tick(&session).await;
    assert!(first.units["db"].degraded);
    assert!(!first.units["api"].degraded);
    assert!((first.units["db"].score - 0.8).abs() < 1e-9);

    let second = tick(&session).await;
    assert!(second.units["db"].degraded);
    assert!((second.units["db"].score - 0.6).abs() < 1e-9);

    // third consecutive failure
    let third = tick(&session).await;
    assert!(!third.units.contains_key("db"));
    assert!((third.overall_health - 0.5).abs() < 1e-9);

    let fourth = tick(&session).await;
    assert!(!fourth.units.contains_key("db"));
    assert!((fourth.overall_health - third.units["api"].score).abs() < 1e-9);

    source.set_behavior("db", UnitBehavior::Healthy);
    let recovered = tick(&session).await;
    assert!(recovered.units.contains_key("db"));
    assert!(!recovered.units["db"].degraded);
    assert!((recovered.overall_health - 0.75).abs() < 1e-9);

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_history_keeps_every_tick() {
    let source = MemorySource::new();
    source.set_all("api", [(MEMORY_MB, 64.0), (LATENCY_MS, 20.0)]);
    let session = builder(&source).start().unwrap();

    tick(&session).await;
    source.set("api", MEMORY_MB, 96.0);
    tick(&session).await;

    let memory = session.monitor().history("api", MEMORY_MB).await.unwrap();
    let values = memory.iter().map(|sample| sample.value).collect::<Vec<_>>();
    assert_eq!(values, vec![64.0, 96.0]);

    let latency = session.monitor().history("api", LATENCY_MS).await.unwrap();
    assert_eq!(latency.len(), 2);

    assert!(session.monitor().history("api", "unknown").await.unwrap().is_empty());

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_units_registered_at_runtime_are_polled() {
    let source = MemorySource::new();
    source.set("api", MEMORY_MB, 64.0);
    source.set("cache", MEMORY_MB, 32.0);
    let session = builder(&source).start().unwrap();

    let monitor = session.monitor();
    assert!(monitor.register_unit(MonitoredUnit::new("cache", "redis")).await.unwrap());
    assert!(!monitor.register_unit(MonitoredUnit::new("cache", "redis")).await.unwrap());

    let snapshot = tick(&session).await;
    assert_eq!(
        snapshot.units.keys().cloned().collect::<Vec<_>>(),
        vec!["api".to_string(), "cache".to_string()]
    );
    assert_eq!(snapshot.value("cache", MEMORY_MB), Some(32.0));

    let units = monitor.units().await.unwrap();
    assert_eq!(units.len(), 2);

    session.stop().await;
}

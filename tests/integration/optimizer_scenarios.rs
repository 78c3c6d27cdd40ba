//! Self-tuning through a running session
//!
//! Tests cover:
//! - Sustained overhead stepping down exactly one tier per dwell window
//! - A comfortable streak stepping up
//! - The optimizer switched off

use std::time::Duration;

use pretty_assertions::assert_eq;
use watchtower::sources::MemorySource;
use watchtower::{MEMORY_MB, ProfileName};

use crate::helpers::*;

#[tokio::test(start_paused = true)]
async fn test_overhead_steps_down_once_per_dwell_window() {
    let source = MemorySource::new();
    source.set("api", MEMORY_MB, 64.0);

    let session = builder(&source)
        .profile(ProfileName::Comprehensive)
        .probe(heavy_probe())
        .start()
        .unwrap();
    let initial = session.current_profile();

    // first tick after 1s steps down, every later tick within the 30s dwell is held
    tokio::time::sleep(Duration::from_secs(25)).await;

    let changes = session.profile_changes().await;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].from, ProfileName::Comprehensive);
    assert_eq!(changes[0].to, ProfileName::Balanced);

    let balanced = session.current_profile();
    assert!(balanced.poll_interval_ms > initial.poll_interval_ms);
    assert!(balanced.max_concurrent_operations < initial.max_concurrent_operations);
    assert!(balanced.version > initial.version);

    tokio::time::sleep(Duration::from_secs(15)).await;

    let changes = session.profile_changes().await;
    assert_eq!(changes.len(), 2);
    assert_eq!(changes[1].from, ProfileName::Balanced);
    assert_eq!(changes[1].to, ProfileName::Minimal);
    assert!(changes[1].at >= changes[0].at);

    // nothing below minimal
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(session.profile_changes().await.len(), 2);
    assert_eq!(session.current_profile().name, ProfileName::Minimal);

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_comfortable_streak_steps_up() {
    let source = MemorySource::new();
    source.set("api", MEMORY_MB, 64.0);

    let session = builder(&source)
        .profile(ProfileName::Minimal)
        .start()
        .unwrap();

    for _ in 0..9 {
        tick(&session).await;
    }
    assert!(session.profile_changes().await.is_empty());

    tick(&session).await;

    let changes = session.profile_changes().await;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].from, ProfileName::Minimal);
    assert_eq!(changes[0].to, ProfileName::Balanced);
    assert_eq!(session.status().await.current_profile.name, ProfileName::Balanced);

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_disabled_optimizer_keeps_the_profile() {
    let source = MemorySource::new();
    source.set("api", MEMORY_MB, 64.0);

    let session = builder(&source)
        .profile(ProfileName::Comprehensive)
        .probe(heavy_probe())
        .configure(|config| config.optimizer.enabled = false)
        .start()
        .unwrap();

    for _ in 0..5 {
        tick(&session).await;
    }

    assert!(session.profile_changes().await.is_empty());
    assert_eq!(session.current_profile().name, ProfileName::Comprehensive);

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_new_poll_interval_applies_to_the_ticker() {
    let source = MemorySource::new();
    source.set("api", MEMORY_MB, 64.0);

    let session = builder(&source)
        .profile(ProfileName::Comprehensive)
        .probe(heavy_probe())
        .start()
        .unwrap();

    // the tick at 1s moves to balanced; from then on ticks are 5s apart
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let after_change = session.monitor().last_snapshot().await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_secs(4)).await;
    let still = session.monitor().last_snapshot().await.unwrap().unwrap();
    assert_eq!(still.sequence, after_change.sequence);

    tokio::time::sleep(Duration::from_secs(1)).await;
    let next = session.monitor().last_snapshot().await.unwrap().unwrap();
    assert_eq!(next.sequence, after_change.sequence + 1);

    session.stop().await;
}

//! Alert lifecycle through a running session
//!
//! Tests cover:
//! - A sustained memory breach raising a single high-severity alert
//! - Deduplication while an alert is open, escalation in place
//! - Resolution after the cooldown and re-raising on a new breach
//! - Acknowledgement

use std::time::Duration;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use watchtower::alerts::NotificationKind;
use watchtower::sources::MemorySource;
use watchtower::{AlertStatus, MEMORY_MB, ProfileName, Severity};

use crate::helpers::*;

#[tokio::test(start_paused = true)]
async fn test_memory_breach_raises_high_alert_and_steps_profile_down() {
    let source = MemorySource::new();
    source.set("api", MEMORY_MB, 150.0);

    let session = builder(&source)
        .rule(memory_rule(100.0, Severity::High))
        .profile(ProfileName::Comprehensive)
        .probe(heavy_probe())
        .start()
        .unwrap();

    let mut raised_at_tick = None;
    for n in 1..=5 {
        tick(&session).await;
        if raised_at_tick.is_none() && !session.open_alerts().is_empty() {
            raised_at_tick = Some(n);
        }
    }

    assert_matches!(raised_at_tick, Some(n) if n <= 2);

    let alerts = session.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].severity, Severity::High);
    assert_eq!(alerts[0].alert_type, MEMORY_MB);
    assert_eq!(alerts[0].unit_id, "api");
    assert_eq!(alerts[0].status, AlertStatus::Open);

    let changes = session.profile_changes().await;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].from, ProfileName::Comprehensive);
    assert_eq!(changes[0].to, ProfileName::Balanced);
    assert_eq!(session.current_profile().name, ProfileName::Balanced);

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_open_alert_is_deduplicated_across_ticks() {
    let source = MemorySource::new();
    source.set("api", MEMORY_MB, 150.0);
    let session = builder(&source)
        .rule(memory_rule(100.0, Severity::High))
        .start()
        .unwrap();

    let (tx, mut rx) = mpsc::channel(16);
    session.on_alert(tx).await;

    for _ in 0..5 {
        tick(&session).await;
    }

    let notifications = drain(&mut rx);
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].kind, NotificationKind::Raised);
    assert_eq!(session.open_alerts().len(), 1);

    // the open alert tracks the latest observation
    source.set("api", MEMORY_MB, 180.0);
    tick(&session).await;
    assert_eq!(session.open_alerts()[0].value, 180.0);
    assert_eq!(session.alert_log().await.len(), 1);

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_higher_severity_escalates_the_open_alert() {
    let source = MemorySource::new();
    source.set("api", MEMORY_MB, 150.0);
    let session = builder(&source)
        .rule(memory_rule(100.0, Severity::Medium).with_type("memory"))
        .rule(memory_rule(200.0, Severity::Critical).with_type("memory"))
        .start()
        .unwrap();

    tick(&session).await;
    let raised = session.open_alerts();
    assert_eq!(raised.len(), 1);
    assert_eq!(raised[0].severity, Severity::Medium);

    source.set("api", MEMORY_MB, 250.0);
    tick(&session).await;

    let escalated = session.open_alerts();
    assert_eq!(escalated.len(), 1);
    assert_eq!(escalated[0].id, raised[0].id);
    assert_eq!(escalated[0].severity, Severity::Critical);
    assert_eq!(escalated[0].threshold, 200.0);

    let kinds = session
        .alert_log()
        .await
        .into_iter()
        .map(|n| n.kind)
        .collect::<Vec<_>>();
    assert_eq!(kinds, vec![NotificationKind::Raised, NotificationKind::Escalated]);

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_alert_resolves_after_cooldown_and_stays_resolved() {
    let source = MemorySource::new();
    source.set("api", MEMORY_MB, 150.0);
    let session = builder(&source)
        .rule(memory_rule(100.0, Severity::High))
        .configure(|config| config.alerts.cooldown_snapshots = 3)
        .start()
        .unwrap();

    tick(&session).await;
    let first = session.open_alerts().pop().unwrap();

    source.set("api", MEMORY_MB, 50.0);
    tick(&session).await;
    tick(&session).await;
    assert_eq!(session.open_alerts().len(), 1, "still within the cooldown");

    tick(&session).await;
    assert!(session.open_alerts().is_empty());

    for _ in 0..3 {
        tick(&session).await;
    }
    let alerts = session.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].status, AlertStatus::Resolved);
    assert!(alerts[0].resolved_at.is_some());

    // a new breach opens a new alert
    source.set("api", MEMORY_MB, 150.0);
    tick(&session).await;
    let second = session.open_alerts().pop().unwrap();
    assert_ne!(second.id, first.id);

    let kinds = session
        .alert_log()
        .await
        .into_iter()
        .map(|n| n.kind)
        .collect::<Vec<_>>();
    assert_eq!(
        kinds,
        vec![
            NotificationKind::Raised,
            NotificationKind::Resolved,
            NotificationKind::Raised
        ]
    );

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_grace_delays_the_alert() {
    let source = MemorySource::new();
    source.set("api", MEMORY_MB, 150.0);
    let session = builder(&source)
        .rule(memory_rule(100.0, Severity::Low).with_grace(2))
        .start()
        .unwrap();

    tick(&session).await;
    tick(&session).await;
    assert!(session.open_alerts().is_empty());

    tick(&session).await;
    assert_eq!(session.open_alerts().len(), 1);

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_acknowledged_alert_stays_unresolved() {
    let source = MemorySource::new();
    source.set("api", MEMORY_MB, 150.0);
    let session = builder(&source)
        .rule(memory_rule(100.0, Severity::High))
        .start()
        .unwrap();

    let (tx, mut rx) = mpsc::channel(4);
    session.on_alert(tx).await;
    tick(&session).await;

    let raised = recv_within(&mut rx, Duration::from_secs(1)).await;
    assert!(session.acknowledge_alert(raised.alert.id));

    let open = session.open_alerts();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].status, AlertStatus::Acknowledged);
    assert_eq!(session.status().await.open_alerts, 1);

    assert!(!session.acknowledge_alert(uuid::Uuid::new_v4()));

    session.stop().await;
}

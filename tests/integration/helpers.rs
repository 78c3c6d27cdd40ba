//! Shared helpers for integration tests

#![allow(dead_code)]

use std::time::Duration;

use tokio::sync::mpsc;
use watchtower::actions::{Action, ActionContext, ActionOutput, action_fn};
use watchtower::actors::SnapshotEvent;
use watchtower::alerts::{AlertRule, Comparator};
use watchtower::error::ActionError;
use watchtower::optimizer::OverheadMeasurement;
use watchtower::sources::MemorySource;
use watchtower::{MEMORY_MB, Session, SessionBuilder, Severity};

/// Probe reporting overhead far below the default budget
pub fn light_probe() -> impl FnMut(Duration) -> OverheadMeasurement + Send + 'static {
    |_| OverheadMeasurement::new(1.0, 0.5, 5.0)
}

/// Probe reporting tick latency well above the default 100ms budget
pub fn heavy_probe() -> impl FnMut(Duration) -> OverheadMeasurement + Send + 'static {
    |_| OverheadMeasurement::new(1.0, 0.5, 250.0)
}

/// `memory_mb > threshold`
pub fn memory_rule(threshold: f64, severity: Severity) -> AlertRule {
    AlertRule::new(MEMORY_MB, Comparator::Gt, threshold, severity)
}

/// Builder over `source` with a single `api` unit and a light probe
pub fn builder(source: &MemorySource) -> SessionBuilder {
    SessionBuilder::new(source.clone())
        .unit("api", "http")
        .probe(light_probe())
}

/// Action that succeeds after `duration`
pub fn pause(duration: Duration) -> impl Action + 'static {
    action_fn(move |_: ActionContext| async move {
        tokio::time::sleep(duration).await;
        Ok::<_, ActionError>(ActionOutput::message(format!("paused {duration:?}")))
    })
}

/// Action that succeeds immediately
pub fn noop() -> impl Action + 'static {
    action_fn(|_: ActionContext| async { Ok::<_, ActionError>(ActionOutput::empty()) })
}

/// Trigger one monitor tick and return its snapshot
pub async fn tick(session: &Session) -> SnapshotEvent {
    session
        .monitor()
        .tick_now()
        .await
        .expect("monitor is running")
        .expect("tick produced a snapshot")
}

/// Receive the next event or panic after `within`
pub async fn recv_within<T>(rx: &mut mpsc::Receiver<T>, within: Duration) -> T {
    tokio::time::timeout(within, rx.recv())
        .await
        .expect("no event within the deadline")
        .expect("event channel closed")
}

/// Drain everything currently buffered in `rx`
pub fn drain<T>(rx: &mut mpsc::Receiver<T>) -> Vec<T> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

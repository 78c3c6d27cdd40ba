//! Per-tick work after a snapshot was assembled
//!
//! ```text
//! snapshot ─► AlertEvaluator ─► alert log + alert subscribers
//!                  │
//!                  └─► orchestrator (snapshot, then the unit's highest new alerts)
//!          ─► overhead probe ─► PerformanceOptimizer ─► profile change log
//! ```
//!
//! Alerts are always evaluated against the snapshot of the same tick, and workflows only
//! see a tick's alerts once evaluation is complete.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::alerts::{AlertEvaluator, AlertNotification};
use crate::events::{EventLog, Subscribers};
use crate::optimizer::{OverheadProbe, PerformanceOptimizer, ProfileChange};

use super::messages::SnapshotEvent;
use super::monitor::TickStage;
use super::orchestrator::OrchestratorHandle;

pub struct TickPipeline {
    pub evaluator: Arc<parking_lot::Mutex<AlertEvaluator>>,
    pub alert_log: EventLog<AlertNotification>,
    pub alert_subscribers: Subscribers<AlertNotification>,
    pub orchestrator: Option<OrchestratorHandle>,
    pub optimizer: PerformanceOptimizer,
    pub probe: Box<dyn OverheadProbe>,
    pub profile_changes: EventLog<ProfileChange>,
    /// Time an alert subscriber gets per notification
    pub grace: Duration,
}

impl TickPipeline {
    /// Evaluate `snapshot`; returns all notifications and the subset that may trigger
    /// workflows
    fn evaluate(&self, snapshot: &SnapshotEvent) -> (Vec<AlertNotification>, Vec<AlertNotification>) {
        let mut evaluator = self.evaluator.lock();
        let notifications = evaluator.evaluate(snapshot);

        // a unit with several open alerts only triggers workflows for the worst one
        let triggers = notifications
            .iter()
            .filter(|n| n.is_trigger() && evaluator.is_highest_for_unit(n.alert.id))
            .cloned()
            .collect();

        (notifications, triggers)
    }
}

/// Forward the snapshot, then the alerts derived from it
async fn dispatch(
    orchestrator: &OrchestratorHandle,
    snapshot: &SnapshotEvent,
    triggers: Vec<AlertNotification>,
) {
    if let Err(e) = orchestrator.on_snapshot(snapshot.clone()).await {
        warn!("cannot forward snapshot {}: {e}", snapshot.sequence);
        return;
    }
    for notification in triggers {
        if let Err(e) = orchestrator.on_alert(notification.alert).await {
            warn!("cannot forward alert: {e}");
            return;
        }
    }
}

#[async_trait]
impl TickStage for TickPipeline {
    async fn after_tick(&mut self, snapshot: &SnapshotEvent, started: Instant) {
        let (notifications, triggers) = self.evaluate(snapshot);

        if !notifications.is_empty() {
            debug!("tick {}: {} alert changes", snapshot.sequence, notifications.len());
            self.alert_log.extend(notifications.iter().cloned()).await;
            for notification in &notifications {
                self.alert_subscribers
                    .publish(notification, self.grace)
                    .await;
            }
        }

        if let Some(orchestrator) = &self.orchestrator {
            dispatch(orchestrator, snapshot, triggers).await;
        }

        let measurement = self.probe.measure(started.elapsed());
        self.optimizer.record_overhead(measurement);
        if let Some(change) = self.optimizer.evaluate_and_adjust() {
            self.profile_changes.append(change).await;
        }
    }
}

//! Message types for actor communication
//!
//! Every actor owns an mpsc command channel. Queries carry a oneshot `respond_to` for the
//! answer; notifications are fire-and-forget.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::alerts::Alert;
use crate::error::EngineResult;
use crate::monitors::{MetricSample, MonitoredUnit, MonitoringSnapshot};
use crate::workflows::WorkflowExecution;

/// Snapshots are shared between the pipeline, subscribers and executions
pub type SnapshotEvent = Arc<MonitoringSnapshot>;

/// Commands accepted by the monitor actor
#[derive(Debug)]
pub enum MonitorCommand {
    /// Run a tick right away, independent of the ticker
    ///
    /// Answers `None` when the tick was skipped.
    TickNow {
        respond_to: oneshot::Sender<Option<SnapshotEvent>>,
    },

    /// Start polling another unit; answers `false` if the id is already known
    RegisterUnit {
        unit: MonitoredUnit,
        respond_to: oneshot::Sender<bool>,
    },

    /// Current state of every known unit, active or not
    Units {
        respond_to: oneshot::Sender<Vec<MonitoredUnit>>,
    },

    /// Retained samples of one metric, oldest first
    History {
        unit_id: String,
        metric: String,
        respond_to: oneshot::Sender<Vec<MetricSample>>,
    },

    /// Most recent snapshot, if any tick completed yet
    LastSnapshot {
        respond_to: oneshot::Sender<Option<SnapshotEvent>>,
    },

    Shutdown,
}

/// Counters reported by the orchestrator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub running: usize,
    pub queued: usize,
    pub registered: usize,
}

/// Commands accepted by the orchestrator actor
#[derive(Debug)]
pub enum OrchestratorCommand {
    /// A new snapshot; feeds health triggers and the context of later executions
    Snapshot(SnapshotEvent),

    /// A raised or escalated alert that is the highest open one on its unit
    Alert(Alert),

    /// Run a workflow regardless of its trigger; answers once the execution finished
    ExecuteManually {
        workflow_id: String,
        params: serde_json::Value,
        respond_to: oneshot::Sender<EngineResult<WorkflowExecution>>,
    },

    Status {
        respond_to: oneshot::Sender<OrchestratorStatus>,
    },

    /// Cancel in-flight executions and stop; answers once they wound down
    Shutdown { respond_to: oneshot::Sender<()> },
}

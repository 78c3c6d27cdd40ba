//! Session lifecycle
//!
//! A [`Session`] is one running instance of the engine: a monitor loop over a fixed set
//! of units, an alert evaluator, a workflow orchestrator and the optimizer tuning them,
//! all sharing one [`OptimizationProfile`].
//!
//! ```no_run
//! # async fn demo() -> watchtower::EngineResult<()> {
//! use watchtower::sources::MemorySource;
//! use watchtower::workflows::WorkflowTrigger;
//! use watchtower::{ProfileName, SessionBuilder, Workflow};
//!
//! let session = SessionBuilder::new(MemorySource::new())
//!     .unit("api", "http")
//!     .register_workflow(Workflow::new("triage", WorkflowTrigger::alert_type("memory.*")).step("diagnose"))
//!     .profile(ProfileName::Adaptive)
//!     .start()?;
//!
//! let status = session.status().await;
//! session.stop().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::actions::{Action, ActionRegistry};
use crate::actors::{
    MonitorHandle, MonitorSetup, OrchestratorHandle, OrchestratorSetup, SnapshotEvent,
    TickPipeline,
};
use crate::alerts::{Alert, AlertEvaluator, AlertNotification, AlertRule};
use crate::config::Config;
use crate::error::EngineResult;
use crate::events::{EventLog, EventSink, SubscriptionId, Subscribers};
use crate::monitors::MonitoredUnit;
use crate::optimizer::{OverheadProbe, PerformanceOptimizer, ProcessProbe, ProfileChange};
use crate::profile::{OptimizationProfile, ProfileName, ProfileReader, profile_channel};
use crate::sources::MetricSource;
use crate::workflows::runner::ExecutionRunner;
use crate::workflows::{Workflow, WorkflowExecution};

/// Summary returned by [`Session::status`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub monitoring: bool,
    pub open_alerts: usize,
    pub running_executions: usize,
    pub current_profile: OptimizationProfile,
}

/// Collects everything a session needs before it starts
pub struct SessionBuilder {
    config: Config,
    source: Arc<dyn MetricSource>,
    actions: ActionRegistry,
    probe: Option<Box<dyn OverheadProbe>>,
}

impl SessionBuilder {
    /// Builder with default configuration and the built-in actions
    pub fn new(source: impl MetricSource + 'static) -> Self {
        Self::from_config(Config::default(), Arc::new(source))
    }

    /// Builder taking units, rules, workflows and tuning from `config`
    pub fn from_config(config: Config, source: Arc<dyn MetricSource>) -> Self {
        let actions = ActionRegistry::with_builtins(config.notify.clone());
        Self {
            config,
            source,
            actions,
            probe: None,
        }
    }

    pub fn unit(mut self, id: impl Into<String>, kind: impl Into<String>) -> Self {
        self.config.units.push(crate::config::UnitConfig {
            id: id.into(),
            kind: kind.into(),
        });
        self
    }

    pub fn rule(mut self, rule: AlertRule) -> Self {
        self.config.alerts.rules.push(rule);
        self
    }

    pub fn register_workflow(mut self, workflow: Workflow) -> Self {
        self.config.workflows.push(workflow);
        self
    }

    /// Initial profile; `adaptive` starts at the balanced tier
    pub fn profile(mut self, profile: ProfileName) -> Self {
        self.config.profile = profile;
        self
    }

    /// Make `action` available to workflow steps under `name`
    pub fn action(mut self, name: impl Into<String>, action: impl Action + 'static) -> Self {
        if self.actions.register(name, action).is_some() {
            debug!("replaced a registered action");
        }
        self
    }

    /// Replace the process probe used to measure the engine's overhead
    pub fn probe(mut self, probe: impl OverheadProbe + 'static) -> Self {
        self.probe = Some(Box::new(probe));
        self
    }

    /// Adjust the configuration in place
    pub fn configure(mut self, f: impl FnOnce(&mut Config)) -> Self {
        f(&mut self.config);
        self
    }

    /// Spawn the actors; must be called from within a tokio runtime
    ///
    /// Fails when the initial profile is invalid or a workflow cannot be registered.
    pub fn start(self) -> EngineResult<Session> {
        let Self {
            config,
            source,
            actions,
            probe,
        } = self;

        let id = Uuid::new_v4();
        let (publisher, reader) =
            profile_channel(config.optimizer.presets.profile(config.profile))?;

        let cancel = CancellationToken::new();
        let executions = EventLog::new();
        let completions = Subscribers::new("executions");

        let orchestrator = OrchestratorHandle::spawn(OrchestratorSetup {
            session_id: id,
            workflows: config.workflows.clone(),
            runner: ExecutionRunner::new(actions, &config.orchestrator),
            profile: reader.clone(),
            config: config.orchestrator.clone(),
            cancel: cancel.clone(),
            executions,
            completions,
        })?;

        let evaluator = Arc::new(parking_lot::Mutex::new(AlertEvaluator::new(&config.alerts)));
        let alert_log = EventLog::new();
        let alert_subscribers = Subscribers::new("alerts");
        let profile_changes = EventLog::new();

        let pipeline = TickPipeline {
            evaluator: evaluator.clone(),
            alert_log: alert_log.clone(),
            alert_subscribers: alert_subscribers.clone(),
            orchestrator: Some(orchestrator.clone()),
            optimizer: PerformanceOptimizer::new(config.optimizer.clone(), publisher),
            probe: probe.unwrap_or_else(|| Box::new(ProcessProbe::new()) as Box<dyn OverheadProbe>),
            profile_changes: profile_changes.clone(),
            grace: config.monitor.subscriber_grace(),
        };

        let units = config
            .units
            .iter()
            .map(|unit| MonitoredUnit::new(&unit.id, &unit.kind))
            .collect::<Vec<_>>();

        info!(
            "starting session {id} with {} units and {} workflows at {} profile",
            units.len(),
            config.workflows.len(),
            reader.current().name
        );

        let monitor = MonitorHandle::spawn(MonitorSetup {
            units,
            metrics: config.metrics.clone(),
            source,
            profile: reader.clone(),
            config: config.monitor.clone(),
            stage: Some(Box::new(pipeline)),
        });

        Ok(Session {
            id,
            monitor,
            orchestrator,
            evaluator,
            alert_log,
            alert_subscribers,
            profile: reader,
            profile_changes,
            cancel,
        })
    }
}

/// Handle to a running session
pub struct Session {
    id: Uuid,
    monitor: MonitorHandle,
    orchestrator: OrchestratorHandle,
    evaluator: Arc<parking_lot::Mutex<AlertEvaluator>>,
    alert_log: EventLog<AlertNotification>,
    alert_subscribers: Subscribers<AlertNotification>,
    profile: ProfileReader,
    profile_changes: EventLog<ProfileChange>,
    cancel: CancellationToken,
}

impl Session {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Stop the monitor loop and the scheduler, and cancel in-flight executions
    ///
    /// Executions observe the cancellation between steps. Calling `stop` again is a no-op.
    pub async fn stop(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();

        if let Err(e) = self.monitor.shutdown().await {
            debug!("monitor already stopped: {e}");
        }
        if let Err(e) = self.orchestrator.shutdown().await {
            debug!("orchestrator already stopped: {e}");
        }
        info!("session {} stopped", self.id);
    }

    pub async fn status(&self) -> SessionStatus {
        let running_executions = match self.orchestrator.status().await {
            Ok(status) => status.running,
            Err(e) => {
                debug!("no execution status: {e}");
                0
            }
        };

        SessionStatus {
            monitoring: self.monitor.is_running(),
            open_alerts: self.evaluator.lock().open_count(),
            running_executions,
            current_profile: self.profile.current(),
        }
    }

    pub fn current_profile(&self) -> OptimizationProfile {
        self.profile.current()
    }

    /// Handle to the monitor, for immediate ticks and history queries
    pub fn monitor(&self) -> &MonitorHandle {
        &self.monitor
    }

    pub async fn on_snapshot(&self, sink: impl EventSink<SnapshotEvent> + 'static) -> SubscriptionId {
        self.monitor.subscribe(sink).await
    }

    pub async fn unsubscribe_snapshots(&self, id: SubscriptionId) -> bool {
        self.monitor.unsubscribe(id).await
    }

    /// Raised, escalated and resolved alerts
    pub async fn on_alert(&self, sink: impl EventSink<AlertNotification> + 'static) -> SubscriptionId {
        self.alert_subscribers.subscribe(sink).await
    }

    pub async fn unsubscribe_alerts(&self, id: SubscriptionId) -> bool {
        self.alert_subscribers.unsubscribe(id).await
    }

    pub async fn on_execution_complete(
        &self,
        sink: impl EventSink<WorkflowExecution> + 'static,
    ) -> SubscriptionId {
        self.orchestrator.subscribe(sink).await
    }

    pub async fn unsubscribe_executions(&self, id: SubscriptionId) -> bool {
        self.orchestrator.unsubscribe(id).await
    }

    /// Run a workflow now and wait for it to finish
    pub async fn execute_manually(
        &self,
        workflow_id: &str,
        params: serde_json::Value,
    ) -> EngineResult<WorkflowExecution> {
        self.orchestrator.execute_manually(workflow_id, params).await
    }

    /// Mark an open alert as acknowledged; returns `false` for unknown or resolved alerts
    pub fn acknowledge_alert(&self, id: Uuid) -> bool {
        let acknowledged = self.evaluator.lock().acknowledge(id);
        if !acknowledged {
            warn!("cannot acknowledge alert {id}");
        }
        acknowledged
    }

    /// Every alert raised during the session, resolved ones included
    pub fn alerts(&self) -> Vec<Alert> {
        self.evaluator.lock().alerts().to_vec()
    }

    pub fn open_alerts(&self) -> Vec<Alert> {
        self.evaluator.lock().open_alerts()
    }

    /// Alert notifications in the order they were emitted
    pub async fn alert_log(&self) -> Vec<AlertNotification> {
        self.alert_log.snapshot().await
    }

    /// Finished executions in completion order
    pub async fn executions(&self) -> Vec<WorkflowExecution> {
        self.orchestrator.executions().await
    }

    pub async fn profile_changes(&self) -> Vec<ProfileChange> {
        self.profile_changes.snapshot().await
    }
}

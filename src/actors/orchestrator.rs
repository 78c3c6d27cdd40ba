//! Workflow orchestrator actor
//!
//! Owns the registered workflows and decides when they run. Triggers arrive from three
//! places: alerts and snapshots forwarded by the tick pipeline, the actor's own schedule
//! ticker, and manual requests through the handle.
//!
//! A workflow never has more than one running execution. What happens to a trigger that
//! arrives while it runs depends on its [`ConcurrencyPolicy`]. Across workflows, the
//! number of running executions is capped by the profile's `max_concurrent_operations`.
//!
//! On shutdown, executions still running after the grace period are aborted. Each one is
//! recorded as cancelled with [`ABANDONED_AT_STOP`] as its error, so the history keeps
//! every execution that was started.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::actions::ActionContext;
use crate::alerts::Alert;
use crate::config::OrchestratorConfig;
use crate::error::{EngineError, EngineResult};
use crate::events::{EventLog, EventSink, SubscriptionId, Subscribers};
use crate::profile::ProfileReader;
use crate::workflows::runner::ExecutionRunner;
use crate::workflows::{ConcurrencyPolicy, TriggerKind, TriggerMatcher, Workflow, WorkflowExecution};

use super::messages::{OrchestratorCommand, OrchestratorStatus, SnapshotEvent};

type ManualReply = oneshot::Sender<EngineResult<WorkflowExecution>>;

/// Error recorded on executions aborted after the shutdown grace
pub const ABANDONED_AT_STOP: &str = "abandoned at session stop";

struct Registered {
    workflow: Arc<Workflow>,
    matcher: TriggerMatcher,
    next_due: Option<Instant>,
}

/// A trigger waiting to become an execution
struct PendingTrigger {
    kind: TriggerKind,
    alert: Option<Alert>,
    snapshot: Option<SnapshotEvent>,
    params: serde_json::Value,
    respond_to: Option<ManualReply>,
}

/// Everything the orchestrator actor needs to run
pub struct OrchestratorSetup {
    pub session_id: Uuid,
    pub workflows: Vec<Workflow>,
    pub runner: ExecutionRunner,
    pub profile: ProfileReader,
    pub config: OrchestratorConfig,
    /// Parent of every execution's cancellation token
    pub cancel: CancellationToken,
    pub executions: EventLog<WorkflowExecution>,
    pub completions: Subscribers<WorkflowExecution>,
}

pub struct OrchestratorActor {
    session_id: Uuid,
    workflows: Vec<Registered>,
    index: HashMap<String, usize>,
    runner: Arc<ExecutionRunner>,
    profile: ProfileReader,
    config: OrchestratorConfig,
    cancel: CancellationToken,
    executions: EventLog<WorkflowExecution>,
    completions: Subscribers<WorkflowExecution>,

    /// workflow id -> running execution id
    running: HashMap<String, Uuid>,
    queued: HashMap<String, VecDeque<PendingTrigger>>,
    waiting: HashMap<Uuid, ManualReply>,
    tasks: JoinSet<WorkflowExecution>,
    /// Task id -> the execution as it was when the task started
    task_owners: HashMap<Id, WorkflowExecution>,

    last_snapshot: Option<SnapshotEvent>,
    last_health: Option<f64>,
    command_rx: mpsc::Receiver<OrchestratorCommand>,
}

impl OrchestratorActor {
    fn new(
        setup: OrchestratorSetup,
        command_rx: mpsc::Receiver<OrchestratorCommand>,
    ) -> EngineResult<Self> {
        let started = Instant::now();
        let mut workflows = Vec::with_capacity(setup.workflows.len());
        let mut index = HashMap::new();

        for workflow in setup.workflows {
            if index.contains_key(&workflow.id) {
                return Err(EngineError::DuplicateWorkflow(workflow.id));
            }
            let matcher = workflow.trigger.compile(&workflow.id)?;

            for step in &workflow.steps {
                if !setup.runner.registry().contains(&step.action) {
                    warn!(
                        "workflow {} uses unregistered action {}, its executions will fail",
                        workflow.id, step.action
                    );
                }
            }

            let next_due = matcher.schedule().map(|every| started + every);
            index.insert(workflow.id.clone(), workflows.len());
            workflows.push(Registered {
                workflow: Arc::new(workflow),
                matcher,
                next_due,
            });
        }

        Ok(Self {
            session_id: setup.session_id,
            workflows,
            index,
            runner: Arc::new(setup.runner),
            profile: setup.profile,
            config: setup.config,
            cancel: setup.cancel,
            executions: setup.executions,
            completions: setup.completions,
            running: HashMap::new(),
            queued: HashMap::new(),
            waiting: HashMap::new(),
            tasks: JoinSet::new(),
            task_owners: HashMap::new(),
            last_snapshot: None,
            last_health: None,
            command_rx,
        })
    }

    #[instrument(skip(self), fields(session = %self.session_id))]
    pub async fn run(mut self) {
        debug!("starting orchestrator with {} workflows", self.workflows.len());

        let mut schedule = interval(self.config.schedule_resolution());
        schedule.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = schedule.tick() => self.fire_schedules(),

                Some(joined) = self.tasks.join_next_with_id() => {
                    self.finished(joined).await;
                }

                cmd = self.command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        debug!("all orchestrator handles dropped, shutting down");
                        self.wind_down().await;
                        break;
                    };

                    match cmd {
                        OrchestratorCommand::Snapshot(snapshot) => self.on_snapshot(snapshot),

                        OrchestratorCommand::Alert(alert) => self.on_alert(alert),

                        OrchestratorCommand::ExecuteManually { workflow_id, params, respond_to } => {
                            self.execute_manually(workflow_id, params, respond_to);
                        }

                        OrchestratorCommand::Status { respond_to } => {
                            let _ = respond_to.send(OrchestratorStatus {
                                running: self.running.len(),
                                queued: self.queued.values().map(VecDeque::len).sum(),
                                registered: self.workflows.len(),
                            });
                        }

                        OrchestratorCommand::Shutdown { respond_to } => {
                            debug!("received shutdown command");
                            self.wind_down().await;
                            let _ = respond_to.send(());
                            break;
                        }
                    }
                }
            }
        }

        debug!("orchestrator stopped");
    }

    fn on_snapshot(&mut self, snapshot: SnapshotEvent) {
        let previous = self.last_health.replace(snapshot.overall_health);

        let matching: Vec<String> = self
            .workflows
            .iter()
            .filter(|r| r.workflow.enabled && r.matcher.matches_snapshot(&snapshot, previous))
            .map(|r| r.workflow.id.clone())
            .collect();

        self.last_snapshot = Some(snapshot.clone());

        for workflow_id in matching {
            self.trigger(
                &workflow_id,
                PendingTrigger {
                    kind: TriggerKind::Snapshot,
                    alert: None,
                    snapshot: Some(snapshot.clone()),
                    params: serde_json::Value::Null,
                    respond_to: None,
                },
            );
        }
    }

    fn on_alert(&mut self, alert: Alert) {
        let matching: Vec<String> = self
            .workflows
            .iter()
            .filter(|r| r.workflow.enabled && r.matcher.matches_alert(&alert))
            .map(|r| r.workflow.id.clone())
            .collect();

        for workflow_id in matching {
            self.trigger(
                &workflow_id,
                PendingTrigger {
                    kind: TriggerKind::Alert,
                    alert: Some(alert.clone()),
                    snapshot: self.last_snapshot.clone(),
                    params: serde_json::Value::Null,
                    respond_to: None,
                },
            );
        }
    }

    fn fire_schedules(&mut self) {
        let now = Instant::now();
        let mut due = Vec::new();

        for registered in &mut self.workflows {
            let (Some(next_due), Some(every)) = (registered.next_due, registered.matcher.schedule())
            else {
                continue;
            };
            if now < next_due {
                continue;
            }
            registered.next_due = Some(now + every);
            if registered.workflow.enabled {
                due.push(registered.workflow.id.clone());
            }
        }

        for workflow_id in due {
            self.trigger(
                &workflow_id,
                PendingTrigger {
                    kind: TriggerKind::Schedule,
                    alert: None,
                    snapshot: self.last_snapshot.clone(),
                    params: serde_json::Value::Null,
                    respond_to: None,
                },
            );
        }
    }

    fn execute_manually(
        &mut self,
        workflow_id: String,
        params: serde_json::Value,
        respond_to: ManualReply,
    ) {
        let Some(&position) = self.index.get(&workflow_id) else {
            let _ = respond_to.send(Err(EngineError::WorkflowNotFound(workflow_id)));
            return;
        };
        if !self.workflows[position].workflow.enabled {
            let _ = respond_to.send(Err(EngineError::WorkflowDisabled(workflow_id)));
            return;
        }

        self.trigger(
            &workflow_id,
            PendingTrigger {
                kind: TriggerKind::Manual,
                alert: None,
                snapshot: self.last_snapshot.clone(),
                params,
                respond_to: Some(respond_to),
            },
        );
    }

    /// Start `pending` now, queue it, or drop it
    fn trigger(&mut self, workflow_id: &str, pending: PendingTrigger) {
        let Some(&position) = self.index.get(workflow_id) else {
            return;
        };
        let policy = self.workflows[position].workflow.concurrency;

        let capacity = self.profile.current().max_concurrent_operations;
        let blocked = if self.running.contains_key(workflow_id) {
            Some(EngineError::WorkflowBusy(workflow_id.to_string()))
        } else if self.running.len() >= capacity {
            Some(EngineError::CapacityExceeded(capacity))
        } else {
            None
        };

        let Some(reason) = blocked else {
            self.start(position, pending);
            return;
        };

        match policy {
            ConcurrencyPolicy::Drop => {
                info!("dropping {} trigger of {workflow_id}: {reason}", pending.kind);
                if let Some(respond_to) = pending.respond_to {
                    let _ = respond_to.send(Err(reason));
                }
            }
            ConcurrencyPolicy::Queue => {
                let queue = self.queued.entry(workflow_id.to_string()).or_default();
                if queue.len() >= self.config.max_queued {
                    warn!(
                        "queue of {workflow_id} is full ({}), dropping {} trigger",
                        self.config.max_queued, pending.kind
                    );
                    if let Some(respond_to) = pending.respond_to {
                        let _ = respond_to.send(Err(reason));
                    }
                    return;
                }
                debug!("queueing {} trigger of {workflow_id}: {reason}", pending.kind);
                queue.push_back(pending);
            }
        }
    }

    fn start(&mut self, position: usize, pending: PendingTrigger) {
        let workflow = self.workflows[position].workflow.clone();

        let execution = WorkflowExecution::pending(
            &workflow,
            self.session_id,
            pending.kind,
            pending.snapshot.as_ref().map(|s| s.timestamp),
            pending.alert.as_ref().map(|a| a.id),
        );
        let execution_id = execution.execution_id;

        let ctx = ActionContext {
            workflow_id: workflow.id.clone(),
            execution_id,
            session_id: self.session_id,
            step: String::new(),
            attempt: 0,
            trigger: pending.kind,
            snapshot: pending.snapshot,
            alert: pending.alert,
            params: pending.params,
            cancel: self.cancel.child_token(),
        };

        info!("starting {} of {} ({} trigger)", execution_id, workflow.id, pending.kind);

        let skeleton = execution.clone();
        let runner = self.runner.clone();
        let handle = self.tasks.spawn({
            let workflow = workflow.clone();
            async move { runner.run(&workflow, execution, ctx).await }
        });

        self.running.insert(workflow.id.clone(), execution_id);
        self.task_owners.insert(handle.id(), skeleton);
        if let Some(respond_to) = pending.respond_to {
            self.waiting.insert(execution_id, respond_to);
        }
    }

    async fn finished(&mut self, joined: Result<(Id, WorkflowExecution), JoinError>) {
        match joined {
            Ok((id, execution)) => {
                self.task_owners.remove(&id);
                self.running.remove(&execution.workflow_id);
                debug!(
                    "{} of {} finished as {:?}",
                    execution.execution_id, execution.workflow_id, execution.status
                );

                self.record(execution).await;
            }
            Err(e) => {
                let Some(skeleton) = self.task_owners.remove(&e.id()) else {
                    return;
                };
                self.running.remove(&skeleton.workflow_id);

                if e.is_cancelled() {
                    warn!(
                        "{} of {} aborted at shutdown",
                        skeleton.execution_id, skeleton.workflow_id
                    );
                    self.record(skeleton.abandoned(ABANDONED_AT_STOP)).await;
                } else {
                    error!(
                        "execution {} of {} did not finish: {e}",
                        skeleton.execution_id, skeleton.workflow_id
                    );
                    if let Some(respond_to) = self.waiting.remove(&skeleton.execution_id) {
                        let _ = respond_to.send(Err(EngineError::StepExecution {
                            step: skeleton.workflow_id,
                            reason: e.to_string(),
                        }));
                    }
                }
            }
        }

        self.start_queued();
    }

    /// Append to the history, answer a waiting caller, notify subscribers
    async fn record(&mut self, execution: WorkflowExecution) {
        self.executions.append(execution.clone()).await;
        if let Some(respond_to) = self.waiting.remove(&execution.execution_id) {
            let _ = respond_to.send(Ok(execution.clone()));
        }
        self.completions
            .publish(&execution, self.config.subscriber_grace())
            .await;
    }

    /// Start queued triggers whose workflow is idle, oldest workflow first
    fn start_queued(&mut self) {
        let capacity = self.profile.current().max_concurrent_operations;

        for position in 0..self.workflows.len() {
            if self.running.len() >= capacity {
                break;
            }
            let workflow_id = self.workflows[position].workflow.id.clone();
            if self.running.contains_key(&workflow_id) {
                continue;
            }
            let Some(pending) = self
                .queued
                .get_mut(&workflow_id)
                .and_then(VecDeque::pop_front)
            else {
                continue;
            };
            self.start(position, pending);
        }
    }

    /// Cancel everything in flight and give it a grace period to finish
    async fn wind_down(&mut self) {
        self.cancel.cancel();

        for (workflow_id, queue) in self.queued.drain() {
            if !queue.is_empty() {
                debug!("discarding {} queued triggers of {workflow_id}", queue.len());
            }
            for pending in queue {
                if let Some(respond_to) = pending.respond_to {
                    let _ = respond_to.send(Err(EngineError::ActorUnavailable("orchestrator")));
                }
            }
        }

        let grace = self.config.shutdown_grace();
        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = self.tasks.join_next_with_id().await {
                self.finished(joined).await;
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "abandoning {} executions still running after {grace:?}",
                self.tasks.len()
            );
            self.tasks.abort_all();

            while let Some(joined) = self.tasks.join_next_with_id().await {
                self.finished(joined).await;
            }
        }
    }
}

/// Handle for interacting with the orchestrator actor
#[derive(Clone)]
pub struct OrchestratorHandle {
    sender: mpsc::Sender<OrchestratorCommand>,
    executions: EventLog<WorkflowExecution>,
    completions: Subscribers<WorkflowExecution>,
}

impl OrchestratorHandle {
    /// Validate the workflows and spawn the actor
    ///
    /// Fails on duplicate workflow ids and on triggers that do not compile.
    pub fn spawn(setup: OrchestratorSetup) -> EngineResult<Self> {
        let (sender, receiver) = mpsc::channel(32);
        let executions = setup.executions.clone();
        let completions = setup.completions.clone();

        let actor = OrchestratorActor::new(setup, receiver)?;
        tokio::spawn(actor.run());

        Ok(Self {
            sender,
            executions,
            completions,
        })
    }

    async fn send(&self, command: OrchestratorCommand) -> EngineResult<()> {
        self.sender
            .send(command)
            .await
            .map_err(|_| EngineError::ActorUnavailable("orchestrator"))
    }

    pub async fn on_snapshot(&self, snapshot: SnapshotEvent) -> EngineResult<()> {
        self.send(OrchestratorCommand::Snapshot(snapshot)).await
    }

    pub async fn on_alert(&self, alert: Alert) -> EngineResult<()> {
        self.send(OrchestratorCommand::Alert(alert)).await
    }

    /// Run a workflow now, whatever its trigger, and wait for the execution to finish
    ///
    /// A queued request waits for its turn; a dropped one fails with the reason.
    pub async fn execute_manually(
        &self,
        workflow_id: &str,
        params: serde_json::Value,
    ) -> EngineResult<WorkflowExecution> {
        let (tx, rx) = oneshot::channel();
        self.send(OrchestratorCommand::ExecuteManually {
            workflow_id: workflow_id.to_string(),
            params,
            respond_to: tx,
        })
        .await?;
        rx.await
            .map_err(|_| EngineError::ActorUnavailable("orchestrator"))?
    }

    pub async fn status(&self) -> EngineResult<OrchestratorStatus> {
        let (tx, rx) = oneshot::channel();
        self.send(OrchestratorCommand::Status { respond_to: tx })
            .await?;
        rx.await
            .map_err(|_| EngineError::ActorUnavailable("orchestrator"))
    }

    /// Every finished execution, in completion order
    pub async fn executions(&self) -> Vec<WorkflowExecution> {
        self.executions.snapshot().await
    }

    pub async fn subscribe(
        &self,
        sink: impl EventSink<WorkflowExecution> + 'static,
    ) -> SubscriptionId {
        self.completions.subscribe(sink).await
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.completions.unsubscribe(id).await
    }

    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Cancel in-flight executions and wait for the actor to stop
    pub async fn shutdown(&self) -> EngineResult<()> {
        let (tx, rx) = oneshot::channel();
        self.send(OrchestratorCommand::Shutdown { respond_to: tx })
            .await?;
        rx.await
            .map_err(|_| EngineError::ActorUnavailable("orchestrator"))
    }
}

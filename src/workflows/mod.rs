//! Workflows
//!
//! A [`Workflow`] maps a trigger to an ordered list of named actions. Workflows are
//! registered when the session starts and never change afterwards; every triggered run
//! is recorded as a [`WorkflowExecution`].

pub mod recommend;
pub mod runner;

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::alerts::{Alert, Severity};
use crate::error::{EngineError, EngineResult};
use crate::monitors::MonitoringSnapshot;

pub use runner::{ExecutionRunner, StepPolicy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub trigger: WorkflowTrigger,
    pub steps: Vec<WorkflowStep>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// What happens to a trigger while an execution is already running
    #[serde(default)]
    pub concurrency: ConcurrencyPolicy,

    /// Wall-clock budget overriding the orchestrator default
    #[serde(default)]
    pub budget_ms: Option<u64>,
}

fn default_enabled() -> bool {
    true
}

impl Workflow {
    pub fn new(id: impl Into<String>, trigger: WorkflowTrigger) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            trigger,
            steps: Vec::new(),
            enabled: true,
            concurrency: ConcurrencyPolicy::default(),
            budget_ms: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn step(mut self, step: impl Into<WorkflowStep>) -> Self {
        self.steps.push(step.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_concurrency(mut self, concurrency: ConcurrencyPolicy) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget_ms = Some(budget.as_millis() as u64);
        self
    }

    pub fn budget(&self) -> Option<Duration> {
        self.budget_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrencyPolicy {
    /// Skip the trigger and log it
    #[default]
    Drop,
    /// Start the trigger once the running execution finishes
    Queue,
}

/// One named action of a workflow
///
/// Deserialises from a plain action name or from an object with per-step overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "StepDefinition")]
pub struct WorkflowStep {
    pub action: String,
    pub timeout_ms: Option<u64>,
    pub retries: Option<u32>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StepDefinition {
    Name(String),
    Detailed {
        action: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default)]
        retries: Option<u32>,
    },
}

impl From<StepDefinition> for WorkflowStep {
    fn from(definition: StepDefinition) -> Self {
        match definition {
            StepDefinition::Name(action) => WorkflowStep::new(action),
            StepDefinition::Detailed {
                action,
                timeout_ms,
                retries,
            } => WorkflowStep {
                action,
                timeout_ms,
                retries,
            },
        }
    }
}

impl WorkflowStep {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            timeout_ms: None,
            retries: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }
}

impl From<&str> for WorkflowStep {
    fn from(action: &str) -> Self {
        WorkflowStep::new(action)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowTrigger {
    /// Alerts whose type matches the anchored pattern
    AlertType { pattern: String },
    /// Alerts at or above the given severity
    Severity { min: Severity },
    /// Every `every_secs`, independent of the monitor cadence
    Schedule { every_secs: u64 },
    /// Only through `execute_manually`
    Manual,
    /// Snapshots whose overall health drops below the threshold
    HealthBelow { threshold: f64 },
}

impl WorkflowTrigger {
    pub fn alert_type(pattern: impl Into<String>) -> Self {
        WorkflowTrigger::AlertType {
            pattern: pattern.into(),
        }
    }

    /// Check the trigger and prepare it for matching
    pub fn compile(&self, workflow_id: &str) -> EngineResult<TriggerMatcher> {
        let invalid = |reason: String| EngineError::InvalidTrigger {
            workflow: workflow_id.to_string(),
            reason,
        };

        match self {
            WorkflowTrigger::AlertType { pattern } => Regex::new(&format!("^(?:{pattern})$"))
                .map(TriggerMatcher::AlertType)
                .map_err(|e| invalid(format!("invalid alert type pattern: {e}"))),
            WorkflowTrigger::Severity { min } => Ok(TriggerMatcher::Severity(*min)),
            WorkflowTrigger::Schedule { every_secs: 0 } => {
                Err(invalid("schedule interval must be positive".to_string()))
            }
            WorkflowTrigger::Schedule { every_secs } => {
                Ok(TriggerMatcher::Schedule(Duration::from_secs(*every_secs)))
            }
            WorkflowTrigger::Manual => Ok(TriggerMatcher::Manual),
            WorkflowTrigger::HealthBelow { threshold } if (0.0..=1.0).contains(threshold) => {
                Ok(TriggerMatcher::HealthBelow(*threshold))
            }
            WorkflowTrigger::HealthBelow { threshold } => Err(invalid(format!(
                "health threshold {threshold} is outside 0..=1"
            ))),
        }
    }
}

/// Compiled form of a [`WorkflowTrigger`]
#[derive(Debug, Clone)]
pub enum TriggerMatcher {
    AlertType(Regex),
    Severity(Severity),
    Schedule(Duration),
    Manual,
    HealthBelow(f64),
}

impl TriggerMatcher {
    pub fn matches_alert(&self, alert: &Alert) -> bool {
        match self {
            TriggerMatcher::AlertType(pattern) => pattern.is_match(&alert.alert_type),
            TriggerMatcher::Severity(min) => alert.severity >= *min,
            _ => false,
        }
    }

    /// Whether the snapshot matches; `previous` is the overall health of the snapshot before
    ///
    /// Health triggers fire when health crosses below the threshold, not on every snapshot
    /// that stays below it.
    pub fn matches_snapshot(&self, snapshot: &MonitoringSnapshot, previous: Option<f64>) -> bool {
        match self {
            TriggerMatcher::HealthBelow(threshold) => {
                snapshot.overall_health < *threshold
                    && previous.is_none_or(|health| health >= *threshold)
            }
            _ => false,
        }
    }

    pub fn schedule(&self) -> Option<Duration> {
        match self {
            TriggerMatcher::Schedule(every) => Some(*every),
            _ => None,
        }
    }
}

/// What started an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Alert,
    Snapshot,
    Schedule,
    Manual,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            TriggerKind::Alert => "alert",
            TriggerKind::Snapshot => "snapshot",
            TriggerKind::Schedule => "schedule",
            TriggerKind::Manual => "manual",
        };
        f.write_str(kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_finished(self) -> bool {
        !matches!(self, ExecutionStatus::Pending | ExecutionStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    /// The execution budget ran out while the step was running
    Abandoned,
    Cancelled,
}

/// Outcome of one step, across all its attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub action: String,
    pub status: StepStatus,
    pub attempts: u32,
    pub output: Option<String>,
    pub error: Option<String>,
}

/// Trace of one workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub session_id: Uuid,
    pub trigger: TriggerKind,
    /// Alert that triggered the execution
    pub alert_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Timestamp of the snapshot the execution was derived from
    pub snapshot_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub steps_completed: usize,
    pub steps_expected: usize,
    pub step_results: Vec<StepResult>,
    pub error: Option<String>,
    pub recommendations: Vec<String>,
}

impl WorkflowExecution {
    pub fn pending(
        workflow: &Workflow,
        session_id: Uuid,
        trigger: TriggerKind,
        snapshot_at: Option<DateTime<Utc>>,
        alert_id: Option<Uuid>,
    ) -> Self {
        // never start before the data the execution was derived from
        let now = Utc::now();
        let started_at = snapshot_at.map_or(now, |at| now.max(at));

        Self {
            execution_id: Uuid::new_v4(),
            workflow_id: workflow.id.clone(),
            session_id,
            trigger,
            alert_id,
            started_at,
            finished_at: None,
            snapshot_at,
            status: ExecutionStatus::Pending,
            steps_completed: 0,
            steps_expected: workflow.steps.len(),
            step_results: Vec::new(),
            error: None,
            recommendations: Vec::new(),
        }
    }

    /// Close an execution whose task was aborted before it reported back
    pub fn abandoned(mut self, reason: &str) -> Self {
        self.status = ExecutionStatus::Cancelled;
        self.error = Some(reason.to_string());
        self.finished_at = Some(Utc::now().max(self.started_at));
        self
    }
}

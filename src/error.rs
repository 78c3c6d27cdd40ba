//! Error types for the telemetry engine
//!
//! Errors are split along the boundary where they are handled:
//!
//! - [`FetchError`] is returned by a [`MetricSource`](crate::sources::MetricSource) and is
//!   always contained inside the monitor tick (the unit is penalised, the tick goes on).
//! - [`ActionError`] is returned by a workflow step action and is retried per step policy.
//! - [`EngineError`] is what crosses component and session boundaries.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Transient failure while fetching a metric from a monitored unit
///
/// Never escalated on its own: the unit is retried on the next tick.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    /// The fetch did not complete within its timeout
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    /// The source could not be reached or answered with an error
    #[error("metric source unavailable: {0}")]
    Unavailable(String),

    /// The unit does not expose the requested metric
    #[error("unknown metric '{0}'")]
    UnknownMetric(String),
}

/// Failure reported by a workflow step action
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ActionError {
    /// The action ran but did not succeed
    #[error("{0}")]
    Failed(String),

    /// The action observed the cancellation signal and stopped
    #[error("action cancelled")]
    Cancelled,
}

impl ActionError {
    pub fn failed(message: impl ToString) -> Self {
        ActionError::Failed(message.to_string())
    }
}

/// Errors surfaced by the engine components
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// MetricSource timeout or unavailability for a single unit
    #[error("transient fetch failure for unit '{unit}': {source}")]
    TransientFetch {
        unit: String,
        #[source]
        source: FetchError,
    },

    /// A malformed alert rule; the rule is skipped, other rules still run
    #[error("rule '{rule}' cannot be evaluated: {reason}")]
    RuleEvaluation { rule: String, reason: String },

    /// A workflow step exhausted its retries
    #[error("step '{step}' failed: {reason}")]
    StepExecution { step: String, reason: String },

    /// A workflow execution exceeded its wall-clock budget
    #[error("workflow '{workflow}' exceeded its execution budget of {budget:?}")]
    ExecutionTimeout { workflow: String, budget: Duration },

    /// The optimizer computed a profile that violates its invariants
    #[error("profile invariant violated: {0}")]
    ProfileInvariantViolation(String),

    #[error("workflow '{0}' is not registered")]
    WorkflowNotFound(String),

    #[error("workflow '{0}' is disabled")]
    WorkflowDisabled(String),

    /// The workflow already has a running execution and its policy drops duplicates
    #[error("workflow '{0}' already has a running execution")]
    WorkflowBusy(String),

    /// The profile's concurrency cap is reached
    #[error("execution capacity of {0} concurrent operations reached")]
    CapacityExceeded(usize),

    #[error("workflow id '{0}' is registered twice")]
    DuplicateWorkflow(String),

    #[error("invalid trigger for workflow '{workflow}': {reason}")]
    InvalidTrigger { workflow: String, reason: String },

    /// The actor behind a handle has stopped
    #[error("{0} is not running")]
    ActorUnavailable(&'static str),
}

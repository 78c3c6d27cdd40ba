//! Execution of a single workflow run
//!
//! Steps run strictly in order. Each attempt of a step is bounded by the step timeout,
//! and the execution as a whole by its wall-clock budget:
//!
//! ```text
//! pending ──► running ──┬──► completed   all steps succeeded
//!                       ├──► failed      a step exhausted its retries
//!                       ├──► timed-out   the budget ran out
//!                       └──► cancelled   the session stopped between steps
//! ```
//!
//! ## Known limitation
//!
//! Cancellation is best-effort. When the budget runs out the running step's future is
//! dropped and the execution's cancellation token is signalled, but work an action has
//! handed off elsewhere (spawned tasks, remote calls already in flight) is not guaranteed
//! to stop. Session stop is only observed between steps, never mid-step; a step still
//! running when the shutdown grace ends is aborted by the orchestrator.

use std::time::Duration;

use chrono::Utc;
use tokio::time::{Instant, sleep, sleep_until, timeout};
use tracing::{debug, instrument, warn};

use crate::actions::{Action, ActionContext, ActionRegistry};
use crate::config::{Baselines, OrchestratorConfig};
use crate::error::{ActionError, EngineError};

use super::{ExecutionStatus, StepResult, StepStatus, Workflow, WorkflowExecution, WorkflowStep, recommend};

/// Timeout and retry defaults for steps that do not override them
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepPolicy {
    pub timeout: Duration,
    pub retries: u32,
    pub backoff: Duration,
}

impl StepPolicy {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            timeout: config.step_timeout(),
            retries: config.step_retries,
            backoff: config.retry_backoff(),
        }
    }

    fn timeout_for(&self, step: &WorkflowStep) -> Duration {
        step.timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.timeout)
    }

    fn retries_for(&self, step: &WorkflowStep) -> u32 {
        step.retries.unwrap_or(self.retries)
    }
}

enum StepOutcome {
    Succeeded { attempts: u32, output: Option<String> },
    Failed { attempts: u32, error: String },
    BudgetExceeded { attempts: u32 },
    Cancelled { attempts: u32 },
}

/// Runs executions to completion
#[derive(Debug, Clone)]
pub struct ExecutionRunner {
    registry: ActionRegistry,
    policy: StepPolicy,
    budget: Duration,
    baselines: Baselines,
}

impl ExecutionRunner {
    pub fn new(registry: ActionRegistry, config: &OrchestratorConfig) -> Self {
        Self {
            registry,
            policy: StepPolicy::from_config(config),
            budget: config.execution_budget(),
            baselines: config.baselines,
        }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Drive `execution` through all steps of `workflow`
    ///
    /// Never fails: every outcome is recorded on the returned execution.
    #[instrument(skip_all, fields(workflow = %workflow.id, execution = %execution.execution_id))]
    pub async fn run(
        &self,
        workflow: &Workflow,
        mut execution: WorkflowExecution,
        ctx: ActionContext,
    ) -> WorkflowExecution {
        let budget = workflow.budget().unwrap_or(self.budget);
        let deadline = Instant::now() + budget;

        execution.status = ExecutionStatus::Running;
        debug!("running {} steps within {budget:?}", workflow.steps.len());

        for step in &workflow.steps {
            if ctx.cancel.is_cancelled() {
                debug!("cancelled before step {}", step.action);
                execution.status = ExecutionStatus::Cancelled;
                execution.error = Some(format!("cancelled before step {}", step.action));
                break;
            }

            let Some(action) = self.registry.resolve(&step.action) else {
                let error = EngineError::StepExecution {
                    step: step.action.clone(),
                    reason: "action is not registered".to_string(),
                };
                warn!("{error}");
                execution.step_results.push(StepResult {
                    action: step.action.clone(),
                    status: StepStatus::Failed,
                    attempts: 0,
                    output: None,
                    error: Some(error.to_string()),
                });
                fail(&mut execution, step, error);
                break;
            };

            match self.run_step(step, action.as_ref(), &ctx, deadline).await {
                StepOutcome::Succeeded { attempts, output } => {
                    execution.steps_completed += 1;
                    execution.step_results.push(StepResult {
                        action: step.action.clone(),
                        status: StepStatus::Succeeded,
                        attempts,
                        output,
                        error: None,
                    });
                }
                StepOutcome::Failed { attempts, error } => {
                    let error = EngineError::StepExecution {
                        step: step.action.clone(),
                        reason: error,
                    };
                    warn!("{error}");
                    execution.step_results.push(StepResult {
                        action: step.action.clone(),
                        status: StepStatus::Failed,
                        attempts,
                        output: None,
                        error: Some(error.to_string()),
                    });
                    fail(&mut execution, step, error);
                    break;
                }
                StepOutcome::BudgetExceeded { attempts } => {
                    let error = EngineError::ExecutionTimeout {
                        workflow: workflow.id.clone(),
                        budget,
                    };
                    warn!("{error}; abandoning step {}", step.action);
                    ctx.cancel.cancel();
                    execution.step_results.push(StepResult {
                        action: step.action.clone(),
                        status: StepStatus::Abandoned,
                        attempts,
                        output: None,
                        error: Some(error.to_string()),
                    });
                    execution.status = ExecutionStatus::TimedOut;
                    execution.error = Some(error.to_string());
                    break;
                }
                StepOutcome::Cancelled { attempts } => {
                    execution.step_results.push(StepResult {
                        action: step.action.clone(),
                        status: StepStatus::Cancelled,
                        attempts,
                        output: None,
                        error: Some(ActionError::Cancelled.to_string()),
                    });
                    execution.status = ExecutionStatus::Cancelled;
                    execution.error = Some(format!("cancelled during step {}", step.action));
                    break;
                }
            }
        }

        if execution.status == ExecutionStatus::Running {
            execution.status = ExecutionStatus::Completed;
            execution.recommendations = recommend::for_success(
                ctx.snapshot.as_deref(),
                ctx.alert.as_ref(),
                &self.baselines,
            );
        }

        execution.finished_at = Some(Utc::now());
        debug!(
            "finished as {:?} after {}/{} steps",
            execution.status, execution.steps_completed, execution.steps_expected
        );
        execution
    }

    async fn run_step(
        &self,
        step: &WorkflowStep,
        action: &dyn Action,
        ctx: &ActionContext,
        deadline: Instant,
    ) -> StepOutcome {
        let step_timeout = self.policy.timeout_for(step);
        let retries = self.policy.retries_for(step);

        let mut attempts = 0;
        loop {
            attempts += 1;

            let mut attempt_ctx = ctx.clone();
            attempt_ctx.step = step.action.clone();
            attempt_ctx.attempt = attempts;

            let result = tokio::select! {
                biased;
                _ = sleep_until(deadline) => return StepOutcome::BudgetExceeded { attempts },
                result = timeout(step_timeout, action.run(&attempt_ctx)) => result,
            };

            let error = match result {
                Ok(Ok(output)) => {
                    return StepOutcome::Succeeded {
                        attempts,
                        output: output.message,
                    };
                }
                Ok(Err(ActionError::Cancelled)) if ctx.cancel.is_cancelled() => {
                    return StepOutcome::Cancelled { attempts };
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("timed out after {step_timeout:?}"),
            };

            if attempts > retries {
                return StepOutcome::Failed { attempts, error };
            }

            warn!(
                "step {} attempt {attempts} failed: {error}; retrying in {:?}",
                step.action, self.policy.backoff
            );

            tokio::select! {
                biased;
                _ = sleep_until(deadline) => return StepOutcome::BudgetExceeded { attempts },
                _ = ctx.cancel.cancelled() => return StepOutcome::Cancelled { attempts },
                _ = sleep(self.policy.backoff) => {}
            }
        }
    }
}

fn fail(execution: &mut WorkflowExecution, step: &WorkflowStep, error: EngineError) {
    execution.status = ExecutionStatus::Failed;
    execution.error = Some(error.to_string());
    execution.recommendations = vec![recommend::for_failed_step(&step.action)];
}

//! Workflow step actions
//!
//! A workflow step names an action; the [`ActionRegistry`] resolves that name to the
//! behaviour behind it. Actions should be idempotent: a step may run more than once when
//! it is retried.

pub mod builtin;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::alerts::Alert;
use crate::config::Webhook;
use crate::error::ActionError;
use crate::monitors::MonitoringSnapshot;
use crate::workflows::TriggerKind;

/// Everything an action gets to see about the execution it runs in
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub workflow_id: String,
    pub execution_id: Uuid,
    pub session_id: Uuid,
    /// Name of the step being run
    pub step: String,
    /// 1 for the first attempt of a step
    pub attempt: u32,
    pub trigger: TriggerKind,
    /// Snapshot current when the execution was triggered
    pub snapshot: Option<Arc<MonitoringSnapshot>>,
    /// The alert that triggered the execution, if any
    pub alert: Option<Alert>,
    /// Caller supplied parameters of a manual execution
    pub params: serde_json::Value,
    /// Signalled on session stop and when the execution budget runs out
    pub cancel: CancellationToken,
}

/// Result of a successful action
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionOutput {
    pub message: Option<String>,
}

impl ActionOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }
}

#[async_trait]
pub trait Action: Send + Sync {
    async fn run(&self, ctx: &ActionContext) -> Result<ActionOutput, ActionError>;
}

/// Adapter for actions written as async closures, see [`action_fn`]
pub struct FnAction<F>(F);

/// Wrap an async closure taking an owned [`ActionContext`] as an [`Action`]
pub fn action_fn<F, Fut>(f: F) -> FnAction<F>
where
    F: Fn(ActionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ActionOutput, ActionError>> + Send,
{
    FnAction(f)
}

#[async_trait]
impl<F, Fut> Action for FnAction<F>
where
    F: Fn(ActionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ActionOutput, ActionError>> + Send,
{
    async fn run(&self, ctx: &ActionContext) -> Result<ActionOutput, ActionError> {
        (self.0)(ctx.clone()).await
    }
}

/// Name to action lookup
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `diagnose`, `collect-report` and `notify`
    pub fn with_builtins(webhook: Option<Webhook>) -> Self {
        let mut registry = Self::new();
        registry.register(builtin::DIAGNOSE, builtin::Diagnose);
        registry.register(builtin::COLLECT_REPORT, builtin::CollectReport);
        registry.register(builtin::NOTIFY, builtin::Notify::new(webhook));
        registry
    }

    /// Register `action` under `name`, returning the action it replaced
    pub fn register(
        &mut self,
        name: impl Into<String>,
        action: impl Action + 'static,
    ) -> Option<Arc<dyn Action>> {
        self.actions.insert(name.into(), Arc::new(action))
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.actions.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
pub(crate) fn test_context() -> ActionContext {
    ActionContext {
        workflow_id: "wf".to_string(),
        execution_id: Uuid::new_v4(),
        session_id: Uuid::new_v4(),
        step: "step".to_string(),
        attempt: 1,
        trigger: TriggerKind::Manual,
        snapshot: None,
        alert: None,
        params: serde_json::Value::Null,
        cancel: CancellationToken::new(),
    }
}

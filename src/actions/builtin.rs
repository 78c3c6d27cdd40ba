use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{info, instrument};

use crate::config::Webhook;
use crate::error::ActionError;

use super::{Action, ActionContext, ActionOutput};

pub const DIAGNOSE: &str = "diagnose";
pub const COLLECT_REPORT: &str = "collect-report";
pub const NOTIFY: &str = "notify";

/// Units listed by [`Diagnose`]
const WORST_UNITS: usize = 3;

/// Summarises the least healthy units of the triggering snapshot
#[derive(Debug, Clone, Copy, Default)]
pub struct Diagnose;

#[async_trait]
impl Action for Diagnose {
    #[instrument(skip_all, fields(workflow = %ctx.workflow_id))]
    async fn run(&self, ctx: &ActionContext) -> Result<ActionOutput, ActionError> {
        let Some(snapshot) = &ctx.snapshot else {
            return Ok(ActionOutput::message("no snapshot available to diagnose"));
        };

        let mut units: Vec<_> = snapshot.units.iter().collect();
        units.sort_by(|(_, a), (_, b)| a.score.total_cmp(&b.score));

        let worst = units
            .iter()
            .take(WORST_UNITS)
            .map(|(id, health)| {
                if health.degraded {
                    format!("{id} ({:.2}, degraded)", health.score)
                } else {
                    format!("{id} ({:.2})", health.score)
                }
            })
            .collect::<Vec<_>>();

        let message = if worst.is_empty() {
            format!(
                "overall health {:.2}; no active units",
                snapshot.overall_health
            )
        } else {
            format!(
                "overall health {:.2}; worst units: {}",
                snapshot.overall_health,
                worst.join(", ")
            )
        };

        info!("{message}");
        Ok(ActionOutput::message(message))
    }
}

/// Condenses the triggering alert and snapshot into a single report line
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectReport;

#[async_trait]
impl Action for CollectReport {
    #[instrument(skip_all, fields(workflow = %ctx.workflow_id))]
    async fn run(&self, ctx: &ActionContext) -> Result<ActionOutput, ActionError> {
        let mut parts = vec![format!("workflow {}", ctx.workflow_id)];

        if let Some(snapshot) = &ctx.snapshot {
            parts.push(format!(
                "tick {} with {} active units at overall health {:.2}",
                snapshot.sequence,
                snapshot.units.len(),
                snapshot.overall_health
            ));
            let degraded = snapshot.degraded_units().collect::<Vec<_>>();
            if !degraded.is_empty() {
                parts.push(format!("degraded: {}", degraded.join(", ")));
            }
        }

        if let Some(alert) = &ctx.alert {
            parts.push(format!(
                "{} {} alert on {}: {}",
                alert.severity, alert.alert_type, alert.unit_id, alert.message
            ));
        }

        let report = parts.join("; ");
        info!("report: {report}");
        Ok(ActionOutput::message(report))
    }
}

/// Logs the triggering event and posts it to a webhook when one is configured
#[derive(Debug, Clone)]
pub struct Notify {
    webhook: Option<Webhook>,
    #[cfg(feature = "http")]
    client: reqwest::Client,
}

impl Notify {
    pub fn new(webhook: Option<Webhook>) -> Self {
        Self {
            webhook,
            #[cfg(feature = "http")]
            client: reqwest::Client::new(),
        }
    }

    fn format_message(ctx: &ActionContext) -> String {
        match (&ctx.alert, &ctx.snapshot) {
            (Some(alert), _) => format!(
                "[{}] {} alert on {}: {}",
                alert.severity, alert.alert_type, alert.unit_id, alert.message
            ),
            (None, Some(snapshot)) => format!(
                "workflow {} ran at overall health {:.2}",
                ctx.workflow_id, snapshot.overall_health
            ),
            (None, None) => format!("workflow {} ran", ctx.workflow_id),
        }
    }

    #[cfg(feature = "http")]
    async fn send_webhook(&self, webhook: &Webhook, payload: serde_json::Value) -> Result<(), ActionError> {
        let response = self
            .client
            .post(&webhook.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ActionError::failed(format!("failed to send webhook: {e}")))?;

        if !response.status().is_success() {
            return Err(ActionError::failed(format!(
                "webhook failed with status: {}",
                response.status()
            )));
        }

        info!("successfully sent webhook notification");
        Ok(())
    }

    #[cfg(not(feature = "http"))]
    async fn send_webhook(&self, webhook: &Webhook, _payload: serde_json::Value) -> Result<(), ActionError> {
        tracing::warn!("not posting to {}: built without the http feature", webhook.url);
        Ok(())
    }
}

#[async_trait]
impl Action for Notify {
    #[instrument(skip_all, fields(workflow = %ctx.workflow_id))]
    async fn run(&self, ctx: &ActionContext) -> Result<ActionOutput, ActionError> {
        let message = Self::format_message(ctx);
        info!("{message}");

        let Some(webhook) = &self.webhook else {
            return Ok(ActionOutput::message(message));
        };

        let payload = json!({
            "message": message,
            "workflow": ctx.workflow_id,
            "execution": ctx.execution_id,
            "unit": ctx.alert.as_ref().map(|a| a.unit_id.clone()),
            "severity": ctx.alert.as_ref().map(|a| a.severity),
            "timestamp": Utc::now().to_rfc3339()
        });

        tokio::select! {
            _ = ctx.cancel.cancelled() => Err(ActionError::Cancelled),
            sent = self.send_webhook(webhook, payload) => sent.map(|()| ActionOutput::message(message)),
        }
    }
}

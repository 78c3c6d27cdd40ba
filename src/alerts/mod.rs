//! Alerts
//!
//! Threshold rules turn raw snapshot values into [`Alert`] records. An alert is keyed by
//! `(alert_type, unit_id)`: while one is unresolved, repeat firings refresh it instead of
//! creating a new record, and a higher severity escalates it in place.

pub mod evaluator;
pub mod rules;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::MetricValue;

pub use evaluator::AlertEvaluator;
pub use rules::{AlertRule, BreachEvaluation, BreachTracker, Comparator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Open,
    Acknowledged,
    Resolved,
}

/// A stateful record of a threshold breach
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub alert_type: String,
    pub severity: Severity,
    pub message: String,
    pub unit_id: String,
    /// Last time the breach was observed
    pub timestamp: DateTime<Utc>,
    pub raised_at: DateTime<Utc>,
    /// Timestamp of the snapshot that last updated this alert
    pub snapshot_at: DateTime<Utc>,
    pub value: MetricValue,
    pub threshold: f64,
    pub recovery_actions: Vec<String>,
    pub status: AlertStatus,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    /// Open or acknowledged
    pub fn is_unresolved(&self) -> bool {
        self.status != AlertStatus::Resolved
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Raised,
    Escalated,
    /// The breach cleared and the cooldown elapsed
    Resolved,
    /// Closed because its last breach fell outside the dedup window, not a recovery.
    /// A fresh alert for the same key follows in the same batch.
    Expired,
}

/// State change of an alert, as emitted by [`AlertEvaluator::evaluate`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertNotification {
    pub kind: NotificationKind,
    pub alert: Alert,
}

impl AlertNotification {
    /// Raised or escalated; the notifications that may start workflows
    pub fn is_trigger(&self) -> bool {
        matches!(
            self.kind,
            NotificationKind::Raised | NotificationKind::Escalated
        )
    }
}

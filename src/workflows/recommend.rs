//! Recommendations attached to finished executions
//!
//! A successful execution compares the data that triggered it against healthy baselines
//! and phrases every deviation as advice. A failed execution gets a single pointer at the
//! step that failed.

use crate::alerts::Alert;
use crate::config::Baselines;
use crate::monitors::MonitoringSnapshot;
use crate::{ERROR_RATE, LATENCY_MS, MEMORY_MB};

pub fn for_failed_step(action: &str) -> String {
    format!("address failed step {action} before retrying workflow")
}

/// Recommendations for a successful execution
///
/// When the execution was triggered by an alert only the alert's unit is considered,
/// otherwise every unit of the snapshot.
pub fn for_success(
    snapshot: Option<&MonitoringSnapshot>,
    alert: Option<&Alert>,
    baselines: &Baselines,
) -> Vec<String> {
    let mut recommendations = Vec::new();

    if let Some(snapshot) = snapshot {
        let units = snapshot
            .units
            .iter()
            .filter(|(id, _)| alert.is_none_or(|alert| &alert.unit_id == *id));

        for (unit_id, health) in units {
            if let Some(memory) = snapshot.value(unit_id, MEMORY_MB)
                && memory > baselines.memory_mb
            {
                recommendations.push(format!(
                    "memory usage of {unit_id} exceeds {:.0}MB ({memory:.0}MB): consider clearing caches",
                    baselines.memory_mb
                ));
            }

            if let Some(latency) = snapshot.value(unit_id, LATENCY_MS)
                && latency > baselines.latency_ms
            {
                recommendations.push(format!(
                    "latency of {unit_id} exceeds {:.0}ms ({latency:.0}ms): consider reducing load or scaling out",
                    baselines.latency_ms
                ));
            }

            if let Some(error_rate) = snapshot.value(unit_id, ERROR_RATE)
                && error_rate > baselines.error_rate
            {
                recommendations.push(format!(
                    "error rate of {unit_id} exceeds {:.1}% ({:.1}%): inspect recent failures",
                    baselines.error_rate * 100.0,
                    error_rate * 100.0
                ));
            }

            if health.degraded {
                recommendations.push(format!(
                    "{unit_id} did not answer its last metric fetch: check that it is reachable"
                ));
            } else if health.score < baselines.health {
                recommendations.push(format!(
                    "health of {unit_id} is {:.2}, below {:.2}: review its degraded signals",
                    health.score, baselines.health
                ));
            }
        }

        if alert.is_none() && !snapshot.units.is_empty() && snapshot.overall_health < baselines.health {
            recommendations.push(format!(
                "overall health is {:.2}, below {:.2}: prioritise the least healthy units",
                snapshot.overall_health, baselines.health
            ));
        }
    }

    if recommendations.is_empty() {
        if let Some(alert) = alert {
            recommendations.push(format!(
                "{} on {} is back within baselines: monitor for recurrence",
                alert.alert_type, alert.unit_id
            ));
        } else {
            recommendations.push("all observed metrics are within healthy baselines".to_string());
        }
    }

    recommendations
}

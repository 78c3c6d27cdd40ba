//! Health scoring
//!
//! A unit's health is a weighted combination of normalised memory, latency and error
//! rate signals. Each signal maps `0 → 1.0` (healthy) and `ceiling → 0.0` (unhealthy),
//! linearly in between. Signals the unit did not report are left out and the remaining
//! weights are renormalised.

use std::collections::BTreeMap;

use crate::config::{HealthCeilings, HealthWeights};
use crate::{ERROR_RATE, LATENCY_MS, MEMORY_MB, MetricValue};

fn normalise(value: MetricValue, ceiling: f64) -> Option<f64> {
    if ceiling <= 0.0 || !value.is_finite() {
        return None;
    }
    Some(1.0 - (value / ceiling).clamp(0.0, 1.0))
}

/// Health score in `0.0..=1.0` for one unit's current raw values
pub fn unit_health(
    values: &BTreeMap<String, MetricValue>,
    weights: &HealthWeights,
    ceilings: &HealthCeilings,
) -> f64 {
    let signals = [
        (MEMORY_MB, weights.memory, ceilings.memory_mb),
        (LATENCY_MS, weights.latency, ceilings.latency_ms),
        (ERROR_RATE, weights.errors, ceilings.error_rate),
    ];

    let mut weighted = 0.0;
    let mut total_weight = 0.0;

    for (metric, weight, ceiling) in signals {
        if weight <= 0.0 {
            continue;
        }
        let Some(signal) = values.get(metric).and_then(|v| normalise(*v, ceiling)) else {
            continue;
        };
        weighted += weight * signal;
        total_weight += weight;
    }

    if total_weight == 0.0 {
        // nothing to judge the unit by
        return 1.0;
    }

    (weighted / total_weight).clamp(0.0, 1.0)
}

/// Score after a failed fetch: decays by `penalty`, floored at 0
pub fn penalise(previous: f64, penalty: f64) -> f64 {
    (previous - penalty).max(0.0)
}

/// Unweighted mean of the given unit scores; 0.0 when there are none
pub fn overall_health(scores: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, count) = scores
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), score| (sum + score, count + 1));

    if count == 0 {
        return 0.0;
    }
    sum / count as f64
}

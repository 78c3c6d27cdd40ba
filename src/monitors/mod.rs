//! Monitored units, snapshots and the pure parts of the monitor tick
//!
//! The polling loop itself lives in [`crate::actors::monitor`]; this module holds the
//! data it produces and the scoring/history helpers it uses.

pub mod health;
pub mod history;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::MetricValue;

pub use history::{MetricHistory, MetricSample};

/// One instance of a subsystem being observed
///
/// Units are never removed; an inactive unit stays queryable for trends but is left
/// out of live health aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredUnit {
    pub id: String,
    pub kind: String,
    pub is_active: bool,
    /// Last successful fetch
    pub last_seen: Option<DateTime<Utc>>,
}

impl MonitoredUnit {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            is_active: true,
            last_seen: None,
        }
    }
}

/// Health of one unit within a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitHealth {
    pub score: f64,
    /// The fetch for this tick failed; the score is a decayed previous value
    pub degraded: bool,
}

/// Point-in-time aggregate across all active units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringSnapshot {
    /// Tick number, starting at 1
    pub sequence: u64,
    /// Strictly increasing across ticks
    pub timestamp: DateTime<Utc>,
    pub units: BTreeMap<String, UnitHealth>,
    /// Unweighted mean of the active units' scores
    pub overall_health: f64,
    /// Raw values fetched this tick, per unit then metric
    pub values: BTreeMap<String, BTreeMap<String, MetricValue>>,
}

impl MonitoringSnapshot {
    pub fn value(&self, unit_id: &str, metric: &str) -> Option<MetricValue> {
        self.values
            .get(unit_id)
            .and_then(|metrics| metrics.get(metric))
            .copied()
    }

    pub fn health_of(&self, unit_id: &str) -> Option<f64> {
        self.units.get(unit_id).map(|u| u.score)
    }

    pub fn degraded_units(&self) -> impl Iterator<Item = &str> {
        self.units
            .iter()
            .filter(|(_, health)| health.degraded)
            .map(|(id, _)| id.as_str())
    }
}

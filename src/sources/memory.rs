//! In-memory metric source
//!
//! Holds the current value of every `(unit, metric)` pair and lets callers inject
//! failures. Useful for demos, replaying recorded values and testing the engine without
//! a control plane.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::trace;

use crate::MetricValue;
use crate::error::FetchError;

use super::MetricSource;

/// How a unit currently answers fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnitBehavior {
    /// Answer from the stored values
    #[default]
    Healthy,
    /// Fail every fetch immediately
    Failing,
    /// Never answer (exercise the fetch timeout)
    Hanging,
}

#[derive(Debug, Default)]
struct State {
    values: HashMap<(String, String), MetricValue>,
    behavior: HashMap<String, UnitBehavior>,
    fetches: usize,
}

/// Metric source backed by a shared map; clones share state
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    state: Arc<RwLock<State>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the value returned for `metric` of `unit`
    pub fn set(&self, unit: &str, metric: &str, value: MetricValue) {
        self.state
            .write()
            .values
            .insert((unit.to_string(), metric.to_string()), value);
    }

    /// Set several metrics of one unit at once
    pub fn set_all<'a>(&self, unit: &str, values: impl IntoIterator<Item = (&'a str, MetricValue)>) {
        let mut state = self.state.write();
        for (metric, value) in values {
            state
                .values
                .insert((unit.to_string(), metric.to_string()), value);
        }
    }

    pub fn set_behavior(&self, unit: &str, behavior: UnitBehavior) {
        self.state
            .write()
            .behavior
            .insert(unit.to_string(), behavior);
    }

    /// Total number of fetches answered or failed so far
    pub fn fetch_count(&self) -> usize {
        self.state.read().fetches
    }
}

#[async_trait]
impl MetricSource for MemorySource {
    async fn fetch(
        &self,
        unit_id: &str,
        metric: &str,
        _timeout: Duration,
    ) -> Result<MetricValue, FetchError> {
        let (behavior, value) = {
            let mut state = self.state.write();
            state.fetches += 1;
            let behavior = state.behavior.get(unit_id).copied().unwrap_or_default();
            let value = state
                .values
                .get(&(unit_id.to_string(), metric.to_string()))
                .copied();
            (behavior, value)
        };

        trace!("memory source: {unit_id}/{metric} -> {behavior:?} {value:?}");

        match behavior {
            UnitBehavior::Healthy => value.ok_or_else(|| FetchError::UnknownMetric(metric.to_string())),
            UnitBehavior::Failing => Err(FetchError::Unavailable(format!("unit '{unit_id}' is failing"))),
            UnitBehavior::Hanging => futures::future::pending().await,
        }
    }
}

//! Bounded per-unit metric history
//!
//! Every `(unit, metric)` pair gets its own ring buffer. Samples are evicted when the
//! buffer is full (oldest first) or when they are older than the profile's cache TTL.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::MetricValue;

/// One immutable reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub unit_id: String,
    pub metric: String,
    pub value: MetricValue,
    pub timestamp: DateTime<Utc>,
}

/// Ring buffers of recent samples, keyed by unit then metric
#[derive(Debug, Clone)]
pub struct MetricHistory {
    capacity: usize,
    buffers: BTreeMap<String, BTreeMap<String, VecDeque<MetricSample>>>,
}

impl MetricHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            buffers: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, sample: MetricSample) {
        let capacity = self.capacity;
        let buffer = self
            .buffers
            .entry(sample.unit_id.clone())
            .or_default()
            .entry(sample.metric.clone())
            .or_insert_with(|| VecDeque::with_capacity(capacity));

        if buffer.len() >= capacity {
            buffer.pop_front();
        }
        buffer.push_back(sample);
    }

    /// Drop samples older than `ttl` relative to `now`; returns how many were evicted
    pub fn evict_older_than(&mut self, ttl: Duration, now: DateTime<Utc>) -> usize {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return 0;
        };
        let cutoff = now - ttl;

        let mut evicted = 0;
        for metrics in self.buffers.values_mut() {
            for buffer in metrics.values_mut() {
                while buffer.front().is_some_and(|s| s.timestamp < cutoff) {
                    buffer.pop_front();
                    evicted += 1;
                }
            }
        }
        evicted
    }

    /// Samples of one metric, oldest first
    pub fn samples(&self, unit_id: &str, metric: &str) -> Vec<MetricSample> {
        self.buffers
            .get(unit_id)
            .and_then(|metrics| metrics.get(metric))
            .map(|buffer| buffer.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn latest(&self, unit_id: &str, metric: &str) -> Option<&MetricSample> {
        self.buffers
            .get(unit_id)
            .and_then(|metrics| metrics.get(metric))
            .and_then(|buffer| buffer.back())
    }

    /// Total samples retained across all buffers
    pub fn len(&self) -> usize {
        self.buffers
            .values()
            .flat_map(|metrics| metrics.values())
            .map(VecDeque::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

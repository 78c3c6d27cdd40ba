//! Performance optimizer
//!
//! Keeps the engine under its overhead budget by moving the shared profile along the
//! tier ladder:
//!
//! ```text
//!            over budget             over budget
//! comprehensive ──────► balanced ──────────► minimal
//!               ◄──────          ◄──────────
//!           comfortable streak     comfortable streak
//! ```
//!
//! Transitions move one tier at a time, and after each transition a dwell time blocks the
//! next one.

pub mod overhead;

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, trace};

use crate::config::OptimizerConfig;
use crate::profile::{OptimizationProfile, ProfileName, ProfilePublisher, ProfileReader};

pub use overhead::{OverheadMeasurement, OverheadProbe, ProcessProbe};

/// A published profile transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileChange {
    pub from: ProfileName,
    pub to: ProfileName,
    pub reason: String,
    pub at: DateTime<Utc>,
    /// Version of the newly published profile
    pub version: u64,
}

/// Rolling averages of the measurement window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverheadAverages {
    pub memory_delta_mb: f64,
    pub cpu_percent: f64,
    pub tick_latency_ms: f64,
}

#[derive(Debug)]
pub struct PerformanceOptimizer {
    config: OptimizerConfig,
    window: VecDeque<OverheadMeasurement>,
    publisher: ProfilePublisher,
    last_transition: Option<Instant>,
    comfortable_streak: usize,
}

impl PerformanceOptimizer {
    pub fn new(config: OptimizerConfig, publisher: ProfilePublisher) -> Self {
        Self {
            window: VecDeque::with_capacity(config.window.max(1)),
            config,
            publisher,
            last_transition: None,
            comfortable_streak: 0,
        }
    }

    pub fn record_overhead(&mut self, sample: OverheadMeasurement) {
        if self.window.len() >= self.config.window.max(1) {
            self.window.pop_front();
        }
        self.window.push_back(sample);
    }

    pub fn current_profile(&self) -> OptimizationProfile {
        self.publisher.current()
    }

    pub fn reader(&self) -> ProfileReader {
        self.publisher.reader()
    }

    pub fn averages(&self) -> Option<OverheadAverages> {
        if self.window.is_empty() {
            return None;
        }
        let n = self.window.len() as f64;
        let sum = |f: fn(&OverheadMeasurement) -> f64| self.window.iter().map(f).sum::<f64>() / n;

        Some(OverheadAverages {
            memory_delta_mb: sum(|m| m.memory_delta_mb),
            cpu_percent: sum(|m| m.cpu_percent),
            tick_latency_ms: sum(|m| m.tick_latency_ms),
        })
    }

    fn in_dwell(&self) -> bool {
        self.last_transition
            .is_some_and(|at| at.elapsed() < self.config.dwell())
    }

    /// Dimensions whose average exceeds `budget * ratio`, phrased for logging
    fn exceeded(&self, averages: &OverheadAverages, ratio: f64) -> Vec<String> {
        let budget = &self.config.budget;
        let dimensions = [
            ("memory", averages.memory_delta_mb, budget.memory_mb, "MB"),
            ("cpu", averages.cpu_percent, budget.cpu_percent, "%"),
            ("tick latency", averages.tick_latency_ms, budget.latency_ms, "ms"),
        ];

        dimensions
            .into_iter()
            .filter(|(_, average, limit, _)| *average > limit * ratio)
            .map(|(name, average, limit, unit)| {
                format!("{name} averages {average:.1}{unit} (budget {limit}{unit})")
            })
            .collect()
    }

    /// Compare the rolling averages against the budget and move one tier if warranted
    #[instrument(skip(self))]
    pub fn evaluate_and_adjust(&mut self) -> Option<ProfileChange> {
        if !self.config.enabled {
            return None;
        }
        let averages = self.averages()?;
        let current = self.publisher.current().name;

        let over_budget = self.exceeded(&averages, 1.0);
        if !over_budget.is_empty() {
            self.comfortable_streak = 0;
            if self.in_dwell() {
                trace!("over budget but within dwell time");
                return None;
            }
            let to = current.step_down()?;
            return self.transition(current, to, over_budget.join(", "));
        }

        if !self.exceeded(&averages, self.config.comfort_ratio).is_empty() {
            self.comfortable_streak = 0;
            return None;
        }

        self.comfortable_streak += 1;
        if self.comfortable_streak < self.config.step_up_after || self.in_dwell() {
            return None;
        }
        let to = current.step_up()?;
        let reason = format!(
            "overhead below {:.0}% of budget for {} evaluations",
            self.config.comfort_ratio * 100.0,
            self.comfortable_streak
        );
        self.transition(current, to, reason)
    }

    fn transition(
        &mut self,
        from: ProfileName,
        to: ProfileName,
        reason: String,
    ) -> Option<ProfileChange> {
        let profile = self.config.presets.profile(to);

        let published = match self.publisher.publish(profile) {
            Ok(published) => published,
            Err(e) => {
                error!("keeping {from} profile: {e}");
                return None;
            }
        };

        info!("profile {from} -> {to}: {reason}");
        self.last_transition = Some(Instant::now());
        self.comfortable_streak = 0;
        // the new tier is judged on its own measurements
        self.window.clear();
        debug!("published profile version {}", published.version);

        Some(ProfileChange {
            from,
            to,
            reason,
            at: Utc::now(),
            version: published.version,
        })
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::MetricValue;
use crate::error::{EngineError, EngineResult};

use super::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparator {
    #[serde(alias = ">")]
    Gt,
    #[serde(alias = ">=")]
    Gte,
    #[serde(alias = "<")]
    Lt,
    #[serde(alias = "<=")]
    Lte,
}

impl Comparator {
    /// Whether `value` violates `threshold` under this comparator
    pub fn breaches(self, value: MetricValue, threshold: f64) -> bool {
        match self {
            Comparator::Gt => value > threshold,
            Comparator::Gte => value >= threshold,
            Comparator::Lt => value < threshold,
            Comparator::Lte => value <= threshold,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Comparator::Gt => ">",
            Comparator::Gte => ">=",
            Comparator::Lt => "<",
            Comparator::Lte => "<=",
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Declarative threshold rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub metric: String,
    pub comparator: Comparator,
    pub threshold: f64,
    pub severity: Severity,

    /// Action identifiers suggested to whoever handles the alert
    #[serde(default)]
    pub recovery_actions: Vec<String>,

    /// Alert type used for deduplication; defaults to the metric name
    #[serde(default, rename = "type")]
    pub alert_type: Option<String>,

    /// Consecutive breaches tolerated before the rule fires
    #[serde(default)]
    pub grace: Option<usize>,
}

impl AlertRule {
    pub fn new(
        metric: impl Into<String>,
        comparator: Comparator,
        threshold: f64,
        severity: Severity,
    ) -> Self {
        Self {
            metric: metric.into(),
            comparator,
            threshold,
            severity,
            recovery_actions: Vec::new(),
            alert_type: None,
            grace: None,
        }
    }

    pub fn with_recovery_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.recovery_actions = actions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_type(mut self, alert_type: impl Into<String>) -> Self {
        self.alert_type = Some(alert_type.into());
        self
    }

    pub fn with_grace(mut self, grace: usize) -> Self {
        self.grace = Some(grace);
        self
    }

    pub fn alert_type(&self) -> &str {
        self.alert_type.as_deref().unwrap_or(&self.metric)
    }

    /// Human readable form, e.g. `memory_mb > 100`
    pub fn describe(&self) -> String {
        format!("{} {} {}", self.metric, self.comparator, self.threshold)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.metric.trim().is_empty() {
            return Err(EngineError::RuleEvaluation {
                rule: self.describe(),
                reason: "metric name is empty".to_string(),
            });
        }
        if !self.threshold.is_finite() {
            return Err(EngineError::RuleEvaluation {
                rule: self.describe(),
                reason: format!("threshold {} is not a finite number", self.threshold),
            });
        }
        if self.alert_type.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(EngineError::RuleEvaluation {
                rule: self.describe(),
                reason: "alert type is empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Outcome of feeding one observation into a [`BreachTracker`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreachEvaluation {
    /// Not breaching and not firing
    Ok,
    /// Breaching, but still within the rule's grace
    Pending,
    /// This observation made the rule fire
    StartsToBreach,
    /// Firing and still breaching
    Breaching,
    /// Firing, no longer breaching, cooldown not yet over
    Recovering,
    /// Cooldown completed; the rule stopped firing
    BackToOk,
}

/// Breach state of one rule for one unit
#[derive(Debug, Clone, Copy, Default)]
pub struct BreachTracker {
    breaches: usize,
    clears: usize,
    firing: bool,
}

impl BreachTracker {
    pub fn is_firing(&self) -> bool {
        self.firing
    }

    /// Advance the state machine by one snapshot
    ///
    /// `grace` is the number of breaches tolerated before firing, `cooldown` the number of
    /// consecutive clear observations needed to stop firing.
    pub fn observe(&mut self, breached: bool, grace: usize, cooldown: usize) -> BreachEvaluation {
        let evaluation = if breached {
            self.clears = 0;
            self.breaches += 1;

            if self.firing {
                BreachEvaluation::Breaching
            } else if self.breaches > grace {
                self.firing = true;
                BreachEvaluation::StartsToBreach
            } else {
                BreachEvaluation::Pending
            }
        } else {
            self.breaches = 0;

            if !self.firing {
                BreachEvaluation::Ok
            } else {
                self.clears += 1;
                if self.clears >= cooldown.max(1) {
                    self.firing = false;
                    self.clears = 0;
                    BreachEvaluation::BackToOk
                } else {
                    BreachEvaluation::Recovering
                }
            }
        };

        trace!(
            "breaches {}/{grace}, clears {}/{cooldown} -> {evaluation:?}",
            self.breaches, self.clears
        );
        evaluation
    }
}

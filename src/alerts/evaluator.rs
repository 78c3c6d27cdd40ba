use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::MetricValue;
use crate::config::AlertConfig;
use crate::monitors::MonitoringSnapshot;

use super::rules::{AlertRule, BreachEvaluation, BreachTracker};
use super::{Alert, AlertNotification, AlertStatus, NotificationKind};

/// `(alert_type, unit_id)`
type AlertKey = (String, String);

#[derive(Debug, Default)]
struct KeyState {
    /// Some rule of this type is firing, observed this snapshot or not
    firing: bool,
    /// Highest severity rule that breached on this snapshot while firing
    candidate: Option<(usize, MetricValue)>,
}

/// Turns snapshots into alert state changes
///
/// Keeps every alert it ever raised; resolved ones stay queryable.
#[derive(Debug)]
pub struct AlertEvaluator {
    rules: Vec<AlertRule>,
    cooldown: usize,
    dedup_window: chrono::Duration,
    trackers: HashMap<(usize, String), BreachTracker>,
    alerts: Vec<Alert>,
    unresolved: HashMap<AlertKey, usize>,
}

impl AlertEvaluator {
    /// Build an evaluator; malformed rules are logged and skipped
    pub fn new(config: &AlertConfig) -> Self {
        let rules = config
            .rules
            .iter()
            .filter(|rule| match rule.validate() {
                Ok(()) => true,
                Err(e) => {
                    warn!("skipping alert rule: {e}");
                    false
                }
            })
            .cloned()
            .collect();

        let dedup_window = chrono::Duration::from_std(config.dedup_window())
            .unwrap_or_else(|_| chrono::Duration::weeks(52));

        Self {
            rules,
            cooldown: config.cooldown_snapshots,
            dedup_window,
            trackers: HashMap::new(),
            alerts: Vec::new(),
            unresolved: HashMap::new(),
        }
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    /// Apply every rule to every active unit of `snapshot`
    ///
    /// Returns the alerts raised, escalated or resolved by this snapshot. Refreshing the
    /// timestamp of an already open alert is not reported.
    #[instrument(skip_all, fields(tick = snapshot.sequence))]
    pub fn evaluate(&mut self, snapshot: &MonitoringSnapshot) -> Vec<AlertNotification> {
        let now = Utc::now().max(snapshot.timestamp);
        let mut notifications = Vec::new();

        for unit_id in snapshot.units.keys() {
            let mut keys: BTreeMap<String, KeyState> = BTreeMap::new();

            for (index, rule) in self.rules.iter().enumerate() {
                let tracker = self.trackers.entry((index, unit_id.clone())).or_default();
                let state = keys.entry(rule.alert_type().to_string()).or_default();

                let Some(value) = snapshot.value(unit_id, &rule.metric) else {
                    state.firing |= tracker.is_firing();
                    continue;
                };

                let breached = rule.comparator.breaches(value, rule.threshold);
                let evaluation =
                    tracker.observe(breached, rule.grace.unwrap_or_default(), self.cooldown);

                match evaluation {
                    BreachEvaluation::StartsToBreach => {
                        debug!("{unit_id}: {} breached with {value}", rule.describe());
                    }
                    BreachEvaluation::BackToOk => {
                        debug!("{unit_id}: {} is back to normal", rule.describe());
                    }
                    _ => {}
                }

                if !tracker.is_firing() {
                    continue;
                }
                state.firing = true;

                // recovering rules keep the alert open but do not refresh it
                if !breached {
                    continue;
                }

                let higher = match state.candidate {
                    Some((current, _)) => rule.severity > self.rules[current].severity,
                    None => true,
                };
                if higher {
                    state.candidate = Some((index, value));
                }
            }

            for (alert_type, state) in keys {
                let key = (alert_type, unit_id.clone());

                if let Some((rule_index, value)) = state.candidate {
                    self.upsert(key, rule_index, value, snapshot.timestamp, now, &mut notifications);
                } else if !state.firing
                    && let Some(index) = self.unresolved.remove(&key)
                {
                    notifications.push(self.resolve(index, now));
                }
            }
        }

        notifications
    }

    fn upsert(
        &mut self,
        key: AlertKey,
        rule_index: usize,
        value: MetricValue,
        snapshot_at: DateTime<Utc>,
        now: DateTime<Utc>,
        notifications: &mut Vec<AlertNotification>,
    ) {
        let rule = &self.rules[rule_index];

        if let Some(&index) = self.unresolved.get(&key) {
            let alert = &mut self.alerts[index];

            if now - alert.timestamp <= self.dedup_window {
                alert.timestamp = now;
                alert.snapshot_at = snapshot_at;
                alert.value = value;

                if rule.severity > alert.severity {
                    debug!(
                        "escalating alert {} on {} from {} to {}",
                        alert.alert_type, alert.unit_id, alert.severity, rule.severity
                    );
                    alert.severity = rule.severity;
                    alert.threshold = rule.threshold;
                    alert.message = message(rule, &key.1, value);
                    alert.recovery_actions = rule.recovery_actions.clone();
                    notifications.push(AlertNotification {
                        kind: NotificationKind::Escalated,
                        alert: alert.clone(),
                    });
                }
                return;
            }

            // last breach is older than the window: close it and start a fresh record
            self.unresolved.remove(&key);
            let mut expired = self.resolve(index, now);
            expired.kind = NotificationKind::Expired;
            notifications.push(expired);
        }

        let rule = &self.rules[rule_index];
        let alert = Alert {
            id: Uuid::new_v4(),
            alert_type: key.0.clone(),
            severity: rule.severity,
            message: message(rule, &key.1, value),
            unit_id: key.1.clone(),
            timestamp: now,
            raised_at: now,
            snapshot_at,
            value,
            threshold: rule.threshold,
            recovery_actions: rule.recovery_actions.clone(),
            status: AlertStatus::Open,
            resolved_at: None,
        };
        debug!("raising {} alert: {}", alert.severity, alert.message);

        self.unresolved.insert(key, self.alerts.len());
        notifications.push(AlertNotification {
            kind: NotificationKind::Raised,
            alert: alert.clone(),
        });
        self.alerts.push(alert);
    }

    fn resolve(&mut self, index: usize, now: DateTime<Utc>) -> AlertNotification {
        let alert = &mut self.alerts[index];
        alert.status = AlertStatus::Resolved;
        alert.resolved_at = Some(now);
        debug!("resolved alert {} on {}", alert.alert_type, alert.unit_id);

        AlertNotification {
            kind: NotificationKind::Resolved,
            alert: alert.clone(),
        }
    }

    /// Mark an open alert as acknowledged
    ///
    /// Returns `false` for unknown or resolved alerts.
    pub fn acknowledge(&mut self, id: Uuid) -> bool {
        match self.alerts.iter_mut().find(|alert| alert.id == id) {
            Some(alert) if alert.is_unresolved() => {
                alert.status = AlertStatus::Acknowledged;
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, id: Uuid) -> Option<&Alert> {
        self.alerts.iter().find(|alert| alert.id == id)
    }

    /// Every alert raised so far, in creation order
    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }

    /// Open and acknowledged alerts
    pub fn open_alerts(&self) -> Vec<Alert> {
        self.alerts
            .iter()
            .filter(|alert| alert.is_unresolved())
            .cloned()
            .collect()
    }

    pub fn open_count(&self) -> usize {
        self.unresolved.len()
    }

    /// The alert driving workflow triggering for each unit
    ///
    /// Highest severity wins; among equals the earliest raised.
    pub fn highest_per_unit(&self) -> BTreeMap<String, &Alert> {
        let mut highest: BTreeMap<String, &Alert> = BTreeMap::new();

        for alert in self.alerts.iter().filter(|alert| alert.is_unresolved()) {
            let rank = |a: &Alert| (a.severity, Reverse(a.raised_at));
            highest
                .entry(alert.unit_id.clone())
                .and_modify(|current| {
                    if rank(alert) > rank(*current) {
                        *current = alert;
                    }
                })
                .or_insert(alert);
        }

        highest
    }

    pub fn is_highest_for_unit(&self, id: Uuid) -> bool {
        self.get(id).is_some_and(|alert| {
            self.highest_per_unit()
                .get(&alert.unit_id)
                .is_some_and(|top| top.id == id)
        })
    }
}

fn message(rule: &AlertRule, unit_id: &str, value: MetricValue) -> String {
    format!(
        "{} on {unit_id} is {value} ({} {})",
        rule.metric, rule.comparator, rule.threshold
    )
}

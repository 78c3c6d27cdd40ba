//! Monitor actor
//!
//! Polls every registered unit through the injected [`MetricSource`] once per tick and
//! turns the results into a [`MonitoringSnapshot`]:
//!
//! 1. read the current [`OptimizationProfile`] once
//! 2. fetch all units, at most `max_concurrent_operations` at a time, each bounded by the
//!    profile's fetch timeout
//! 3. score every unit; failed fetches decay the previous score and repeated failures
//!    mark the unit inactive
//! 4. hand the snapshot to the [`TickStage`] (alert evaluation, workflow triggers,
//!    overhead accounting), then deliver it to every subscriber
//!
//! The next tick is only scheduled once all of that finished, so ticks never overlap.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::MetricValue;
use crate::config::MonitorConfig;
use crate::error::{EngineError, EngineResult, FetchError};
use crate::events::{EventSink, SubscriptionId, Subscribers};
use crate::monitors::health::{overall_health, penalise, unit_health};
use crate::monitors::{MetricHistory, MetricSample, MonitoredUnit, MonitoringSnapshot, UnitHealth};
use crate::profile::{OptimizationProfile, ProfileReader};
use crate::sources::MetricSource;

use super::messages::{MonitorCommand, SnapshotEvent};

/// Work run on every snapshot before subscribers see it
///
/// `started` is the instant the tick began, for latency accounting.
#[async_trait]
pub trait TickStage: Send {
    async fn after_tick(&mut self, snapshot: &SnapshotEvent, started: Instant);
}

type FetchResult = Result<BTreeMap<String, MetricValue>, FetchError>;

#[derive(Debug)]
struct UnitState {
    unit: MonitoredUnit,
    score: f64,
    failures: usize,
}

impl UnitState {
    fn new(unit: MonitoredUnit) -> Self {
        Self {
            unit,
            score: 1.0,
            failures: 0,
        }
    }
}

/// Everything the monitor actor needs to run
pub struct MonitorSetup {
    pub units: Vec<MonitoredUnit>,
    /// Metric names fetched for every unit
    pub metrics: Vec<String>,
    pub source: Arc<dyn MetricSource>,
    pub profile: ProfileReader,
    pub config: MonitorConfig,
    pub stage: Option<Box<dyn TickStage>>,
}

pub struct MonitorActor {
    units: BTreeMap<String, UnitState>,
    metrics: Vec<String>,
    source: Arc<dyn MetricSource>,
    profile: ProfileReader,
    config: MonitorConfig,
    stage: Option<Box<dyn TickStage>>,
    history: MetricHistory,
    subscribers: Subscribers<SnapshotEvent>,
    sequence: u64,
    last_snapshot: Option<SnapshotEvent>,
    command_rx: mpsc::Receiver<MonitorCommand>,
}

impl MonitorActor {
    fn new(
        setup: MonitorSetup,
        subscribers: Subscribers<SnapshotEvent>,
        command_rx: mpsc::Receiver<MonitorCommand>,
    ) -> Self {
        let units = setup
            .units
            .into_iter()
            .map(|unit| (unit.id.clone(), UnitState::new(unit)))
            .collect();

        Self {
            units,
            metrics: setup.metrics,
            source: setup.source,
            profile: setup.profile,
            history: MetricHistory::new(setup.config.history_capacity),
            config: setup.config,
            stage: setup.stage,
            subscribers,
            sequence: 0,
            last_snapshot: None,
            command_rx,
        }
    }

    fn ticker(period: Duration) -> Interval {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    /// Run the actor's main loop until shutdown or until every handle is dropped
    #[instrument(skip(self), fields(units = self.units.len()))]
    pub async fn run(mut self) {
        debug!("starting monitor actor");

        let mut poll_interval = self.profile.current().poll_interval();
        let mut ticker = Self::ticker(poll_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;

                    // picked up by the next tick, never the running one
                    let next = self.profile.current().poll_interval();
                    if next != poll_interval {
                        debug!("poll interval {poll_interval:?} -> {next:?}");
                        poll_interval = next;
                        ticker = Self::ticker(poll_interval);
                    }
                }

                cmd = self.command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        debug!("all monitor handles dropped, shutting down");
                        break;
                    };

                    match cmd {
                        MonitorCommand::TickNow { respond_to } => {
                            let snapshot = self.tick().await;
                            let _ = respond_to.send(snapshot);
                        }

                        MonitorCommand::RegisterUnit { unit, respond_to } => {
                            let added = !self.units.contains_key(&unit.id);
                            if added {
                                debug!("registered unit {}", unit.id);
                                self.units.insert(unit.id.clone(), UnitState::new(unit));
                            }
                            let _ = respond_to.send(added);
                        }

                        MonitorCommand::Units { respond_to } => {
                            let units = self.units.values().map(|s| s.unit.clone()).collect();
                            let _ = respond_to.send(units);
                        }

                        MonitorCommand::History { unit_id, metric, respond_to } => {
                            let _ = respond_to.send(self.history.samples(&unit_id, &metric));
                        }

                        MonitorCommand::LastSnapshot { respond_to } => {
                            let _ = respond_to.send(self.last_snapshot.clone());
                        }

                        MonitorCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }
            }
        }

        debug!("monitor actor stopped");
    }

    /// One full tick; `None` when the tick had to be skipped
    async fn tick(&mut self) -> Option<SnapshotEvent> {
        let started = Instant::now();
        let profile = self.profile.current();

        let results = fetch_all(
            self.source.as_ref(),
            self.units.keys().cloned().collect(),
            &self.metrics,
            profile.fetch_timeout(self.config.max_fetch_timeout()),
            profile.max_concurrent_operations,
        )
        .await;

        let aggregated =
            std::panic::catch_unwind(AssertUnwindSafe(|| self.aggregate(results, &profile)));
        let snapshot = match aggregated {
            Ok(snapshot) => Arc::new(snapshot),
            Err(_) => {
                error!("snapshot aggregation panicked, skipping tick");
                return None;
            }
        };

        trace!(
            "tick {}: {} units, overall health {:.3}",
            snapshot.sequence,
            snapshot.units.len(),
            snapshot.overall_health
        );

        if let Some(stage) = self.stage.as_mut() {
            stage.after_tick(&snapshot, started).await;
        }

        self.subscribers
            .publish(&snapshot, self.config.subscriber_grace())
            .await;

        self.last_snapshot = Some(snapshot.clone());
        Some(snapshot)
    }

    fn aggregate(
        &mut self,
        results: Vec<(String, FetchResult)>,
        profile: &OptimizationProfile,
    ) -> MonitoringSnapshot {
        let timestamp = self.next_timestamp();
        let mut units = BTreeMap::new();
        let mut values = BTreeMap::new();

        for (unit_id, result) in results {
            let Some(state) = self.units.get_mut(&unit_id) else {
                continue;
            };

            match result {
                Ok(fetched) => {
                    if !state.unit.is_active {
                        info!("unit {unit_id} answered again, reactivating");
                        state.unit.is_active = true;
                    }
                    state.failures = 0;
                    state.unit.last_seen = Some(timestamp);
                    state.score = unit_health(&fetched, &self.config.weights, &self.config.ceilings);

                    for (metric, value) in &fetched {
                        self.history.record(MetricSample {
                            unit_id: unit_id.clone(),
                            metric: metric.clone(),
                            value: *value,
                            timestamp,
                        });
                    }

                    units.insert(
                        unit_id.clone(),
                        UnitHealth {
                            score: state.score,
                            degraded: false,
                        },
                    );
                    values.insert(unit_id, fetched);
                }
                Err(source) => {
                    let error = EngineError::TransientFetch {
                        unit: unit_id.clone(),
                        source,
                    };
                    debug!("{error}");

                    state.failures += 1;
                    state.score = penalise(state.score, self.config.failure_penalty);

                    if state.unit.is_active && state.failures >= self.config.inactive_after {
                        warn!(
                            "unit {unit_id} failed {} consecutive fetches, marking inactive",
                            state.failures
                        );
                        state.unit.is_active = false;
                    }

                    if state.unit.is_active {
                        units.insert(
                            unit_id,
                            UnitHealth {
                                score: state.score,
                                degraded: true,
                            },
                        );
                    }
                }
            }
        }

        let evicted = self.history.evict_older_than(profile.cache_ttl(), timestamp);
        if evicted > 0 {
            trace!("evicted {evicted} samples past {:?}", profile.cache_ttl());
        }

        self.sequence += 1;
        MonitoringSnapshot {
            sequence: self.sequence,
            timestamp,
            overall_health: overall_health(units.values().map(|u: &UnitHealth| u.score)),
            units,
            values,
        }
    }

    /// Wall-clock time, nudged forward so that snapshot timestamps strictly increase
    fn next_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now();
        match &self.last_snapshot {
            Some(last) if now <= last.timestamp => last.timestamp + chrono::Duration::milliseconds(1),
            _ => now,
        }
    }
}

/// Fetch all units, at most `concurrency` at a time
async fn fetch_all(
    source: &dyn MetricSource,
    unit_ids: Vec<String>,
    metrics: &[String],
    timeout: Duration,
    concurrency: usize,
) -> Vec<(String, FetchResult)> {
    futures::stream::iter(unit_ids)
        .map(|unit_id| async move {
            let result = fetch_unit(source, &unit_id, metrics, timeout).await;
            (unit_id, result)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await
}

/// Fetch every metric of one unit within `timeout`
///
/// Metrics the unit does not expose are left out. Any other failure fails the unit, as
/// does a unit that exposes none of the requested metrics.
async fn fetch_unit(
    source: &dyn MetricSource,
    unit_id: &str,
    metrics: &[String],
    timeout: Duration,
) -> FetchResult {
    let fetches = metrics.iter().map(|metric| async move {
        (metric, source.fetch(unit_id, metric, timeout).await)
    });

    let Ok(results) = tokio::time::timeout(timeout, futures::future::join_all(fetches)).await else {
        return Err(FetchError::Timeout(timeout));
    };

    let mut values = BTreeMap::new();
    for (metric, result) in results {
        match result {
            Ok(value) if value.is_finite() => {
                values.insert(metric.clone(), value);
            }
            Ok(value) => trace!("{unit_id}/{metric}: ignoring non-finite value {value}"),
            Err(FetchError::UnknownMetric(_)) => trace!("{unit_id} does not expose {metric}"),
            Err(e) => return Err(e),
        }
    }

    if values.is_empty() && !metrics.is_empty() {
        return Err(FetchError::Unavailable(format!(
            "unit '{unit_id}' reported none of the requested metrics"
        )));
    }
    Ok(values)
}

/// Handle for interacting with the monitor actor
#[derive(Clone)]
pub struct MonitorHandle {
    sender: mpsc::Sender<MonitorCommand>,
    subscribers: Subscribers<SnapshotEvent>,
}

impl MonitorHandle {
    /// Spawn the monitor actor and return a handle to it
    pub fn spawn(setup: MonitorSetup) -> Self {
        let (sender, receiver) = mpsc::channel(32);
        let subscribers = Subscribers::new("snapshots");

        let actor = MonitorActor::new(setup, subscribers.clone(), receiver);
        tokio::spawn(actor.run());

        Self {
            sender,
            subscribers,
        }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> MonitorCommand,
    ) -> EngineResult<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(command(tx))
            .await
            .map_err(|_| EngineError::ActorUnavailable("monitor"))?;
        rx.await.map_err(|_| EngineError::ActorUnavailable("monitor"))
    }

    /// Run a tick immediately and return its snapshot
    pub async fn tick_now(&self) -> EngineResult<Option<SnapshotEvent>> {
        self.request(|respond_to| MonitorCommand::TickNow { respond_to })
            .await
    }

    /// Add a unit; returns `false` if a unit with that id is already monitored
    pub async fn register_unit(&self, unit: MonitoredUnit) -> EngineResult<bool> {
        self.request(|respond_to| MonitorCommand::RegisterUnit { unit, respond_to })
            .await
    }

    pub async fn units(&self) -> EngineResult<Vec<MonitoredUnit>> {
        self.request(|respond_to| MonitorCommand::Units { respond_to })
            .await
    }

    pub async fn history(&self, unit_id: &str, metric: &str) -> EngineResult<Vec<MetricSample>> {
        self.request(|respond_to| MonitorCommand::History {
            unit_id: unit_id.to_string(),
            metric: metric.to_string(),
            respond_to,
        })
        .await
    }

    pub async fn last_snapshot(&self) -> EngineResult<Option<SnapshotEvent>> {
        self.request(|respond_to| MonitorCommand::LastSnapshot { respond_to })
            .await
    }

    pub async fn subscribe(&self, sink: impl EventSink<SnapshotEvent> + 'static) -> SubscriptionId {
        self.subscribers.subscribe(sink).await
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id).await
    }

    /// Whether the actor is still running
    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }

    pub async fn shutdown(&self) -> EngineResult<()> {
        self.sender
            .send(MonitorCommand::Shutdown)
            .await
            .map_err(|_| EngineError::ActorUnavailable("monitor"))
    }
}

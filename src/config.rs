use std::time::Duration;

use anyhow::Context;
use tracing::trace;

use crate::alerts::AlertRule;
use crate::profile::{ProfileName, ProfilePresets};
use crate::workflows::Workflow;
use crate::{ERROR_RATE, LATENCY_MS, MEMORY_MB};

/// Engine configuration, read from a JSON file
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub units: Vec<UnitConfig>,

    /// Metric names fetched for every unit on each tick
    #[serde(default = "default_metrics")]
    pub metrics: Vec<String>,

    /// Initial optimization profile
    #[serde(default = "default_profile")]
    pub profile: ProfileName,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub alerts: AlertConfig,

    #[serde(default)]
    pub workflows: Vec<Workflow>,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub optimizer: OptimizerConfig,

    /// HTTP agent used by the binary as metric source
    pub source: Option<HttpSourceConfig>,

    /// Webhook used by the built-in `notify` action
    pub notify: Option<Webhook>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            units: Vec::new(),
            metrics: default_metrics(),
            profile: default_profile(),
            monitor: MonitorConfig::default(),
            alerts: AlertConfig::default(),
            workflows: Vec::new(),
            orchestrator: OrchestratorConfig::default(),
            optimizer: OptimizerConfig::default(),
            source: None,
            notify: None,
        }
    }
}

fn default_metrics() -> Vec<String> {
    vec![
        MEMORY_MB.to_string(),
        LATENCY_MS.to_string(),
        ERROR_RATE.to_string(),
    ]
}

fn default_profile() -> ProfileName {
    ProfileName::Adaptive
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct UnitConfig {
    pub id: String,
    #[serde(default = "default_kind")]
    pub kind: String,
}

fn default_kind() -> String {
    String::from("service")
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct HttpSourceConfig {
    pub base_url: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Webhook {
    pub url: String,
}

/// Weights of the normalised signals in a unit's health score
#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize)]
pub struct HealthWeights {
    #[serde(default = "default_memory_weight")]
    pub memory: f64,
    #[serde(default = "default_latency_weight")]
    pub latency: f64,
    #[serde(default = "default_errors_weight")]
    pub errors: f64,
}

impl Default for HealthWeights {
    fn default() -> Self {
        Self {
            memory: default_memory_weight(),
            latency: default_latency_weight(),
            errors: default_errors_weight(),
        }
    }
}

fn default_memory_weight() -> f64 {
    0.4
}

fn default_latency_weight() -> f64 {
    0.3
}

fn default_errors_weight() -> f64 {
    0.3
}

/// Values at which a signal is considered fully unhealthy
#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize)]
pub struct HealthCeilings {
    #[serde(default = "default_memory_ceiling")]
    pub memory_mb: f64,
    #[serde(default = "default_latency_ceiling")]
    pub latency_ms: f64,
    #[serde(default = "default_error_rate_ceiling")]
    pub error_rate: f64,
}

impl Default for HealthCeilings {
    fn default() -> Self {
        Self {
            memory_mb: default_memory_ceiling(),
            latency_ms: default_latency_ceiling(),
            error_rate: default_error_rate_ceiling(),
        }
    }
}

fn default_memory_ceiling() -> f64 {
    512.0
}

fn default_latency_ceiling() -> f64 {
    2000.0
}

fn default_error_rate_ceiling() -> f64 {
    0.25
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub weights: HealthWeights,

    #[serde(default)]
    pub ceilings: HealthCeilings,

    /// Health lost by a unit on a failed fetch
    #[serde(default = "default_failure_penalty")]
    pub failure_penalty: f64,

    /// Consecutive failed fetches before a unit is marked inactive
    #[serde(default = "default_inactive_after")]
    pub inactive_after: usize,

    /// Samples kept per unit and metric
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Upper bound of the per-unit fetch timeout
    #[serde(default = "default_max_fetch_timeout_ms")]
    pub max_fetch_timeout_ms: u64,

    /// Time a snapshot subscriber gets per event before it is dropped
    #[serde(default = "default_subscriber_grace_ms")]
    pub subscriber_grace_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            weights: HealthWeights::default(),
            ceilings: HealthCeilings::default(),
            failure_penalty: default_failure_penalty(),
            inactive_after: default_inactive_after(),
            history_capacity: default_history_capacity(),
            max_fetch_timeout_ms: default_max_fetch_timeout_ms(),
            subscriber_grace_ms: default_subscriber_grace_ms(),
        }
    }
}

impl MonitorConfig {
    pub fn max_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.max_fetch_timeout_ms)
    }

    pub fn subscriber_grace(&self) -> Duration {
        Duration::from_millis(self.subscriber_grace_ms)
    }
}

fn default_failure_penalty() -> f64 {
    0.2
}

fn default_inactive_after() -> usize {
    3
}

fn default_history_capacity() -> usize {
    120
}

fn default_max_fetch_timeout_ms() -> u64 {
    5_000
}

fn default_subscriber_grace_ms() -> u64 {
    1_000
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct AlertConfig {
    #[serde(default)]
    pub rules: Vec<AlertRule>,

    /// Consecutive non-breaching snapshots before an alert resolves
    #[serde(default = "default_cooldown_snapshots")]
    pub cooldown_snapshots: usize,

    /// Window in which a repeat firing refreshes the existing alert
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            cooldown_snapshots: default_cooldown_snapshots(),
            dedup_window_secs: default_dedup_window_secs(),
        }
    }
}

impl AlertConfig {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }
}

fn default_cooldown_snapshots() -> usize {
    3
}

fn default_dedup_window_secs() -> u64 {
    300
}

/// Healthy reference values used to phrase recommendations
#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize)]
pub struct Baselines {
    #[serde(default = "default_baseline_memory")]
    pub memory_mb: f64,
    #[serde(default = "default_baseline_latency")]
    pub latency_ms: f64,
    #[serde(default = "default_baseline_error_rate")]
    pub error_rate: f64,
    #[serde(default = "default_baseline_health")]
    pub health: f64,
}

impl Default for Baselines {
    fn default() -> Self {
        Self {
            memory_mb: default_baseline_memory(),
            latency_ms: default_baseline_latency(),
            error_rate: default_baseline_error_rate(),
            health: default_baseline_health(),
        }
    }
}

fn default_baseline_memory() -> f64 {
    100.0
}

fn default_baseline_latency() -> f64 {
    1_000.0
}

fn default_baseline_error_rate() -> f64 {
    0.05
}

fn default_baseline_health() -> f64 {
    0.7
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_step_timeout_ms")]
    pub step_timeout_ms: u64,

    #[serde(default = "default_step_retries")]
    pub step_retries: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Wall-clock budget of a whole execution
    #[serde(default = "default_execution_budget_ms")]
    pub execution_budget_ms: u64,

    /// Granularity of the schedule ticker
    #[serde(default = "default_schedule_resolution_ms")]
    pub schedule_resolution_ms: u64,

    /// Pending triggers kept per workflow under the queue policy
    #[serde(default = "default_max_queued")]
    pub max_queued: usize,

    /// Time an execution-complete subscriber gets per event
    #[serde(default = "default_subscriber_grace_ms")]
    pub subscriber_grace_ms: u64,

    /// Time in-flight executions get to wind down when the session stops
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    #[serde(default)]
    pub baselines: Baselines,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            step_timeout_ms: default_step_timeout_ms(),
            step_retries: default_step_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            execution_budget_ms: default_execution_budget_ms(),
            schedule_resolution_ms: default_schedule_resolution_ms(),
            max_queued: default_max_queued(),
            subscriber_grace_ms: default_subscriber_grace_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            baselines: Baselines::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn execution_budget(&self) -> Duration {
        Duration::from_millis(self.execution_budget_ms)
    }

    pub fn schedule_resolution(&self) -> Duration {
        Duration::from_millis(self.schedule_resolution_ms.max(1))
    }

    pub fn subscriber_grace(&self) -> Duration {
        Duration::from_millis(self.subscriber_grace_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn default_step_timeout_ms() -> u64 {
    30_000
}

fn default_step_retries() -> u32 {
    1
}

fn default_retry_backoff_ms() -> u64 {
    1_000
}

fn default_execution_budget_ms() -> u64 {
    120_000
}

fn default_schedule_resolution_ms() -> u64 {
    1_000
}

fn default_max_queued() -> usize {
    8
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

/// Budget for the engine's own overhead
#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize)]
pub struct OverheadBudget {
    #[serde(default = "default_budget_memory")]
    pub memory_mb: f64,
    #[serde(default = "default_budget_cpu")]
    pub cpu_percent: f64,
    #[serde(default = "default_budget_latency")]
    pub latency_ms: f64,
}

impl Default for OverheadBudget {
    fn default() -> Self {
        Self {
            memory_mb: default_budget_memory(),
            cpu_percent: default_budget_cpu(),
            latency_ms: default_budget_latency(),
        }
    }
}

fn default_budget_memory() -> f64 {
    50.0
}

fn default_budget_cpu() -> f64 {
    5.0
}

fn default_budget_latency() -> f64 {
    100.0
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct OptimizerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Overhead samples in the rolling window
    #[serde(default = "default_window")]
    pub window: usize,

    #[serde(default)]
    pub budget: OverheadBudget,

    /// Fraction of the budget below which a dimension counts as comfortable
    #[serde(default = "default_comfort_ratio")]
    pub comfort_ratio: f64,

    /// Consecutive comfortable evaluations before stepping up a tier
    #[serde(default = "default_step_up_after")]
    pub step_up_after: usize,

    /// Minimum time between two profile transitions
    #[serde(default = "default_dwell_ms")]
    pub dwell_ms: u64,

    #[serde(default)]
    pub presets: ProfilePresets,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: default_window(),
            budget: OverheadBudget::default(),
            comfort_ratio: default_comfort_ratio(),
            step_up_after: default_step_up_after(),
            dwell_ms: default_dwell_ms(),
            presets: ProfilePresets::default(),
        }
    }
}

impl OptimizerConfig {
    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms)
    }
}

fn default_true() -> bool {
    true
}

fn default_window() -> usize {
    20
}

fn default_comfort_ratio() -> f64 {
    0.75
}

fn default_step_up_after() -> usize {
    10
}

fn default_dwell_ms() -> u64 {
    30_000
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
    serde_json::from_str(&file_content)
        .context("invalid configuration file provided")
        .inspect(|config| trace!("loaded config: {config:?}"))
}

//! Optimization profiles
//!
//! An [`OptimizationProfile`] is the single tuning value shared by the monitor loop and
//! the workflow orchestrator. It is never mutated in place: the optimizer publishes a new
//! value through a [`ProfilePublisher`] and every reader takes one consistent copy per
//! tick from its [`ProfileReader`].
//!
//! ```text
//! PerformanceOptimizer ──publish──► watch channel ──current()──► MonitorActor (per tick)
//!                                                  └─current()──► OrchestratorActor (per trigger)
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{EngineError, EngineResult};

/// Lowest poll interval any profile may use
pub const MIN_POLL_INTERVAL_MS: u64 = 10;

/// Named profile tiers, ordered from cheapest to most thorough
///
/// `Adaptive` is only meaningful as a starting point: it resolves to the balanced tier and
/// leaves tier selection to the optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileName {
    Minimal,
    Balanced,
    Comprehensive,
    Adaptive,
}

impl ProfileName {
    /// The concrete tier this name runs at
    pub fn tier(self) -> ProfileName {
        match self {
            ProfileName::Adaptive => ProfileName::Balanced,
            other => other,
        }
    }

    /// One tier cheaper, if there is one
    pub fn step_down(self) -> Option<ProfileName> {
        match self.tier() {
            ProfileName::Comprehensive => Some(ProfileName::Balanced),
            ProfileName::Balanced => Some(ProfileName::Minimal),
            _ => None,
        }
    }

    /// One tier more thorough, if there is one
    pub fn step_up(self) -> Option<ProfileName> {
        match self.tier() {
            ProfileName::Minimal => Some(ProfileName::Balanced),
            ProfileName::Balanced => Some(ProfileName::Comprehensive),
            _ => None,
        }
    }

    /// Position on the tier ladder (0 = minimal)
    pub fn rank(self) -> u8 {
        match self.tier() {
            ProfileName::Minimal => 0,
            ProfileName::Balanced => 1,
            _ => 2,
        }
    }
}

impl fmt::Display for ProfileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProfileName::Minimal => "minimal",
            ProfileName::Balanced => "balanced",
            ProfileName::Comprehensive => "comprehensive",
            ProfileName::Adaptive => "adaptive",
        };
        f.write_str(name)
    }
}

/// Tunables of one tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierSettings {
    pub poll_interval_ms: u64,
    pub cache_ttl_ms: u64,
    pub max_concurrent_operations: usize,
}

/// Settings for each concrete tier
///
/// Stepping down must increase the poll interval and lower TTL and concurrency; the
/// defaults do, overrides from configuration are checked when a profile is published.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfilePresets {
    #[serde(default = "default_minimal")]
    pub minimal: TierSettings,
    #[serde(default = "default_balanced")]
    pub balanced: TierSettings,
    #[serde(default = "default_comprehensive")]
    pub comprehensive: TierSettings,
}

impl Default for ProfilePresets {
    fn default() -> Self {
        Self {
            minimal: default_minimal(),
            balanced: default_balanced(),
            comprehensive: default_comprehensive(),
        }
    }
}

fn default_minimal() -> TierSettings {
    TierSettings {
        poll_interval_ms: 15_000,
        cache_ttl_ms: 60_000,
        max_concurrent_operations: 2,
    }
}

fn default_balanced() -> TierSettings {
    TierSettings {
        poll_interval_ms: 5_000,
        cache_ttl_ms: 120_000,
        max_concurrent_operations: 8,
    }
}

fn default_comprehensive() -> TierSettings {
    TierSettings {
        poll_interval_ms: 1_000,
        cache_ttl_ms: 300_000,
        max_concurrent_operations: 16,
    }
}

impl ProfilePresets {
    pub fn settings(&self, name: ProfileName) -> TierSettings {
        match name.tier() {
            ProfileName::Minimal => self.minimal,
            ProfileName::Comprehensive => self.comprehensive,
            _ => self.balanced,
        }
    }

    /// Build the profile for a tier (version 0, assigned on publish)
    pub fn profile(&self, name: ProfileName) -> OptimizationProfile {
        let settings = self.settings(name);
        OptimizationProfile {
            name: name.tier(),
            poll_interval_ms: settings.poll_interval_ms,
            cache_ttl_ms: settings.cache_ttl_ms,
            max_concurrent_operations: settings.max_concurrent_operations,
            version: 0,
        }
    }
}

/// The engine's current self-tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationProfile {
    pub name: ProfileName,
    pub poll_interval_ms: u64,
    /// Retention window of the monitor's metric history
    pub cache_ttl_ms: u64,
    /// Cap on concurrent metric fetches per tick and on concurrent workflow executions
    pub max_concurrent_operations: usize,
    /// Incremented on every publish
    #[serde(default)]
    pub version: u64,
}

impl OptimizationProfile {
    pub fn preset(name: ProfileName) -> Self {
        ProfilePresets::default().profile(name)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    /// Per-unit fetch timeout: half the poll interval, capped at `max`
    pub fn fetch_timeout(&self, max: Duration) -> Duration {
        (self.poll_interval() / 2).min(max)
    }

    /// Check the invariants every published profile has to hold
    pub fn validate(&self) -> EngineResult<()> {
        if self.name == ProfileName::Adaptive {
            return Err(EngineError::ProfileInvariantViolation(
                "published profiles must name a concrete tier".to_string(),
            ));
        }
        if self.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            return Err(EngineError::ProfileInvariantViolation(format!(
                "poll interval {}ms is below the minimum of {MIN_POLL_INTERVAL_MS}ms",
                self.poll_interval_ms
            )));
        }
        if self.max_concurrent_operations == 0 {
            return Err(EngineError::ProfileInvariantViolation(
                "max_concurrent_operations must be at least 1".to_string(),
            ));
        }
        if self.cache_ttl_ms < self.poll_interval_ms {
            return Err(EngineError::ProfileInvariantViolation(format!(
                "cache TTL {}ms is shorter than the poll interval {}ms",
                self.cache_ttl_ms, self.poll_interval_ms
            )));
        }
        Ok(())
    }
}

/// Create a publisher/reader pair seeded with `initial`
pub fn profile_channel(
    initial: OptimizationProfile,
) -> EngineResult<(ProfilePublisher, ProfileReader)> {
    initial.validate()?;
    let (tx, rx) = watch::channel(initial);
    Ok((ProfilePublisher { tx }, ProfileReader { rx }))
}

/// Write side of the shared profile; owned by the optimizer
#[derive(Debug)]
pub struct ProfilePublisher {
    tx: watch::Sender<OptimizationProfile>,
}

impl ProfilePublisher {
    /// Validate and publish `profile` as the next version
    ///
    /// An invalid profile is rejected and the previous one stays current.
    pub fn publish(&self, mut profile: OptimizationProfile) -> EngineResult<OptimizationProfile> {
        profile.validate()?;
        profile.version = self.tx.borrow().version + 1;
        self.tx.send_replace(profile.clone());
        Ok(profile)
    }

    pub fn current(&self) -> OptimizationProfile {
        self.tx.borrow().clone()
    }

    pub fn reader(&self) -> ProfileReader {
        ProfileReader {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read side of the shared profile
#[derive(Debug, Clone)]
pub struct ProfileReader {
    rx: watch::Receiver<OptimizationProfile>,
}

impl ProfileReader {
    /// One consistent copy of the current profile
    pub fn current(&self) -> OptimizationProfile {
        self.rx.borrow().clone()
    }
}

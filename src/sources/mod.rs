//! Metric sources
//!
//! The engine does not know how a metric is physically obtained. A [`MetricSource`] is
//! injected when a session starts and answers point-in-time reads for one unit and one
//! metric name.
//!
//! ## Implementations
//!
//! - [`memory::MemorySource`]: values held in memory, with failure injection
//! - [`http::HttpMetricSource`]: polls a per-unit agent endpoint (feature `http`)

#[cfg(feature = "http")]
pub mod http;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::MetricValue;
use crate::error::FetchError;

/// Supplies point-in-time readings for monitored units
///
/// `timeout` is a hint; the monitor enforces it regardless of whether the source does.
#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn fetch(
        &self,
        unit_id: &str,
        metric: &str,
        timeout: Duration,
    ) -> Result<MetricValue, FetchError>;
}

#[cfg(feature = "http")]
pub use http::HttpMetricSource;
pub use memory::{MemorySource, UnitBehavior};

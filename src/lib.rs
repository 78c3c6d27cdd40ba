//! Live telemetry-and-response engine
//!
//! A session couples four parts around one shared [`OptimizationProfile`]:
//!
//! ```text
//! MetricSource ──► MonitorActor ──snapshot──► AlertEvaluator ──alerts──┐
//!                      ▲                                               ▼
//!                      │                                     OrchestratorActor ──► actions
//!                      │                                               │
//!                  profile ◄── PerformanceOptimizer ◄── overhead ◄─────┘
//! ```
//!
//! Start one with [`session::SessionBuilder`].

pub mod actions;
pub mod actors;
pub mod alerts;
pub mod config;
pub mod error;
pub mod events;
pub mod monitors;
pub mod optimizer;
pub mod profile;
pub mod session;
pub mod sources;
pub mod util;
pub mod workflows;

/// A single point-in-time reading
pub type MetricValue = f64;

/// Resident memory of a unit in megabytes
pub const MEMORY_MB: &str = "memory_mb";
/// Request latency of a unit in milliseconds
pub const LATENCY_MS: &str = "latency_ms";
/// Fraction of failed requests, `0.0..=1.0`
pub const ERROR_RATE: &str = "error_rate";

pub use alerts::{Alert, AlertNotification, AlertStatus, Severity};
pub use error::{EngineError, EngineResult};
pub use monitors::{MonitoredUnit, MonitoringSnapshot};
pub use profile::{OptimizationProfile, ProfileName};
pub use session::{Session, SessionBuilder, SessionStatus};
pub use workflows::{ExecutionStatus, Workflow, WorkflowExecution};

//! Measuring the engine's own footprint

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{trace, warn};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Overhead attributed to the engine during one tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverheadMeasurement {
    pub timestamp: DateTime<Utc>,
    /// Resident memory above the engine's baseline
    pub memory_delta_mb: f64,
    /// Share of the machine's total CPU capacity
    pub cpu_percent: f64,
    pub tick_latency_ms: f64,
}

impl OverheadMeasurement {
    pub fn new(memory_delta_mb: f64, cpu_percent: f64, tick_latency_ms: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            memory_delta_mb,
            cpu_percent,
            tick_latency_ms,
        }
    }
}

/// Source of overhead measurements, called once after every monitor tick
pub trait OverheadProbe: Send {
    fn measure(&mut self, tick_latency: Duration) -> OverheadMeasurement;
}

impl<F> OverheadProbe for F
where
    F: FnMut(Duration) -> OverheadMeasurement + Send,
{
    fn measure(&mut self, tick_latency: Duration) -> OverheadMeasurement {
        self(tick_latency)
    }
}

/// Probe reading the current process through `sysinfo`
///
/// Memory is reported relative to the resident size when the probe was created.
pub struct ProcessProbe {
    system: System,
    pid: Option<Pid>,
    baseline_bytes: u64,
    cpus: f64,
}

impl ProcessProbe {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid()
            .inspect_err(|e| warn!("cannot resolve own pid, overhead limited to latency: {e}"))
            .ok();

        let cpus = std::thread::available_parallelism()
            .map(|n| n.get() as f64)
            .unwrap_or(1.0);

        let mut probe = Self {
            system: System::new(),
            pid,
            baseline_bytes: 0,
            cpus,
        };
        probe.baseline_bytes = probe.refresh().map_or(0, |(memory, _)| memory);
        probe
    }

    /// Resident bytes and raw CPU usage of the process
    fn refresh(&mut self) -> Option<(u64, f32)> {
        let pid = self.pid?;
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory().with_cpu(),
        );
        self.system
            .process(pid)
            .map(|process| (process.memory(), process.cpu_usage()))
    }
}

impl Default for ProcessProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl OverheadProbe for ProcessProbe {
    fn measure(&mut self, tick_latency: Duration) -> OverheadMeasurement {
        let (memory, cpu) = self.refresh().unwrap_or((self.baseline_bytes, 0.0));

        let measurement = OverheadMeasurement::new(
            memory.saturating_sub(self.baseline_bytes) as f64 / BYTES_PER_MB,
            cpu as f64 / self.cpus,
            tick_latency.as_secs_f64() * 1000.0,
        );
        trace!("overhead: {measurement:?}");
        measurement
    }
}

//! Host-level collector.
//!
//! Reads total/free memory and per-core CPU utilisation through `sysinfo`.

use std::time::Duration;

use sysinfo::System;
use tokio::time::sleep;

use crate::collector::{Collector, CollectorError, Schedule};
use crate::sample::Sample;

/// Default sampling period (5 seconds).
pub const DEFAULT_HOST_INTERVAL: Duration = Duration::from_secs(5);

/// Memory totals in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryReading {
    pub total: u64,
    pub free: u64,
}

/// Reads host memory and CPU. Each read stands alone, so one failing
/// source never hides the other.
pub trait HostSource: Send + 'static {
    fn memory(&mut self) -> Result<MemoryReading, CollectorError>;

    /// Per-core utilisation in percent, since the previous call.
    fn cpu_usage(&mut self) -> Result<Vec<f32>, CollectorError>;
}

/// [`HostSource`] backed by `sysinfo`.
pub struct SysinfoSource {
    system: System,
}

impl SysinfoSource {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SysinfoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl HostSource for SysinfoSource {
    fn memory(&mut self) -> Result<MemoryReading, CollectorError> {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return Err(CollectorError::Unavailable {
                source_name: "sysinfo::memory",
                reason: "total memory reported as zero".to_string(),
            });
        }
        Ok(MemoryReading {
            total,
            free: self.system.free_memory(),
        })
    }

    fn cpu_usage(&mut self) -> Result<Vec<f32>, CollectorError> {
        self.system.refresh_cpu();
        let cpus = self.system.cpus();
        if cpus.is_empty() {
            return Err(CollectorError::Unavailable {
                source_name: "sysinfo::cpu",
                reason: "cpu list empty".to_string(),
            });
        }
        Ok(cpus.iter().map(|cpu| cpu.cpu_usage()).collect())
    }
}

/// Host memory and CPU collector.
///
/// A source that fails on a tick is logged and left out of that tick's
/// samples; the other source is still reported.
pub struct HostCollector {
    schedule: Schedule,
    source: Box<dyn HostSource>,
    cpu_warmed_up: bool,
}

impl HostCollector {
    pub fn new(interval: Duration) -> Self {
        Self {
            schedule: Schedule::every(interval),
            source: Box::new(SysinfoSource::new()),
            cpu_warmed_up: false,
        }
    }

    /// Read memory and CPU from `source` instead of `sysinfo`.
    pub fn with_source(mut self, source: impl HostSource) -> Self {
        self.source = Box::new(source);
        self.cpu_warmed_up = false;
        self
    }

    fn memory_samples(&mut self) -> Result<Vec<Sample>, CollectorError> {
        let reading = self.source.memory()?;
        Ok(vec![
            Sample::gauge("TotalMemory", reading.total as f64),
            Sample::gauge("FreeMemory", reading.free as f64),
        ])
    }

    async fn cpu_samples(&mut self) -> Result<Vec<Sample>, CollectorError> {
        // Usage is computed between two reads; the first read needs a baseline.
        if !self.cpu_warmed_up {
            if let Err(e) = self.source.cpu_usage() {
                tracing::debug!(error = %e, "CPU baseline read failed");
            }
            sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
            self.cpu_warmed_up = true;
        }

        let samples = self
            .source
            .cpu_usage()?
            .into_iter()
            .enumerate()
            .filter_map(|(i, usage)| {
                let usage = f64::from(usage);
                if usage.is_finite() {
                    Some(Sample::gauge(format!("CPUutilization{}", i + 1), usage))
                } else {
                    let err = CollectorError::InvalidReading {
                        source_name: "cpu",
                        reason: format!("core {} usage is {}", i + 1, usage),
                    };
                    tracing::warn!(error = %err, "CPU core sample skipped");
                    None
                }
            })
            .collect();
        Ok(samples)
    }
}

impl Default for HostCollector {
    fn default() -> Self {
        Self::new(DEFAULT_HOST_INTERVAL)
    }
}

impl std::fmt::Debug for HostCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostCollector")
            .field("schedule", &self.schedule)
            .field("cpu_warmed_up", &self.cpu_warmed_up)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Collector for HostCollector {
    fn name(&self) -> &str {
        "host"
    }

    fn schedule(&self) -> Schedule {
        self.schedule
    }

    async fn collect(&mut self) -> Vec<Sample> {
        let mut samples = Vec::new();

        match self.memory_samples() {
            Ok(memory) => samples.extend(memory),
            Err(e) => tracing::warn!(error = %e, "Host memory sample skipped"),
        }

        match self.cpu_samples().await {
            Ok(cpu) => samples.extend(cpu),
            Err(e) => tracing::warn!(error = %e, "Host CPU sample skipped"),
        }

        samples
    }
}

//! Process runtime collector.
//!
//! Reports allocation gauges from [`crate::alloc`], a random gauge and the
//! poll counter.

use std::time::Duration;

use crate::alloc::AllocStats;
use crate::collector::{Collector, Schedule};
use crate::sample::Sample;

/// Default sampling period (2 seconds).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Id of the per-tick poll counter.
pub const POLL_COUNT: &str = "PollCount";

/// Id of the uniformly distributed random gauge.
pub const RANDOM_VALUE: &str = "RandomValue";

/// Id of the reclaim counter (deallocations since the previous tick).
pub const FREE_CYCLES: &str = "FreeCycles";

/// Source of allocation counters; swapped out in tests.
pub type AllocSource = fn() -> AllocStats;

/// Runtime metrics collector.
///
/// All state lives on the instance, so several pipelines can run side by side.
pub struct RuntimeCollector {
    schedule: Schedule,
    source: AllocSource,
    last_deallocations: Option<u64>,
}

impl RuntimeCollector {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            schedule: Schedule::every(poll_interval),
            source: AllocStats::read,
            last_deallocations: None,
        }
    }

    /// Read allocation counters from `source` instead of the global allocator.
    pub fn with_source(mut self, source: AllocSource) -> Self {
        self.source = source;
        self
    }

    fn alloc_samples(&mut self) -> Vec<Sample> {
        let stats = (self.source)();
        let freed = match self.last_deallocations.replace(stats.deallocations) {
            Some(previous) => stats.deallocations.saturating_sub(previous),
            None => 0,
        };

        vec![
            Sample::gauge("Alloc", stats.bytes_in_use() as f64),
            Sample::gauge("HeapAlloc", stats.bytes_in_use() as f64),
            Sample::gauge("TotalAlloc", stats.bytes_allocated as f64),
            Sample::gauge("Mallocs", stats.allocations as f64),
            Sample::gauge("Frees", stats.deallocations as f64),
            Sample::gauge("HeapObjects", stats.live_objects() as f64),
            Sample::counter(FREE_CYCLES, i64::try_from(freed).unwrap_or(i64::MAX)),
        ]
    }
}

impl Default for RuntimeCollector {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl std::fmt::Debug for RuntimeCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeCollector")
            .field("schedule", &self.schedule)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Collector for RuntimeCollector {
    fn name(&self) -> &str {
        "runtime"
    }

    fn schedule(&self) -> Schedule {
        self.schedule
    }

    async fn collect(&mut self) -> Vec<Sample> {
        let mut samples = self.alloc_samples();
        samples.push(Sample::gauge(RANDOM_VALUE, rand::random::<f64>()));
        samples.push(Sample::counter(POLL_COUNT, 1));
        tracing::trace!(count = samples.len(), "Runtime samples collected");
        samples
    }
}

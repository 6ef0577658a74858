//! Collector Layer
//!
//! Sample sources that run on their own fixed schedules and write into a
//! shared [`GaugeSnapshot`]. Each collector runs in its own Tokio task.
//!
//! # Architecture
//!
//! - [`Collector`]: Core trait for implementing sample sources
//! - [`Schedule`]: Fixed sampling period
//! - [`GaugeSnapshot`]: Last-known gauges and pending counter deltas
//! - [`RuntimeCollector`]: Allocation gauges, random gauge, poll counter
//! - [`HostCollector`]: Host memory and per-core CPU gauges
//!
//! # Example
//!
//! ```rust,no_run
//! use pulse::collector::{Collector, GaugeSnapshot, RuntimeCollector};
//! use std::time::Duration;
//!
//! # async fn demo() {
//! let snapshot = GaugeSnapshot::new();
//! let mut collector = RuntimeCollector::new(Duration::from_secs(2));
//! snapshot.record(collector.collect().await).await;
//! # }
//! ```

mod host;
mod runtime;
mod snapshot;
mod traits;

pub use host::{DEFAULT_HOST_INTERVAL, HostCollector, HostSource, MemoryReading, SysinfoSource};
pub use runtime::{
    AllocSource, DEFAULT_POLL_INTERVAL, FREE_CYCLES, POLL_COUNT, RANDOM_VALUE, RuntimeCollector,
};
pub use snapshot::GaugeSnapshot;
pub use traits::{Collector, CollectorError, MIN_INTERVAL, Schedule};

//! Core collector traits and types.

use std::time::Duration;

use thiserror::Error;

use crate::sample::Sample;

/// Minimum allowed sampling period (10 milliseconds).
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Errors raised while reading an instrumentation source.
///
/// These never escape a collection tick: the collector logs them and omits
/// the affected samples for that tick.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// The source could not be read this tick.
    #[error("source '{source_name}' unavailable: {reason}")]
    Unavailable {
        source_name: &'static str,
        reason: String,
    },

    /// The source produced a value that cannot be reported.
    #[error("source '{source_name}' produced an invalid reading: {reason}")]
    InvalidReading {
        source_name: &'static str,
        reason: String,
    },
}

/// Fixed sampling period of a collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    period: Duration,
}

impl Schedule {
    /// Create an interval schedule.
    ///
    /// Interval is clamped to a minimum of [`MIN_INTERVAL`].
    pub fn every(period: Duration) -> Self {
        if period < MIN_INTERVAL {
            tracing::warn!(min_interval = ?MIN_INTERVAL,
                "Interval duration is less than minimum allowed. Using minimum duration."
            );
            Self {
                period: MIN_INTERVAL,
            }
        } else {
            Self { period }
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "every {:?}", self.period)
    }
}

/// Core collector trait for implementing sample sources.
///
/// Each collector runs in its own task on its own [`Schedule`]. A collector
/// owns all of its state; the only thing it hands out is the samples it
/// returns from [`Collector::collect`].
///
/// # Error Handling
///
/// `collect` is infallible by signature. A source that cannot be read is a
/// sampling error for that tick only: log it, leave its samples out, and
/// return whatever else was read.
#[async_trait::async_trait]
pub trait Collector: Send + 'static {
    /// Identifier used in logs.
    fn name(&self) -> &str;

    /// Sampling schedule.
    fn schedule(&self) -> Schedule;

    /// Perform one sampling tick.
    async fn collect(&mut self) -> Vec<Sample>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_interval_minimum() {
        let schedule = Schedule::every(Duration::from_millis(1));
        assert_eq!(schedule.period(), MIN_INTERVAL);
    }

    #[test]
    fn test_schedule_interval_valid() {
        let schedule = Schedule::every(Duration::from_secs(2));
        assert_eq!(schedule.period(), Duration::from_secs(2));
        assert_eq!(schedule.to_string(), "every 2s");
    }

    #[test]
    fn test_collector_error_display() {
        let err = CollectorError::Unavailable {
            source_name: "sysinfo::memory",
            reason: "total memory reported as zero".to_string(),
        };
        assert!(err.to_string().contains("sysinfo::memory"));
    }
}

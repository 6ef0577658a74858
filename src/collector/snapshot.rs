//! Last-known readings shared between collector tasks and the report tick.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::sample::{MetricValue, Sample};

#[derive(Debug, Default)]
struct SnapshotState {
    gauges: BTreeMap<String, f64>,
    counters: BTreeMap<String, i64>,
}

/// Shared store of the latest gauge readings and pending counter deltas.
///
/// Collector tasks write into it with [`record`](Self::record); the report
/// tick empties the counters with [`drain`](Self::drain). Callers only ever
/// receive copies.
#[derive(Debug, Clone, Default)]
pub struct GaugeSnapshot {
    state: Arc<RwLock<SnapshotState>>,
}

impl GaugeSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one tick's samples: gauges overwrite, counters accumulate.
    pub async fn record(&self, samples: impl IntoIterator<Item = Sample>) {
        let mut state = self.state.write().await;
        for sample in samples {
            match sample.value() {
                MetricValue::Gauge(v) => {
                    state.gauges.insert(sample.id().to_owned(), v);
                }
                MetricValue::Counter(d) => {
                    *state.counters.entry(sample.id().to_owned()).or_insert(0) += d;
                }
            }
        }
    }

    /// Copy out every gauge and take the pending counter deltas.
    ///
    /// Gauges stay in place so the next report repeats the last reading.
    /// Counters are reset, so the deltas reported across drains sum to the
    /// total recorded.
    pub async fn drain(&self) -> Vec<Sample> {
        let mut state = self.state.write().await;
        let mut samples: Vec<Sample> = state
            .gauges
            .iter()
            .map(|(id, v)| Sample::gauge(id.clone(), *v))
            .collect();
        let counters = std::mem::take(&mut state.counters);
        samples.extend(
            counters
                .into_iter()
                .map(|(id, delta)| Sample::counter(id, delta)),
        );
        samples
    }

    /// Copy of the current gauge readings.
    pub async fn gauges(&self) -> BTreeMap<String, f64> {
        self.state.read().await.gauges.clone()
    }

    /// Number of distinct metric ids currently held.
    pub async fn len(&self) -> usize {
        let state = self.state.read().await;
        state.gauges.len() + state.counters.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_gauges_last_write_wins() {
        let snapshot = GaugeSnapshot::new();
        snapshot.record([Sample::gauge("Alloc", 1.0)]).await;
        snapshot.record([Sample::gauge("Alloc", 2.0)]).await;

        let gauges = snapshot.gauges().await;
        assert_eq!(gauges.get("Alloc"), Some(&2.0));
    }

    #[tokio::test]
    async fn test_drain_keeps_gauges_and_resets_counters() {
        let snapshot = GaugeSnapshot::new();
        snapshot
            .record([Sample::gauge("Alloc", 5.0), Sample::counter("PollCount", 1)])
            .await;
        snapshot.record([Sample::counter("PollCount", 1)]).await;

        let first = snapshot.drain().await;
        assert!(first.contains(&Sample::gauge("Alloc", 5.0)));
        assert!(first.contains(&Sample::counter("PollCount", 2)));

        let second = snapshot.drain().await;
        assert_eq!(second, vec![Sample::gauge("Alloc", 5.0)]);
    }

    #[tokio::test]
    async fn test_counter_deltas_sum_across_drains() {
        let snapshot = GaugeSnapshot::new();
        let mut reported = 0;

        for ticks in [5, 3, 0, 7] {
            for _ in 0..ticks {
                snapshot.record([Sample::counter("PollCount", 1)]).await;
            }
            for sample in snapshot.drain().await {
                if let MetricValue::Counter(d) = sample.value() {
                    reported += d;
                }
            }
        }

        assert_eq!(reported, 15);
    }
}

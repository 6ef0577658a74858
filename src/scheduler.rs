//! Pipeline scheduler and lifecycle.
//!
//! A running pipeline is a set of independent Tokio tasks sharing only the
//! [`GaugeSnapshot`] and the [`DeliveryQueue`]:
//!
//! ```text
//! collector tasks ──record──▶ GaugeSnapshot ──report tick──▶ DeliveryQueue ──▶ Dispatcher ──▶ Transport
//! ```
//!
//! - one task per collector, ticking on the collector's own [`Schedule`](crate::collector::Schedule)
//! - one report task draining the snapshot into the queue every `report_interval`
//! - the dispatcher, in Direct or Batch mode
//!
//! Shutdown is cooperative: one cancellation token stops every tick and
//! dispatcher wait, the queue is closed once producers have stopped, and the
//! dispatcher is given `shutdown_timeout` to finish (Batch mode uses it for
//! the final flush).

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior, interval, interval_at};
use tokio_util::sync::CancellationToken;

use crate::collector::{Collector, GaugeSnapshot, HostCollector, RuntimeCollector};
use crate::config::{AgentConfig, ConfigError};
use crate::dispatcher::Dispatcher;
use crate::queue::DeliveryQueue;
use crate::retry::RetryPolicy;
use crate::transport::{
    DeliveryClient, DeliveryStats, DeliveryStatsSnapshot, HttpTransport, PayloadEncoder, Transport,
    TransportError,
};

/// Extra time granted on top of `shutdown_timeout` for tasks to unwind.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Errors starting or stopping a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration rejected at start.
    #[error("invalid pipeline configuration: {0}")]
    Config(#[from] ConfigError),

    /// The default HTTP transport could not be built.
    #[error("failed to build transport: {0}")]
    Transport(#[from] TransportError),

    /// A pipeline task panicked.
    #[error("pipeline task failed: {0}")]
    Task(#[from] JoinError),
}

/// Entry point for assembling a pipeline.
#[derive(Debug)]
pub struct Pipeline;

impl Pipeline {
    pub fn builder(config: AgentConfig) -> PipelineBuilder {
        PipelineBuilder {
            config,
            transport: None,
            retry: None,
            collectors: Vec::new(),
        }
    }
}

/// Configures collaborators before [`start`](Self::start).
///
/// Without explicit collectors the pipeline runs a [`RuntimeCollector`] on
/// `poll_interval` and a [`HostCollector`] on `host_interval`. Without an
/// explicit transport it posts to `endpoint` with [`HttpTransport`].
pub struct PipelineBuilder {
    config: AgentConfig,
    transport: Option<Arc<dyn Transport>>,
    retry: Option<RetryPolicy>,
    collectors: Vec<Box<dyn Collector>>,
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("config", &self.config)
            .field("custom_transport", &self.transport.is_some())
            .field("collectors", &self.collectors.len())
            .finish_non_exhaustive()
    }
}

impl PipelineBuilder {
    /// Replace the HTTP transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replace the retry policy built from `retry_delays`.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Add a collector. Any explicit collector replaces the defaults.
    pub fn collector(mut self, collector: impl Collector) -> Self {
        self.collectors.push(Box::new(collector));
        self
    }

    /// Validate the configuration and spawn every task.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// Returns `PipelineError` if the configuration is invalid or the HTTP
    /// transport cannot be built.
    pub fn start(self) -> Result<PipelineHandle, PipelineError> {
        let config = self.config;
        config.validate()?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(
                config.endpoint_url(),
                config.request_timeout,
            )?),
        };
        let encoder =
            PayloadEncoder::from_settings(config.signing_key().as_deref(), config.compress);
        let policy = self
            .retry
            .unwrap_or_else(|| RetryPolicy::new(config.retry_delays.clone()));
        let client = DeliveryClient::new(encoder, transport, policy);
        let stats = client.shared_stats();

        let mut collectors = self.collectors;
        if collectors.is_empty() {
            collectors.push(Box::new(RuntimeCollector::new(config.poll_interval)));
            collectors.push(Box::new(HostCollector::new(config.host_interval)));
        }

        let cancel = CancellationToken::new();
        let queue = DeliveryQueue::new(config.queue_capacity);
        let snapshot = GaugeSnapshot::new();

        let mut producers = Vec::with_capacity(collectors.len() + 1);
        for collector in collectors {
            producers.push(tokio::spawn(run_collector(
                collector,
                snapshot.clone(),
                cancel.clone(),
            )));
        }
        producers.push(tokio::spawn(run_reporter(
            snapshot.clone(),
            queue.clone(),
            config.report_interval,
            cancel.clone(),
        )));

        let dispatcher = Dispatcher::new(config.dispatch_mode(), queue.clone(), client)
            .with_final_flush_timeout(config.shutdown_timeout);
        let dispatcher = tokio::spawn(dispatcher.run(cancel.clone()));

        tracing::info!(
            endpoint = %config.endpoint_url(),
            mode = %config.dispatch_mode(),
            report_interval = ?config.report_interval,
            queue_capacity = config.queue_capacity,
            signed = config.signing_key().is_some(),
            compressed = config.compress,
            "Pipeline started"
        );

        Ok(PipelineHandle {
            cancel,
            queue,
            snapshot,
            stats,
            producers,
            dispatcher,
            shutdown_timeout: config.shutdown_timeout,
        })
    }
}

/// Handle to a running pipeline.
///
/// Dropping the handle leaves the tasks running; call
/// [`shutdown`](Self::shutdown) to stop them.
pub struct PipelineHandle {
    cancel: CancellationToken,
    queue: DeliveryQueue,
    snapshot: GaugeSnapshot,
    stats: Arc<DeliveryStats>,
    producers: Vec<JoinHandle<()>>,
    dispatcher: JoinHandle<()>,
    shutdown_timeout: Duration,
}

impl std::fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineHandle")
            .field("queue", &self.queue)
            .field("stats", &self.stats.snapshot())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl PipelineHandle {
    pub fn queue(&self) -> &DeliveryQueue {
        &self.queue
    }

    /// Copy of the shared snapshot handle.
    pub fn snapshot(&self) -> GaugeSnapshot {
        self.snapshot.clone()
    }

    pub fn stats(&self) -> DeliveryStatsSnapshot {
        self.stats.snapshot()
    }

    /// Token that stops the pipeline when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Gracefully stop with the configured timeout plus a short grace period.
    pub async fn shutdown(self) -> Result<(), PipelineError> {
        let timeout = self.shutdown_timeout + SHUTDOWN_GRACE;
        self.shutdown_with_timeout(timeout).await
    }

    /// Stop all tasks, waiting at most `timeout`.
    ///
    /// Tasks still running when the timeout elapses are aborted and a warning
    /// is logged; that is not an error.
    pub async fn shutdown_with_timeout(self, timeout: Duration) -> Result<(), PipelineError> {
        tracing::info!("Pipeline shutting down");
        self.cancel.cancel();

        let abort_handles: Vec<AbortHandle> = self
            .producers
            .iter()
            .chain(std::iter::once(&self.dispatcher))
            .map(JoinHandle::abort_handle)
            .collect();
        let queue = self.queue.clone();
        let producers = self.producers;
        let dispatcher = self.dispatcher;

        let result: Result<Result<(), JoinError>, _> = tokio::time::timeout(timeout, async {
            for producer in producers {
                producer.await?;
            }
            // Producers are gone; let the dispatcher drain what is left.
            queue.close();
            dispatcher.await
        })
        .await;

        match result {
            Ok(Ok(())) => {
                let stats = self.stats.snapshot();
                tracing::info!(
                    delivered = stats.delivered,
                    failed = stats.failed,
                    retries = stats.retries,
                    dropped = self.queue.dropped(),
                    "Pipeline shutdown complete"
                );
                Ok(())
            }
            Ok(Err(e)) => {
                self.queue.close();
                abort_handles.iter().for_each(AbortHandle::abort);
                tracing::error!(error = %e, "Pipeline task failed during shutdown");
                Err(e.into())
            }
            Err(_) => {
                self.queue.close();
                abort_handles.iter().for_each(AbortHandle::abort);
                tracing::warn!(timeout = ?timeout, "Pipeline shutdown timed out");
                Ok(())
            }
        }
    }
}

// =============================================================================
// Tasks
// =============================================================================

/// Collect on every tick of the collector's schedule until cancelled.
async fn run_collector(
    mut collector: Box<dyn Collector>,
    snapshot: GaugeSnapshot,
    cancel: CancellationToken,
) {
    let schedule = collector.schedule();
    let mut ticker = interval(schedule.period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::info!(collector = %collector.name(), schedule = %schedule, "Collector started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let samples = collector.collect().await;
                tracing::trace!(collector = %collector.name(), samples = samples.len(), "Collection tick");
                snapshot.record(samples).await;
            }
        }
    }

    tracing::debug!(collector = %collector.name(), "Collector stopped");
}

/// Drain the snapshot into the queue every `period` until cancelled.
async fn run_reporter(
    snapshot: GaugeSnapshot,
    queue: DeliveryQueue,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                report_once(&snapshot, &queue).await;
            }
        }
    }

    tracing::debug!("Reporter stopped");
}

/// Move the current snapshot into the queue.
///
/// Returns the number of samples accepted. Rejected samples are dropped and
/// logged; the call never waits for queue space.
pub async fn report_once(snapshot: &GaugeSnapshot, queue: &DeliveryQueue) -> usize {
    let samples = snapshot.drain().await;
    let total = samples.len();
    let mut accepted = 0;
    let mut first_dropped = None;

    for sample in samples {
        if queue.offer(sample.clone()) {
            accepted += 1;
        } else if first_dropped.is_none() {
            first_dropped = Some(sample);
        }
    }

    if let Some(sample) = first_dropped {
        tracing::warn!(
            dropped = total - accepted,
            first = %sample,
            queue_capacity = queue.capacity(),
            total_dropped = queue.dropped(),
            "Delivery queue full, samples dropped"
        );
    } else {
        tracing::debug!(samples = accepted, "Report tick enqueued samples");
    }
    accepted
}

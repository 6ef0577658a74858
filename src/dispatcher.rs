//! Dispatcher Layer
//!
//! Consumes the [`DeliveryQueue`] and drives a [`DeliveryClient`] under one of
//! two policies:
//!
//! - [`DispatchMode::Direct`]: a pool of workers, each sending one sample at a
//!   time to `/update`. At most `workers` requests are in flight; no order is
//!   kept across workers.
//! - [`DispatchMode::Batch`]: a single [`Batcher`] accumulating samples and
//!   posting them as one array to `/updates` when the buffer is full or the
//!   flush interval elapses. At most one request is in flight.
//!
//! Both modes stop on the pipeline's cancellation token. Batch mode then makes
//! one final flush of whatever is buffered or still queued.

mod batch;
mod direct;

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::queue::DeliveryQueue;
use crate::transport::DeliveryClient;

pub use batch::Batcher;
pub use direct::run_direct;

/// Default number of Direct-mode workers.
pub const DEFAULT_WORKERS: usize = 1;
/// Default Batch-mode size threshold.
pub const DEFAULT_BATCH_SIZE: usize = 100;
/// Default Batch-mode flush interval (10 seconds).
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);
/// Default bound on the final Batch-mode flush (5 seconds).
pub const DEFAULT_FINAL_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// How queued samples are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// `workers` concurrent senders, one sample per request.
    Direct { workers: usize },
    /// One aggregator flushing at `max_size` samples or every `flush_interval`.
    Batch {
        max_size: usize,
        flush_interval: Duration,
    },
}

impl Default for DispatchMode {
    fn default() -> Self {
        Self::Direct {
            workers: DEFAULT_WORKERS,
        }
    }
}

impl std::fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct { workers } => write!(f, "direct ({} workers)", workers),
            Self::Batch {
                max_size,
                flush_interval,
            } => write!(
                f,
                "batch (max {} samples, every {})",
                max_size,
                humantime::format_duration(*flush_interval)
            ),
        }
    }
}

/// Runs the selected [`DispatchMode`] until cancelled.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    mode: DispatchMode,
    queue: DeliveryQueue,
    client: DeliveryClient,
    final_flush_timeout: Duration,
}

impl Dispatcher {
    pub fn new(mode: DispatchMode, queue: DeliveryQueue, client: DeliveryClient) -> Self {
        Self {
            mode,
            queue,
            client,
            final_flush_timeout: DEFAULT_FINAL_FLUSH_TIMEOUT,
        }
    }

    /// Bound the final Batch-mode flush made on shutdown.
    pub fn with_final_flush_timeout(mut self, timeout: Duration) -> Self {
        self.final_flush_timeout = timeout;
        self
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Deliver until `cancel` fires.
    ///
    /// In Batch mode the final flush reads the queue until it is closed and
    /// drained, so the owner should close the queue once producers stop.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(mode = %self.mode, "Dispatcher started");
        match self.mode {
            DispatchMode::Direct { workers } => {
                run_direct(self.queue, self.client, workers, cancel).await;
            }
            DispatchMode::Batch {
                max_size,
                flush_interval,
            } => {
                Batcher::new(self.queue, self.client, max_size, flush_interval)
                    .with_final_flush_timeout(self.final_flush_timeout)
                    .run(cancel)
                    .await;
            }
        }
        tracing::info!("Dispatcher stopped");
    }
}

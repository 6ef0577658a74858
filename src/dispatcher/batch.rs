//! Batch mode: one aggregator owning the buffer.

use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tokio_util::sync::CancellationToken;

use super::DEFAULT_FINAL_FLUSH_TIMEOUT;
use crate::queue::DeliveryQueue;
use crate::sample::Sample;
use crate::transport::DeliveryClient;

/// Accumulates samples and posts them as one array.
///
/// A flush happens when the buffer reaches `max_size` or the flush interval
/// elapses, whichever comes first. The buffer is cleared after the flush
/// succeeds and also after it fails terminally or runs out of retries: those
/// samples are lost rather than resent in a later batch. It is kept only when
/// cancellation interrupted the flush, so the final flush on shutdown carries
/// it.
pub struct Batcher {
    queue: DeliveryQueue,
    client: DeliveryClient,
    max_size: usize,
    flush_interval: Duration,
    final_flush_timeout: Duration,
    buffer: Vec<Sample>,
}

impl std::fmt::Debug for Batcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batcher")
            .field("max_size", &self.max_size)
            .field("flush_interval", &self.flush_interval)
            .field("buffered", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

impl Batcher {
    pub fn new(
        queue: DeliveryQueue,
        client: DeliveryClient,
        max_size: usize,
        flush_interval: Duration,
    ) -> Self {
        let max_size = max_size.max(1);
        Self {
            queue,
            client,
            max_size,
            flush_interval,
            final_flush_timeout: DEFAULT_FINAL_FLUSH_TIMEOUT,
            buffer: Vec::with_capacity(max_size),
        }
    }

    pub fn with_final_flush_timeout(mut self, timeout: Duration) -> Self {
        self.final_flush_timeout = timeout;
        self
    }

    /// Aggregate until `cancel` fires or the queue closes, then flush once more.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.flush_interval, self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                sample = self.queue.take() => match sample {
                    Some(sample) => {
                        self.buffer.push(sample);
                        if self.buffer.len() >= self.max_size {
                            self.flush(&cancel).await;
                            ticker.reset();
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    if !self.buffer.is_empty() {
                        self.flush(&cancel).await;
                    }
                }
            }
        }

        self.finish().await;
    }

    /// Send the buffer as one payload.
    async fn flush(&mut self, cancel: &CancellationToken) {
        let count = self.buffer.len();
        match self.client.deliver_batch(&self.buffer, cancel).await {
            Ok(()) => {
                tracing::debug!(samples = count, "Batch delivered");
                self.buffer.clear();
            }
            Err(e) if e.is_cancelled() => {
                tracing::debug!(samples = count, "Batch flush cancelled, keeping buffer");
            }
            Err(e) => {
                tracing::error!(samples = count, error = %e, "Batch delivery failed, discarding batch");
                self.buffer.clear();
            }
        }
    }

    /// Drain the queue until it is closed and flush what is left, under a
    /// fresh token bounded by the final flush timeout.
    async fn finish(&mut self) {
        let token = CancellationToken::new();
        let drained = timeout(self.final_flush_timeout, async {
            while let Some(sample) = self.queue.take().await {
                self.buffer.push(sample);
                if self.buffer.len() >= self.max_size {
                    self.flush(&token).await;
                }
            }
            if !self.buffer.is_empty() {
                tracing::info!(samples = self.buffer.len(), "Final batch flush");
                self.flush(&token).await;
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                abandoned = self.buffer.len() + self.queue.len(),
                timeout = ?self.final_flush_timeout,
                "Final batch flush timed out"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::transport::mock::MockTransport;
    use crate::transport::{PayloadEncoder, Route, TransportError};
    use std::sync::Arc;

    const FLUSH: Duration = Duration::from_secs(10);

    fn batcher(
        queue: &DeliveryQueue,
        transport: &Arc<MockTransport>,
        policy: RetryPolicy,
        max_size: usize,
    ) -> (Batcher, DeliveryClient) {
        let client = DeliveryClient::new(PayloadEncoder::new(), transport.clone(), policy);
        (
            Batcher::new(queue.clone(), client.clone(), max_size, FLUSH),
            client,
        )
    }

    fn decoded(transport: &MockTransport, call: usize) -> Vec<Sample> {
        let payload = &transport.sent()[call];
        assert_eq!(payload.route, Route::Batch);
        serde_json::from_slice(&payload.body).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_buffer_flushes_before_timer() {
        let queue = DeliveryQueue::new(64);
        let transport = Arc::new(MockTransport::new());
        let (batcher, _) = batcher(&queue, &transport, RetryPolicy::none(), 5);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(batcher.run(cancel.clone()));

        for i in 0..5 {
            queue.offer(Sample::counter("PollCount", i));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(transport.calls(), 1);
        let batch = decoded(&transport, 0);
        assert_eq!(batch.len(), 5);
        // Arrival order is kept within the payload.
        assert_eq!(batch[4], Sample::counter("PollCount", 4));

        cancel.cancel();
        queue.close();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_flushes_partial_buffer() {
        let queue = DeliveryQueue::new(64);
        let transport = Arc::new(MockTransport::new());
        let (batcher, _) = batcher(&queue, &transport, RetryPolicy::none(), 5);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(batcher.run(cancel.clone()));

        for i in 0..4 {
            queue.offer(Sample::gauge(format!("g{i}"), f64::from(i)));
        }
        tokio::time::sleep(FLUSH - Duration::from_secs(1)).await;
        assert_eq!(transport.calls(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(transport.calls(), 1);
        assert_eq!(decoded(&transport, 0).len(), 4);

        cancel.cancel();
        queue.close();
        task.await.unwrap();
        // Nothing left over, so no final flush.
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_gauge_ids_are_all_sent() {
        let queue = DeliveryQueue::new(64);
        let transport = Arc::new(MockTransport::new());
        let (batcher, _) = batcher(&queue, &transport, RetryPolicy::none(), 3);
        let task = tokio::spawn(batcher.run(CancellationToken::new()));

        queue.offer(Sample::gauge("Alloc", 1.0));
        queue.offer(Sample::gauge("Alloc", 2.0));
        queue.offer(Sample::gauge("Alloc", 3.0));
        queue.close();
        task.await.unwrap();

        let batch = decoded(&transport, 0);
        assert_eq!(
            batch,
            vec![
                Sample::gauge("Alloc", 1.0),
                Sample::gauge("Alloc", 2.0),
                Sample::gauge("Alloc", 3.0)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_discard_batch() {
        let queue = DeliveryQueue::new(64);
        let transport = Arc::new(MockTransport::scripted(vec![
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
        ]));
        let (batcher, client) = batcher(
            &queue,
            &transport,
            RetryPolicy::new(vec![Duration::from_millis(10)]),
            2,
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(batcher.run(cancel.clone()));

        queue.offer(Sample::gauge("a", 1.0));
        queue.offer(Sample::gauge("b", 2.0));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.calls(), 2);
        assert_eq!(client.stats().failed, 2);

        queue.offer(Sample::gauge("c", 3.0));
        queue.offer(Sample::gauge("d", 4.0));
        tokio::time::sleep(Duration::from_millis(100)).await;

        // The failed batch is not resent with the next one.
        assert_eq!(transport.calls(), 3);
        assert_eq!(
            decoded(&transport, 2),
            vec![Sample::gauge("c", 3.0), Sample::gauge("d", 4.0)]
        );

        cancel.cancel();
        queue.close();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_buffer_and_queue() {
        let queue = DeliveryQueue::new(64);
        let transport = Arc::new(MockTransport::new());
        let (batcher, client) = batcher(&queue, &transport, RetryPolicy::none(), 100);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(batcher.run(cancel.clone()));

        queue.offer(Sample::counter("PollCount", 1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(transport.calls(), 0);

        cancel.cancel();
        queue.offer(Sample::counter("PollCount", 2));
        queue.close();
        task.await.unwrap();

        assert_eq!(transport.calls(), 1);
        assert_eq!(
            decoded(&transport, 0),
            vec![Sample::counter("PollCount", 1), Sample::counter("PollCount", 2)]
        );
        assert_eq!(client.stats().delivered, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_flush_keeps_buffer_for_final_flush() {
        let queue = DeliveryQueue::new(64);
        let transport = Arc::new(MockTransport::scripted(vec![Err(TransportError::Status {
            code: 503,
            body: String::new(),
        })]));
        let (batcher, client) = batcher(
            &queue,
            &transport,
            RetryPolicy::new(vec![Duration::from_secs(60)]),
            1,
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(batcher.run(cancel.clone()));

        queue.offer(Sample::gauge("Alloc", 7.0));
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        queue.close();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("batcher should stop promptly")
            .unwrap();

        assert_eq!(transport.calls(), 2);
        assert_eq!(decoded(&transport, 1), vec![Sample::gauge("Alloc", 7.0)]);
        assert_eq!(client.stats().delivered, 1);
    }
}

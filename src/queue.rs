//! Bounded delivery queue.
//!
//! Producers call [`DeliveryQueue::offer`], which never waits: when the queue
//! is full the sample is rejected and counted as dropped. Consumers call
//! [`DeliveryQueue::take`], which waits for the next sample. After
//! [`DeliveryQueue::close`] no new samples are admitted, but everything
//! already queued is still handed out before `take` reports `None`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::sample::Sample;

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 2048;

struct Shared {
    tx: Mutex<Option<mpsc::Sender<Sample>>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Sample>>,
    capacity: usize,
    dropped: AtomicU64,
}

/// Multi-producer, multi-consumer bounded queue of samples.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct DeliveryQueue {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for DeliveryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryQueue")
            .field("capacity", &self.shared.capacity)
            .field("len", &self.len())
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}

impl DeliveryQueue {
    /// Create a queue holding at most `capacity` samples (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            shared: Arc::new(Shared {
                tx: Mutex::new(Some(tx)),
                rx: tokio::sync::Mutex::new(rx),
                capacity,
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Admit a sample without waiting.
    ///
    /// Returns `false` when the queue is full or closed. A full-queue
    /// rejection is counted in [`dropped`](Self::dropped); logging it is up
    /// to the caller.
    pub fn offer(&self, sample: Sample) -> bool {
        let guard = self.sender();
        let Some(tx) = guard.as_ref() else {
            return false;
        };
        match tx.try_send(sample) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Wait for the next sample.
    ///
    /// Returns `None` once the queue is closed and drained. Cancel-safe: a
    /// dropped `take` future never loses a sample.
    pub async fn take(&self) -> Option<Sample> {
        self.shared.rx.lock().await.recv().await
    }

    /// Take a sample if one is immediately available.
    pub fn try_take(&self) -> Option<Sample> {
        self.shared.rx.try_lock().ok()?.try_recv().ok()
    }

    /// Stop admitting samples. Queued samples remain available to `take`.
    pub fn close(&self) {
        let mut guard = self.sender();
        if guard.take().is_some() {
            tracing::debug!(pending = self.len_locked(&guard), "Delivery queue closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender().is_none()
    }

    /// Number of samples waiting to be taken.
    pub fn len(&self) -> usize {
        self.len_locked(&self.sender())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Total samples rejected because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    fn sender(&self) -> MutexGuard<'_, Option<mpsc::Sender<Sample>>> {
        self.shared.tx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn len_locked(&self, tx: &Option<mpsc::Sender<Sample>>) -> usize {
        match tx {
            Some(tx) => tx.max_capacity() - tx.capacity(),
            // Closed: only the receiver knows; a consumer may be holding it.
            None => self
                .shared
                .rx
                .try_lock()
                .map(|rx| rx.len())
                .unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_offer_rejects_when_full() {
        let queue = DeliveryQueue::new(2);
        assert!(queue.offer(Sample::gauge("a", 1.0)));
        assert!(queue.offer(Sample::gauge("b", 2.0)));
        assert!(!queue.offer(Sample::gauge("c", 3.0)));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.capacity(), 2);
        assert_eq!(queue.dropped(), 1);
    }

    #[tokio::test]
    async fn test_offer_never_waits_for_consumer() {
        let queue = DeliveryQueue::new(4);
        // No consumer at all; a thousand offers must complete immediately.
        let start = std::time::Instant::now();
        let accepted = (0..1000)
            .filter(|i| queue.offer(Sample::counter("PollCount", *i)))
            .count();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(accepted, 4);
        assert_eq!(queue.dropped(), 996);
    }

    #[tokio::test]
    async fn test_take_preserves_arrival_order() {
        let queue = DeliveryQueue::new(8);
        for i in 0..3 {
            queue.offer(Sample::counter("n", i));
        }
        for i in 0..3 {
            assert_eq!(queue.take().await, Some(Sample::counter("n", i)));
        }
    }

    #[tokio::test]
    async fn test_take_waits_until_offer() {
        let queue = DeliveryQueue::new(1);
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.take().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        assert!(queue.offer(Sample::gauge("Alloc", 1.0)));
        let taken = consumer.await.unwrap();
        assert_eq!(taken, Some(Sample::gauge("Alloc", 1.0)));
    }

    #[tokio::test]
    async fn test_close_drains_pending_then_reports_none() {
        let queue = DeliveryQueue::new(4);
        queue.offer(Sample::gauge("a", 1.0));
        queue.offer(Sample::gauge("b", 2.0));
        queue.close();

        assert!(queue.is_closed());
        assert!(!queue.offer(Sample::gauge("c", 3.0)));
        // Rejections after close are not backpressure drops.
        assert_eq!(queue.dropped(), 0);

        assert_eq!(queue.take().await, Some(Sample::gauge("a", 1.0)));
        assert_eq!(queue.take().await, Some(Sample::gauge("b", 2.0)));
        assert_eq!(queue.take().await, None);
    }

    #[tokio::test]
    async fn test_close_wakes_waiting_consumer() {
        let queue = DeliveryQueue::new(1);
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.take().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();

        let taken = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer should wake on close")
            .unwrap();
        assert_eq!(taken, None);
    }

    #[test]
    fn test_try_take() {
        let queue = DeliveryQueue::new(2);
        assert_eq!(queue.try_take(), None);
        queue.offer(Sample::gauge("a", 1.0));
        assert_eq!(queue.try_take(), Some(Sample::gauge("a", 1.0)));
        assert!(queue.is_empty());
    }
}

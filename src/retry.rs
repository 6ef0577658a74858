//! Retry policy for delivery attempts.
//!
//! A [`RetryPolicy`] is a fixed, ordered list of backoff delays plus a
//! predicate deciding whether a failed attempt may be retried. The first
//! attempt is made immediately; each retry waits for the next delay in the
//! list. When the list is exhausted the last error is returned.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::transport::TransportError;

/// Default backoff sequence: 1s, 3s, 5s.
pub const DEFAULT_RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(3),
    Duration::from_secs(5),
];

/// Decides whether the error from a failed attempt may be retried.
///
/// The second argument is the index of the delay that would be waited next
/// (0 for the wait before the second attempt).
pub type RetryPredicate = Arc<dyn Fn(&TransportError, usize) -> bool + Send + Sync>;

/// Fixed-delay retry policy with an injectable predicate.
#[derive(Clone)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
    predicate: RetryPredicate,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("delays", &self.delays)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_DELAYS.to_vec())
    }
}

impl RetryPolicy {
    /// Policy retrying transient errors with the given delays.
    pub fn new(delays: Vec<Duration>) -> Self {
        Self {
            delays,
            predicate: Arc::new(|err: &TransportError, _| err.is_transient()),
        }
    }

    /// Policy that never retries.
    pub fn none() -> Self {
        Self::new(Vec::new())
    }

    /// Replace the retry predicate.
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&TransportError, usize) -> bool + Send + Sync + 'static,
    {
        self.predicate = Arc::new(predicate);
        self
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Maximum number of attempts this policy can make.
    pub fn max_attempts(&self) -> usize {
        self.delays.len() + 1
    }

    /// Whether `err` may be retried after `index` retries already scheduled.
    ///
    /// Cancellation is never retried regardless of the predicate.
    pub fn should_retry(&self, err: &TransportError, index: usize) -> bool {
        index < self.delays.len() && !err.is_cancelled() && (self.predicate)(err, index)
    }

    /// Delay to wait before retrying after `err`, or `None` to give up.
    pub fn next_delay(&self, err: &TransportError, index: usize) -> Option<Duration> {
        self.should_retry(err, index).then(|| self.delays[index])
    }

    /// Run `attempt` until it succeeds, the policy gives up, or `cancel` fires
    /// during a backoff wait.
    ///
    /// `attempt` receives the zero-based attempt number.
    pub async fn send_with_retry<F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut attempt: F,
    ) -> Result<(), TransportError>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<(), TransportError>>,
    {
        let mut err = match attempt(0).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        for index in 0..self.delays.len() {
            let Some(delay) = self.next_delay(&err, index) else {
                return Err(err);
            };

            tracing::debug!(
                attempt = index + 1,
                delay = ?delay,
                error = %err,
                "Delivery attempt failed, backing off"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }

            match attempt(index + 1).await {
                Ok(()) => return Ok(()),
                Err(e) => err = e,
            }
        }

        Err(err)
    }
}

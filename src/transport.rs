//! Transport Layer
//!
//! Moves encoded payloads to the remote collector.
//!
//! # Components
//!
//! - [`Transport`]: one network attempt for one [`Payload`]
//! - [`HttpTransport`]: `reqwest` implementation posting to `/update` and `/updates`
//! - [`PayloadEncoder`]: JSON encoding, optional signing, optional compression
//! - [`DeliveryClient`]: encoder + transport + [`RetryPolicy`], with delivery counters
//!
//! # Error classification
//!
//! [`TransportError::is_transient`] separates failures worth retrying
//! (connection problems, timeouts, 502/503/504) from terminal ones (4xx,
//! other unexpected statuses, encoding failures).

mod codec;
mod http;
#[cfg(test)]
pub(crate) mod mock;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use strum_macros::{AsRefStr, Display};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::retry::RetryPolicy;
use crate::sample::{Sample, SampleError};

pub use codec::{
    Compressor, Gzip, HmacSigner, Identity, PayloadEncoder, SIGNATURE_HEADER, Signer,
};
pub use http::{DEFAULT_REQUEST_TIMEOUT, HttpTransport};

/// Status codes signalling temporary receiver unavailability.
pub const TRANSIENT_STATUS_CODES: [u16; 3] = [502, 503, 504];

// =============================================================================
// Errors
// =============================================================================

/// Errors from a single delivery attempt.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not connect, or the connection was reset.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The request deadline elapsed.
    #[error("request timed out")]
    Timeout,

    /// Any other failure while sending the request or reading the response.
    #[error("request failed: {0}")]
    Request(String),

    /// The request could not be built (bad URL, bad header).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The receiver answered with something other than 200.
    #[error("unexpected status {code}: {body}")]
    Status { code: u16, body: String },

    /// The sample cannot be represented on the wire.
    #[error("invalid sample: {0}")]
    InvalidSample(#[from] SampleError),

    /// JSON encoding failed.
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    /// Compression failed.
    #[error("failed to compress payload: {0}")]
    Compress(#[from] std::io::Error),

    /// Shutdown interrupted the delivery.
    #[error("delivery cancelled")]
    Cancelled,
}

impl TransportError {
    /// Whether another attempt could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connect(_) | Self::Timeout | Self::Request(_) => true,
            Self::Status { code, .. } => TRANSIENT_STATUS_CODES.contains(code),
            Self::InvalidRequest(_)
            | Self::InvalidSample(_)
            | Self::Encode(_)
            | Self::Compress(_)
            | Self::Cancelled => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::Connect(e.to_string())
        } else if e.is_builder() {
            Self::InvalidRequest(e.to_string())
        } else {
            Self::Request(e.to_string())
        }
    }
}

// =============================================================================
// Payload
// =============================================================================

/// Receiver endpoint a payload is posted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
pub enum Route {
    /// One JSON object.
    #[strum(serialize = "/update")]
    Single,
    /// A JSON array.
    #[strum(serialize = "/updates")]
    Batch,
}

/// A fully encoded request body, ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub route: Route,
    /// Body bytes, compressed when `content_encoding` is set.
    pub body: Vec<u8>,
    /// Value for the `Content-Encoding` header.
    pub content_encoding: Option<&'static str>,
    /// Hex signature of the uncompressed JSON.
    pub signature: Option<String>,
    /// Number of samples encoded in the body.
    pub samples: usize,
}

/// Sends a payload to the remote collector exactly once.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Perform one network attempt. 200 is the only success.
    async fn send(&self, payload: &Payload) -> Result<(), TransportError>;
}

// =============================================================================
// Delivery client
// =============================================================================

/// Delivery counters shared by every sender of a pipeline.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    delivered: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
}

/// Point-in-time copy of [`DeliveryStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStatsSnapshot {
    /// Samples acknowledged by the receiver.
    pub delivered: u64,
    /// Samples discarded after a terminal or exhausted failure.
    pub failed: u64,
    /// Attempts beyond the first.
    pub retries: u64,
}

impl DeliveryStats {
    pub fn snapshot(&self) -> DeliveryStatsSnapshot {
        DeliveryStatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

/// Encodes samples and drives a [`Transport`] under a [`RetryPolicy`].
///
/// Cheap to clone; clones share the transport and the counters.
#[derive(Clone)]
pub struct DeliveryClient {
    encoder: Arc<PayloadEncoder>,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    stats: Arc<DeliveryStats>,
}

impl std::fmt::Debug for DeliveryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryClient")
            .field("encoder", &self.encoder)
            .field("policy", &self.policy)
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

impl DeliveryClient {
    pub fn new(encoder: PayloadEncoder, transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self {
            encoder: Arc::new(encoder),
            transport,
            policy,
            stats: Arc::new(DeliveryStats::default()),
        }
    }

    pub fn stats(&self) -> DeliveryStatsSnapshot {
        self.stats.snapshot()
    }

    pub(crate) fn shared_stats(&self) -> Arc<DeliveryStats> {
        Arc::clone(&self.stats)
    }

    /// Encode and deliver one sample to `/update`.
    pub async fn deliver_sample(
        &self,
        sample: &Sample,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        let payload = self.encoder.encode_single(sample).inspect_err(|_| {
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
        })?;
        self.deliver(&payload, cancel).await
    }

    /// Encode and deliver a batch to `/updates`, preserving order.
    pub async fn deliver_batch(
        &self,
        samples: &[Sample],
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        let payload = self.encoder.encode_batch(samples).inspect_err(|_| {
            self.stats
                .failed
                .fetch_add(samples.len() as u64, Ordering::Relaxed);
        })?;
        let skipped = samples.len() - payload.samples;
        if skipped > 0 {
            self.stats
                .failed
                .fetch_add(skipped as u64, Ordering::Relaxed);
        }
        self.deliver(&payload, cancel).await
    }

    /// Deliver an encoded payload with retries.
    ///
    /// Only the attempt that returns success counts the payload as delivered.
    pub async fn deliver(
        &self,
        payload: &Payload,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        let result = self
            .policy
            .send_with_retry(cancel, |attempt| {
                if attempt > 0 {
                    self.stats.retries.fetch_add(1, Ordering::Relaxed);
                }
                self.transport.send(payload)
            })
            .await;

        let count = payload.samples as u64;
        match &result {
            Ok(()) => {
                self.stats.delivered.fetch_add(count, Ordering::Relaxed);
            }
            Err(e) if e.is_cancelled() => {}
            Err(_) => {
                self.stats.failed.fetch_add(count, Ordering::Relaxed);
            }
        }
        result
    }
}

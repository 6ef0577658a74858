//! HTTP transport posting payloads to the remote collector.

use std::time::Duration;

use reqwest::Client;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use tokio::time::timeout;

use super::{Payload, SIGNATURE_HEADER, Transport, TransportError};

/// Default per-request timeout (10 seconds).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts payloads to `{endpoint}/update` and `{endpoint}/updates`.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
    timeout: Duration,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// Create a transport for `endpoint` (scheme and host, no trailing slash).
    ///
    /// # Errors
    /// Returns `TransportError::InvalidRequest` if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>, request_timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| {
                TransportError::InvalidRequest(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            timeout: request_timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn send(&self, payload: &Payload) -> Result<(), TransportError> {
        let url = format!("{}{}", self.endpoint, payload.route.as_ref());

        let mut request = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(payload.body.clone());
        if let Some(encoding) = payload.content_encoding {
            request = request.header(CONTENT_ENCODING, encoding);
        }
        if let Some(signature) = &payload.signature {
            request = request.header(SIGNATURE_HEADER, signature.as_str());
        }

        let response = match timeout(self.timeout, request.send()).await {
            Ok(result) => result?,
            Err(_) => return Err(TransportError::Timeout),
        };

        let status = response.status();
        if status == reqwest::StatusCode::OK {
            tracing::trace!(url = %url, samples = payload.samples, "Payload accepted");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Status {
            code: status.as_u16(),
            body: body.trim().to_string(),
        })
    }
}

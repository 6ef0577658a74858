//! Payload encoding: JSON body, optional signature, optional compression.

use std::io::Write;

use flate2::Compression;
use flate2::write::GzEncoder;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::{Payload, Route, TransportError};
use crate::sample::Sample;

/// Header carrying the hex signature of the uncompressed body.
pub const SIGNATURE_HEADER: &str = "HashSHA256";

type HmacSha256 = Hmac<Sha256>;

// =============================================================================
// Signing
// =============================================================================

/// Produces a signature over a request body.
pub trait Signer: Send + Sync + std::fmt::Debug {
    fn sign(&self, body: &[u8]) -> String;
}

/// HMAC-SHA256 signer rendering the MAC as lowercase hex.
#[derive(Clone)]
pub struct HmacSigner {
    key: Vec<u8>,
}

impl std::fmt::Debug for HmacSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSigner").finish_non_exhaustive()
    }
}

impl HmacSigner {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.key).expect("HMAC accepts keys of any length")
    }

    /// Check a hex signature against `body` in constant time.
    pub fn verify(&self, body: &[u8], signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        let mut mac = self.mac();
        mac.update(body);
        mac.verify_slice(&expected).is_ok()
    }
}

impl Signer for HmacSigner {
    fn sign(&self, body: &[u8]) -> String {
        let mut mac = self.mac();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }
}

// =============================================================================
// Compression
// =============================================================================

/// Body compression applied after signing.
pub trait Compressor: Send + Sync + std::fmt::Debug {
    /// `Content-Encoding` value, or `None` when the body is sent as is.
    fn content_encoding(&self) -> Option<&'static str>;

    fn compress(&self, body: Vec<u8>) -> std::io::Result<Vec<u8>>;
}

/// gzip at the default level.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gzip;

impl Compressor for Gzip {
    fn content_encoding(&self) -> Option<&'static str> {
        Some("gzip")
    }

    fn compress(&self, body: Vec<u8>) -> std::io::Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 2), Compression::default());
        encoder.write_all(&body)?;
        encoder.finish()
    }
}

/// No compression.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Compressor for Identity {
    fn content_encoding(&self) -> Option<&'static str> {
        None
    }

    fn compress(&self, body: Vec<u8>) -> std::io::Result<Vec<u8>> {
        Ok(body)
    }
}

// =============================================================================
// Encoder
// =============================================================================

/// Turns samples into [`Payload`]s.
///
/// The signature always covers the uncompressed JSON, so a receiver
/// verifies after decompressing.
#[derive(Debug)]
pub struct PayloadEncoder {
    signer: Option<Box<dyn Signer>>,
    compressor: Box<dyn Compressor>,
}

impl Default for PayloadEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadEncoder {
    /// Plain JSON: no signature, no compression.
    pub fn new() -> Self {
        Self {
            signer: None,
            compressor: Box::new(Identity),
        }
    }

    /// Encoder for the agent's settings. An empty key disables signing.
    pub fn from_settings(key: Option<&str>, compress: bool) -> Self {
        let mut encoder = Self::new();
        if let Some(key) = key.filter(|k| !k.is_empty()) {
            encoder = encoder.with_signer(HmacSigner::new(key));
        }
        if compress {
            encoder = encoder.with_compressor(Gzip);
        }
        encoder
    }

    pub fn with_signer(mut self, signer: impl Signer + 'static) -> Self {
        self.signer = Some(Box::new(signer));
        self
    }

    pub fn with_compressor(mut self, compressor: impl Compressor + 'static) -> Self {
        self.compressor = Box::new(compressor);
        self
    }

    /// Encode one sample for `/update`.
    ///
    /// # Errors
    ///
    /// [`TransportError::InvalidSample`] if the sample fails
    /// [`Sample::validate`]; nothing is sent for it.
    pub fn encode_single(&self, sample: &Sample) -> Result<Payload, TransportError> {
        sample.validate()?;
        let json = serde_json::to_vec(sample)?;
        self.finish(Route::Single, json, 1)
    }

    /// Encode samples as a JSON array for `/updates`, in order.
    ///
    /// Samples failing [`Sample::validate`] are left out with a warning so
    /// the rest of the batch is still accepted; `Payload::samples` counts
    /// only the encoded ones.
    ///
    /// # Errors
    ///
    /// [`TransportError::InvalidSample`] if no sample in a non-empty batch is valid.
    pub fn encode_batch(&self, samples: &[Sample]) -> Result<Payload, TransportError> {
        let mut valid = Vec::with_capacity(samples.len());
        let mut first_error = None;
        for sample in samples {
            match sample.validate() {
                Ok(()) => valid.push(sample),
                Err(e) => {
                    tracing::warn!(error = %e, "Leaving invalid sample out of batch");
                    first_error.get_or_insert(e);
                }
            }
        }
        if valid.is_empty() {
            if let Some(e) = first_error {
                return Err(e.into());
            }
        }

        let json = serde_json::to_vec(&valid)?;
        self.finish(Route::Batch, json, valid.len())
    }

    fn finish(&self, route: Route, json: Vec<u8>, samples: usize) -> Result<Payload, TransportError> {
        let signature = self.signer.as_ref().map(|s| s.sign(&json));
        let body = self.compressor.compress(json)?;
        Ok(Payload {
            route,
            body,
            content_encoding: self.compressor.content_encoding(),
            signature,
            samples,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use serde_json::{Value, json};
    use std::io::Read;

    fn gunzip(body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        GzDecoder::new(body).read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_hmac_known_vector() {
        // RFC 4231 test case 2.
        let signer = HmacSigner::new("Jefe");
        assert_eq!(
            signer.sign(b"what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_non_finite_gauge_is_refused() {
        let encoder = PayloadEncoder::new();
        let err = encoder
            .encode_single(&Sample::gauge("Weird", f64::NAN))
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidSample(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_batch_leaves_out_invalid_samples() {
        let encoder = PayloadEncoder::new();
        let batch = vec![
            Sample::gauge("Alloc", 1.0),
            Sample::gauge("Weird", f64::INFINITY),
            Sample::gauge("", 2.0),
            Sample::counter("PollCount", 1),
        ];

        let payload = encoder.encode_batch(&batch).unwrap();

        assert_eq!(payload.samples, 2);
        let decoded: Vec<Sample> = serde_json::from_slice(&payload.body).unwrap();
        assert_eq!(
            decoded,
            vec![Sample::gauge("Alloc", 1.0), Sample::counter("PollCount", 1)]
        );
    }

    #[test]
    fn test_batch_of_only_invalid_samples_fails() {
        let encoder = PayloadEncoder::new();
        let err = encoder
            .encode_batch(&[Sample::gauge("Weird", f64::NAN)])
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidSample(_)));
    }

    #[test]
    fn test_verify_rejects_tampering() {
        let signer = HmacSigner::new("secret");
        let sig = signer.sign(b"{\"id\":\"Alloc\"}");
        assert!(signer.verify(b"{\"id\":\"Alloc\"}", &sig));
        assert!(!signer.verify(b"{\"id\":\"Frees\"}", &sig));
        assert!(!signer.verify(b"{\"id\":\"Alloc\"}", "not-hex"));
        assert!(!HmacSigner::new("other").verify(b"{\"id\":\"Alloc\"}", &sig));
    }

    #[test]
    fn test_plain_single_payload() {
        let payload = PayloadEncoder::new()
            .encode_single(&Sample::gauge("Alloc", 123.0))
            .unwrap();

        assert_eq!(payload.route, Route::Single);
        assert_eq!(payload.content_encoding, None);
        assert_eq!(payload.signature, None);
        assert_eq!(payload.samples, 1);
        let body: Value = serde_json::from_slice(&payload.body).unwrap();
        assert_eq!(body, json!({"id": "Alloc", "type": "gauge", "value": 123.0}));
    }

    #[test]
    fn test_signature_covers_uncompressed_json() {
        let encoder = PayloadEncoder::from_settings(Some("k"), true);
        let batch = vec![Sample::gauge("Alloc", 1.0), Sample::counter("PollCount", 4)];
        let payload = encoder.encode_batch(&batch).unwrap();

        assert_eq!(payload.route, Route::Batch);
        assert_eq!(payload.content_encoding, Some("gzip"));
        assert_eq!(payload.samples, 2);

        let json = gunzip(&payload.body);
        let signature = payload.signature.as_deref().unwrap();
        assert!(HmacSigner::new("k").verify(&json, signature));

        let decoded: Vec<Sample> = serde_json::from_slice(&json).unwrap();
        assert_eq!(decoded, batch);
    }

    #[test]
    fn test_empty_key_disables_signing() {
        let payload = PayloadEncoder::from_settings(Some(""), false)
            .encode_single(&Sample::counter("PollCount", 1))
            .unwrap();
        assert_eq!(payload.signature, None);

        let payload = PayloadEncoder::from_settings(None, false)
            .encode_single(&Sample::counter("PollCount", 1))
            .unwrap();
        assert_eq!(payload.signature, None);
    }
}

//! Metric sample model.
//!
//! A [`Sample`] is one named observation. The measured quantity is a closed
//! [`MetricValue`], so a gauge can never carry a delta and a counter can never
//! carry an absolute value.
//!
//! On the wire a sample is the flat JSON object the collector expects:
//!
//! ```json
//! {"id": "Alloc", "type": "gauge", "value": 123.0}
//! {"id": "PollCount", "type": "counter", "delta": 1}
//! ```

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

// =============================================================================
// Kind / Value
// =============================================================================

/// Metric kind, as named on the wire.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum MetricKind {
    /// Absolute value; the latest report replaces the previous one.
    Gauge,
    /// Delta; reports accumulate additively at the receiver.
    Counter,
}

/// The measured quantity of a sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    /// Absolute reading, last write wins.
    Gauge(f64),
    /// Increment to add to the receiver's running total.
    Counter(i64),
}

impl MetricValue {
    /// Kind matching this value.
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Gauge(_) => MetricKind::Gauge,
            Self::Counter(_) => MetricKind::Counter,
        }
    }
}

/// Errors raised when a wire object does not describe a valid sample.
#[derive(Debug, Error, PartialEq)]
pub enum SampleError {
    /// The metric id was empty.
    #[error("metric id must not be empty")]
    EmptyId,

    /// The field required by the kind was absent.
    #[error("{kind} metric '{id}' is missing its {field}")]
    MissingField {
        id: String,
        kind: MetricKind,
        field: &'static str,
    },

    /// A field belonging to the other kind was present.
    #[error("{kind} metric '{id}' must not carry a {field}")]
    UnexpectedField {
        id: String,
        kind: MetricKind,
        field: &'static str,
    },

    /// A gauge value was NaN or infinite; JSON cannot carry it.
    #[error("gauge metric '{id}' has non-finite value {value}")]
    NonFinite { id: String, value: f64 },
}

// =============================================================================
// Sample
// =============================================================================

/// One named metric observation. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireSample", into = "WireSample")]
pub struct Sample {
    id: String,
    value: MetricValue,
}

impl Sample {
    /// Build a sample, rejecting an empty id or a non-finite gauge.
    pub fn new(id: impl Into<String>, value: MetricValue) -> Result<Self, SampleError> {
        let sample = Self {
            id: id.into(),
            value,
        };
        sample.validate()?;
        Ok(sample)
    }

    /// Gauge sample from trusted input.
    ///
    /// Not checked here: the id must be non-empty and the value finite.
    /// [`PayloadEncoder`](crate::transport::PayloadEncoder) refuses samples
    /// that fail [`Sample::validate`], so use [`Sample::new`] for values
    /// read from an untrusted source.
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            value: MetricValue::Gauge(value),
        }
    }

    /// Counter sample from trusted input. The id must be non-empty.
    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            value: MetricValue::Counter(delta),
        }
    }

    /// Check that the sample can be represented on the wire.
    ///
    /// # Errors
    ///
    /// [`SampleError::EmptyId`] or [`SampleError::NonFinite`].
    pub fn validate(&self) -> Result<(), SampleError> {
        if self.id.is_empty() {
            return Err(SampleError::EmptyId);
        }
        match self.value {
            MetricValue::Gauge(value) if !value.is_finite() => Err(SampleError::NonFinite {
                id: self.id.clone(),
                value,
            }),
            _ => Ok(()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn value(&self) -> MetricValue {
        self.value
    }

    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }
}

impl std::fmt::Display for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.value {
            MetricValue::Gauge(v) => write!(f, "{}={} (gauge)", self.id, v),
            MetricValue::Counter(d) => write!(f, "{}+={} (counter)", self.id, d),
        }
    }
}

// =============================================================================
// Wire form
// =============================================================================

/// Flat JSON shape exchanged with the collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireSample {
    id: String,
    #[serde(rename = "type")]
    kind: MetricKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    delta: Option<i64>,
}

impl From<Sample> for WireSample {
    fn from(sample: Sample) -> Self {
        let (value, delta) = match sample.value {
            MetricValue::Gauge(v) => (Some(v), None),
            MetricValue::Counter(d) => (None, Some(d)),
        };
        Self {
            id: sample.id,
            kind: sample.value.kind(),
            value,
            delta,
        }
    }
}

impl TryFrom<WireSample> for Sample {
    type Error = SampleError;

    fn try_from(wire: WireSample) -> Result<Self, Self::Error> {
        let value = match (wire.kind, wire.value, wire.delta) {
            (MetricKind::Gauge, Some(v), None) => MetricValue::Gauge(v),
            (MetricKind::Counter, None, Some(d)) => MetricValue::Counter(d),
            (MetricKind::Gauge, None, _) => {
                return Err(SampleError::MissingField {
                    id: wire.id,
                    kind: MetricKind::Gauge,
                    field: "value",
                });
            }
            (MetricKind::Gauge, Some(_), Some(_)) => {
                return Err(SampleError::UnexpectedField {
                    id: wire.id,
                    kind: MetricKind::Gauge,
                    field: "delta",
                });
            }
            (MetricKind::Counter, _, None) => {
                return Err(SampleError::MissingField {
                    id: wire.id,
                    kind: MetricKind::Counter,
                    field: "delta",
                });
            }
            (MetricKind::Counter, Some(_), Some(_)) => {
                return Err(SampleError::UnexpectedField {
                    id: wire.id,
                    kind: MetricKind::Counter,
                    field: "value",
                });
            }
        };
        Sample::new(wire.id, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn test_metric_kind_from_str() {
        assert_eq!(MetricKind::from_str("gauge").unwrap(), MetricKind::Gauge);
        assert_eq!(MetricKind::from_str("COUNTER").unwrap(), MetricKind::Counter);
        assert!(MetricKind::from_str("histogram").is_err());
        assert_eq!(MetricKind::Counter.as_ref(), "counter");
    }

    #[test]
    fn test_gauge_wire_shape() {
        let sample = Sample::gauge("Alloc", 123.0);
        let value = serde_json::to_value(&sample).unwrap();
        assert_eq!(value, json!({"id": "Alloc", "type": "gauge", "value": 123.0}));
    }

    #[test]
    fn test_counter_wire_shape() {
        let sample = Sample::counter("PollCount", 5);
        let value = serde_json::to_value(&sample).unwrap();
        assert_eq!(value, json!({"id": "PollCount", "type": "counter", "delta": 5}));
    }

    #[test]
    fn test_decode_rejects_mismatched_fields() {
        let err = serde_json::from_value::<Sample>(json!({"id": "x", "type": "gauge", "delta": 1}))
            .unwrap_err();
        assert!(err.to_string().contains("missing its value"));

        let err = serde_json::from_value::<Sample>(
            json!({"id": "x", "type": "counter", "delta": 1, "value": 2.0}),
        )
        .unwrap_err();
        assert!(err.to_string().contains("must not carry a value"));
    }

    #[test]
    fn test_decode_rejects_empty_id() {
        let err = serde_json::from_value::<Sample>(json!({"id": "", "type": "gauge", "value": 1.0}))
            .unwrap_err();
        assert!(err.to_string().contains("must not be empty"));
        assert_eq!(
            Sample::new("", MetricValue::Counter(1)).unwrap_err(),
            SampleError::EmptyId
        );
    }

    #[test]
    fn test_new_rejects_non_finite_gauge() {
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = Sample::new("Weird", MetricValue::Gauge(value)).unwrap_err();
            assert!(matches!(err, SampleError::NonFinite { ref id, .. } if id == "Weird"));
        }
        assert!(Sample::new("Alloc", MetricValue::Gauge(-0.5)).is_ok());
    }

    #[test]
    fn test_validate_catches_unchecked_constructors() {
        assert_eq!(Sample::gauge("", 1.0).validate(), Err(SampleError::EmptyId));
        assert_eq!(Sample::counter("", 1).validate(), Err(SampleError::EmptyId));
        assert!(Sample::gauge("Alloc", f64::NAN).validate().is_err());
        assert!(Sample::counter("PollCount", i64::MAX).validate().is_ok());
    }

    #[test]
    fn test_batch_decodes_in_order() {
        let batch: Vec<Sample> = serde_json::from_value(json!([
            {"id": "RandomValue", "type": "gauge", "value": 0.25},
            {"id": "PollCount", "type": "counter", "delta": 3},
            {"id": "RandomValue", "type": "gauge", "value": 0.5},
        ]))
        .unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[1].value(), MetricValue::Counter(3));
        assert_eq!(batch[2].value(), MetricValue::Gauge(0.5));
    }
}

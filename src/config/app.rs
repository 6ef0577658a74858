//! Agent configuration structures.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::collector::{DEFAULT_HOST_INTERVAL, DEFAULT_POLL_INTERVAL};
use crate::dispatcher::{DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL, DEFAULT_WORKERS, DispatchMode};
use crate::queue::DEFAULT_QUEUE_CAPACITY;
use crate::retry::DEFAULT_RETRY_DELAYS;
use crate::transport::DEFAULT_REQUEST_TIMEOUT;

use super::validation::{ConfigError, duration_list, expand_env_vars, normalize_endpoint};

// =============================================================================
// Constants
// =============================================================================

/// Default collector endpoint.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:8080";

/// Default report interval (10 seconds).
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Default graceful shutdown budget (5 seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Dispatch Configuration
// =============================================================================

/// Delivery strategy name.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DispatchKind {
    /// Worker pool, one sample per request.
    #[default]
    Direct,
    /// Single aggregator, arrays of samples.
    Batch,
}

/// Dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Delivery strategy (default: direct).
    pub mode: DispatchKind,

    /// Direct-mode concurrent senders (default: 1).
    pub workers: usize,

    /// Batch-mode size threshold (default: 100).
    pub batch_size: usize,

    /// Batch-mode flush interval (default: 10s).
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mode: DispatchKind::Direct,
            workers: DEFAULT_WORKERS,
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

impl DispatchConfig {
    pub fn to_mode(&self) -> DispatchMode {
        match self.mode {
            DispatchKind::Direct => DispatchMode::Direct {
                workers: self.workers,
            },
            DispatchKind::Batch => DispatchMode::Batch {
                max_size: self.batch_size,
                flush_interval: self.flush_interval,
            },
        }
    }
}

// =============================================================================
// Agent Configuration
// =============================================================================

/// Top-level agent configuration.
///
/// Every field has a default, so an empty file is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Collector base URL; `http://` is assumed when no scheme is given.
    pub endpoint: String,

    /// Runtime collection interval (default: 2s).
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Report/enqueue interval (default: 10s).
    #[serde(with = "humantime_serde")]
    pub report_interval: Duration,

    /// Host collection interval (default: 5s).
    #[serde(with = "humantime_serde")]
    pub host_interval: Duration,

    /// Delivery queue capacity (default: 2048).
    pub queue_capacity: usize,

    /// Dispatcher settings.
    pub dispatch: DispatchConfig,

    /// HMAC signing key; empty disables signing. Supports `${VAR}` expansion.
    pub key: String,

    /// gzip request bodies (default: true).
    pub compress: bool,

    /// Backoff delays between attempts (default: 1s, 3s, 5s).
    #[serde(with = "duration_list")]
    pub retry_delays: Vec<Duration>,

    /// Per-request timeout (default: 10s).
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Budget for the final flush and task shutdown (default: 5s).
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            report_interval: DEFAULT_REPORT_INTERVAL,
            host_interval: DEFAULT_HOST_INTERVAL,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            dispatch: DispatchConfig::default(),
            key: String::new(),
            compress: true,
            retry_delays: DEFAULT_RETRY_DELAYS.to_vec(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl AgentConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        // An empty document deserializes to unit, not to a map.
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(&content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = self.endpoint_url();
        let host = endpoint
            .split_once("://")
            .filter(|(scheme, _)| matches!(*scheme, "http" | "https"))
            .map(|(_, rest)| rest)
            .ok_or_else(|| {
                ConfigError::ValidationError(format!(
                    "endpoint must use http or https: '{}'",
                    self.endpoint
                ))
            })?;
        if host.is_empty() {
            return Err(ConfigError::ValidationError(
                "endpoint host must not be empty".to_string(),
            ));
        }

        for (name, value) in [
            ("poll_interval", self.poll_interval),
            ("report_interval", self.report_interval),
            ("host_interval", self.host_interval),
            ("request_timeout", self.request_timeout),
            ("dispatch.flush_interval", self.dispatch.flush_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be positive",
                    name
                )));
            }
        }

        if self.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "queue_capacity must be positive".to_string(),
            ));
        }

        match self.dispatch.mode {
            DispatchKind::Direct if self.dispatch.workers == 0 => {
                return Err(ConfigError::ValidationError(
                    "dispatch.workers must be positive".to_string(),
                ));
            }
            DispatchKind::Batch if self.dispatch.batch_size == 0 => {
                return Err(ConfigError::ValidationError(
                    "dispatch.batch_size must be positive".to_string(),
                ));
            }
            _ => {}
        }

        Ok(())
    }

    /// Endpoint with scheme and without trailing slash.
    pub fn endpoint_url(&self) -> String {
        normalize_endpoint(&self.endpoint)
    }

    /// Signing key after `${VAR}` expansion, or `None` when signing is off.
    pub fn signing_key(&self) -> Option<String> {
        let key = expand_env_vars(&self.key);
        (!key.is_empty()).then_some(key)
    }

    pub fn dispatch_mode(&self) -> DispatchMode {
        self.dispatch.to_mode()
    }
}

//! Configuration module for the pulse agent.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Collector endpoint, signing key, compression
//! - Sampling and report intervals
//! - Queue capacity and dispatch mode
//! - Retry delays and timeouts
//!
//! Precedence (applied by the binary): CLI flag > environment > file > defaults.

mod app;
mod validation;

pub use app::{AgentConfig, DispatchConfig, DispatchKind};
pub use validation::{
    ConfigError, duration_list, expand_env_vars, normalize_endpoint, parse_duration,
    parse_interval,
};

// Re-export constants
pub use app::{DEFAULT_ENDPOINT, DEFAULT_REPORT_INTERVAL, DEFAULT_SHUTDOWN_TIMEOUT};

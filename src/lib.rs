//! Pulse - Metrics Agent Library
//!
//! Periodically samples process and host metrics and delivers them to a
//! remote collector over an unreliable network. The library holds the whole
//! pipeline; the `pulse-agent` binary only wires configuration, logging and
//! signals around it.
//!
//! # Architecture
//!
//! - **Sample**: one gauge or counter observation, with its JSON wire form
//! - **Collectors**: runtime allocation stats and host memory/CPU, each on its own tick
//! - **Queue**: bounded delivery buffer that drops instead of blocking producers
//! - **Dispatcher**: Direct (worker pool) or Batch (single aggregator) delivery
//! - **Transport**: JSON encoding, HMAC signing, gzip, HTTP, retry with backoff
//! - **Scheduler**: task lifecycle and graceful shutdown
//!
//! # Example
//!
//! ```rust,no_run
//! use pulse::{AgentConfig, Pipeline};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AgentConfig {
//!         endpoint: "localhost:8080".to_string(),
//!         ..AgentConfig::default()
//!     };
//!
//!     let pipeline = Pipeline::builder(config).start()?;
//!     tokio::signal::ctrl_c().await?;
//!     pipeline.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod alloc;
pub mod collector;
pub mod config;
pub mod dispatcher;
pub mod queue;
pub mod retry;
pub mod sample;
pub mod scheduler;
pub mod transport;

pub use collector::{Collector, CollectorError, GaugeSnapshot, HostCollector, RuntimeCollector};
pub use config::{AgentConfig, ConfigError};
pub use dispatcher::{DispatchMode, Dispatcher};
pub use queue::DeliveryQueue;
pub use retry::RetryPolicy;
pub use sample::{MetricKind, MetricValue, Sample, SampleError};
pub use scheduler::{Pipeline, PipelineError, PipelineHandle};
pub use transport::{DeliveryClient, HttpTransport, PayloadEncoder, Transport, TransportError};

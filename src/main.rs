//! Pulse Agent Binary Entry Point
//!
//! Samples this process and the host, and reports to a remote collector.
//! Core functionality is provided by the `pulse` library crate.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use pulse::{
    alloc::TrackingAllocator,
    config::{AgentConfig, DispatchKind, parse_interval},
    scheduler::{Pipeline, PipelineHandle},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: TrackingAllocator = TrackingAllocator;

/// Pulse - metrics agent
#[derive(Parser, Debug)]
#[command(name = "pulse-agent", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (optional; defaults apply without one)
    #[arg(short, long, env = "PULSE_CONFIG")]
    config: Option<PathBuf>,

    /// Collector address, e.g. localhost:8080 (overrides config file)
    #[arg(short = 'a', long, env = "ADDRESS")]
    address: Option<String>,

    /// Runtime poll interval; bare integers are seconds
    #[arg(short = 'p', long, env = "POLL_INTERVAL", value_parser = parse_interval)]
    poll_interval: Option<Duration>,

    /// Report interval; bare integers are seconds
    #[arg(short = 'r', long, env = "REPORT_INTERVAL", value_parser = parse_interval)]
    report_interval: Option<Duration>,

    /// HMAC signing key (empty disables signing)
    #[arg(short = 'k', long, env = "KEY", hide_env_values = true)]
    key: Option<String>,

    /// Number of concurrent senders in direct mode
    #[arg(short = 'l', long, env = "RATE_LIMIT")]
    rate_limit: Option<usize>,

    /// Dispatch mode: direct or batch
    #[arg(long, env = "PULSE_MODE")]
    mode: Option<DispatchKind>,

    /// Batch mode size threshold
    #[arg(long, env = "PULSE_BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Batch mode flush interval; bare integers are seconds
    #[arg(long, env = "PULSE_FLUSH_INTERVAL", value_parser = parse_interval)]
    flush_interval: Option<Duration>,
}

impl Cli {
    /// Apply CLI/env overrides (CLI > ENV > config file).
    fn apply(self, config: &mut AgentConfig) {
        if let Some(address) = self.address {
            config.endpoint = address;
        }
        if let Some(interval) = self.poll_interval {
            config.poll_interval = interval;
        }
        if let Some(interval) = self.report_interval {
            config.report_interval = interval;
        }
        if let Some(key) = self.key {
            config.key = key;
        }
        if let Some(workers) = self.rate_limit {
            config.dispatch.workers = workers;
        }
        if let Some(mode) = self.mode {
            config.dispatch.mode = mode;
        }
        if let Some(size) = self.batch_size {
            config.dispatch.batch_size = size;
        }
        if let Some(interval) = self.flush_interval {
            config.dispatch.flush_interval = interval;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pulse=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Pulse - metrics agent");

    // Parse CLI arguments
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            AgentConfig::load(path)?
        }
        None => AgentConfig::default(),
    };
    cli.apply(&mut config);
    config.validate()?;

    tracing::info!(
        "Endpoint: {}, poll: {}, report: {}, mode: {}",
        config.endpoint_url(),
        humantime::format_duration(config.poll_interval),
        humantime::format_duration(config.report_interval),
        config.dispatch_mode(),
    );

    let pipeline = Pipeline::builder(config).start()?;

    tracing::info!("Press Ctrl+C to shutdown");
    shutdown_signal(pipeline).await;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal, then stop the pipeline.
async fn shutdown_signal(pipeline: PipelineHandle) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }

    tracing::info!("Shutting down pipeline...");
    if let Err(e) = pipeline.shutdown().await {
        tracing::error!("Failed to shutdown pipeline: {}", e);
    }
}

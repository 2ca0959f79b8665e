//! Prometheus exporter for nginx access logs.
//!
//! The exporter follows an access log file, matches every appended line
//! against the configured `log_format` and turns the result into request
//! metrics served over HTTP.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │  access.log     │────>│  LogFollower    │────>│    Pipeline     │────>│   HTTP Server   │
//! │  (rotating)     │     │  (line stream)  │     │ (match + apply) │     │   (/metrics)    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! nginx-log-exporter -f /var/log/nginx/access.log -l env=prod
//! nginx-log-exporter --config exporter.json5
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod aggregator;
pub mod args;
pub mod config;
pub mod fields;
pub mod follower;
pub mod http;
pub mod metrics;
pub mod naming;
pub mod pipeline;

pub use aggregator::Aggregator;
pub use args::Args;
pub use config::{ExporterConfig, LogFormat, LoggingConfig};
pub use fields::{FieldMap, LabelSet, LogField};
pub use follower::{FollowError, LogFollower, LogLine, OpenError};
pub use http::HttpServer;
pub use self::metrics::{MetricRegistry, SharedRegistry};
pub use pipeline::Pipeline;

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level. Supports two
/// output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
pub fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
    }

    Ok(())
}

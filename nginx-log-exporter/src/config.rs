//! Configuration for the log exporter.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use nginx_log_format::FormatPlan;

use crate::follower::FollowerConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Invalid log format: {0}")]
    Format(#[from] nginx_log_format::ConfigError),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// The nginx `combined` format followed by `$request_time`.
pub const DEFAULT_FORMAT: &str = r#"$remote_addr - $remote_user [$time_local] "$request" $status $body_bytes_sent "$http_referer" "$http_user_agent" "$http_x_forwarded_for" $request_time"#;

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Followed log file and its format.
    #[serde(default)]
    pub log: LogConfig,

    /// HTTP endpoint settings.
    #[serde(default)]
    pub web: WebConfig,

    /// Metric naming and shape.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Log file configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Path of the access log to follow.
    #[serde(default = "default_filename")]
    pub filename: PathBuf,

    /// nginx `log_format` template the lines were written with.
    #[serde(default = "default_format")]
    pub format: String,

    /// How often to check the file for new data and rotation (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// How long the file may be missing before following fails (seconds).
    #[serde(default = "default_missing_timeout")]
    pub missing_timeout_secs: u64,

    /// Lines buffered between the follower and the processing task.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_filename() -> PathBuf {
    PathBuf::from("/var/log/nginx/access.log")
}

fn default_format() -> String {
    DEFAULT_FORMAT.to_string()
}

fn default_poll_interval() -> u64 {
    250
}

fn default_missing_timeout() -> u64 {
    30
}

fn default_channel_capacity() -> usize {
    1024
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filename: default_filename(),
            format: default_format(),
            poll_interval_ms: default_poll_interval(),
            missing_timeout_secs: default_missing_timeout(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl LogConfig {
    /// Follower settings derived from this section.
    pub fn follower(&self) -> FollowerConfig {
        FollowerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            missing_timeout: Duration::from_secs(self.missing_timeout_secs),
            channel_capacity: self.channel_capacity,
        }
    }
}

/// HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Address to listen on (default: "0.0.0.0:4040").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_listen() -> String {
    "0.0.0.0:4040".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
        }
    }
}

/// Metric naming and shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Metric name prefix (default: "nginx").
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Static labels added to every metric.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Upper bounds of the latency histogram buckets, in seconds.
    #[serde(default = "default_buckets")]
    pub histogram_buckets: Vec<f64>,

    /// Quantiles reported by the latency summaries.
    #[serde(default = "default_quantiles")]
    pub summary_quantiles: Vec<f64>,

    /// Window over which summary quantiles are computed (seconds).
    #[serde(default = "default_summary_max_age")]
    pub summary_max_age_secs: u64,
}

fn default_namespace() -> String {
    "nginx".to_string()
}

fn default_buckets() -> Vec<f64> {
    vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
}

fn default_quantiles() -> Vec<f64> {
    vec![0.5, 0.9, 0.99]
}

fn default_summary_max_age() -> u64 {
    600 // 10 minutes
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            labels: BTreeMap::new(),
            histogram_buckets: default_buckets(),
            summary_quantiles: default_quantiles(),
            summary_max_age_secs: default_summary_max_age(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Compile the configured log format.
    pub fn compile_format(&self) -> Result<FormatPlan, ConfigError> {
        Ok(FormatPlan::compile(&self.log.format)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log.filename.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "log filename must not be empty".to_string(),
            ));
        }

        if self.log.poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "poll_interval_ms must be > 0".to_string(),
            ));
        }

        if self.log.channel_capacity == 0 {
            return Err(ConfigError::Validation(
                "channel_capacity must be > 0".to_string(),
            ));
        }

        // Validate listen address format
        if self.web.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.web.listen
            )));
        }

        // Validate path starts with /
        if !self.web.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        // axum reads these as route parameters and wildcards
        if self.web.path.contains([':', '*', '{', '}']) {
            return Err(ConfigError::Validation(format!(
                "Metrics path must not contain ':', '*', '{{' or '}}': {}",
                self.web.path
            )));
        }

        if self.web.path == crate::http::HEALTH_PATH {
            return Err(ConfigError::Validation(format!(
                "Metrics path must not be {}",
                crate::http::HEALTH_PATH
            )));
        }

        if self.metrics.namespace.is_empty() {
            return Err(ConfigError::Validation(
                "namespace must not be empty".to_string(),
            ));
        }

        let buckets = &self.metrics.histogram_buckets;
        if buckets.is_empty() {
            return Err(ConfigError::Validation(
                "histogram_buckets must not be empty".to_string(),
            ));
        }
        if buckets.iter().any(|b| !b.is_finite()) || buckets.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ConfigError::Validation(
                "histogram_buckets must be finite and strictly increasing".to_string(),
            ));
        }

        let quantiles = &self.metrics.summary_quantiles;
        if quantiles.is_empty() || quantiles.iter().any(|q| !(0.0..=1.0).contains(q)) {
            return Err(ConfigError::Validation(
                "summary_quantiles must be non-empty and within [0, 1]".to_string(),
            ));
        }

        if self.metrics.summary_max_age_secs == 0 {
            return Err(ConfigError::Validation(
                "summary_max_age_secs must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let config = ExporterConfig::parse("{}").unwrap();

        assert_eq!(
            config.log.filename,
            PathBuf::from("/var/log/nginx/access.log")
        );
        assert_eq!(config.log.format, DEFAULT_FORMAT);
        assert_eq!(config.log.poll_interval_ms, 250);
        assert_eq!(config.web.listen, "0.0.0.0:4040");
        assert_eq!(config.web.path, "/metrics");
        assert_eq!(config.metrics.namespace, "nginx");
        assert_eq!(config.metrics.histogram_buckets.len(), 11);
        assert_eq!(config.metrics.summary_quantiles, vec![0.5, 0.9, 0.99]);
        assert!(config.metrics.labels.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            log: {
                filename: "/tmp/access.log",
                format: "$status $request_time",
                poll_interval_ms: 100,
                missing_timeout_secs: 5,
                channel_capacity: 16
            },
            web: {
                listen: "127.0.0.1:9113",
                path: "/prometheus/metrics"
            },
            metrics: {
                namespace: "edge",
                labels: {
                    environment: "production",
                    datacenter: "us-east-1"
                },
                histogram_buckets: [0.1, 1, 10],
                summary_quantiles: [0.5, 0.95],
                summary_max_age_secs: 60
            },
            logging: {
                level: "debug",
                format: "json"
            }
        }"#;

        let config = ExporterConfig::parse(json).unwrap();

        assert_eq!(config.log.filename, PathBuf::from("/tmp/access.log"));
        assert_eq!(config.log.format, "$status $request_time");
        assert_eq!(config.log.channel_capacity, 16);
        assert_eq!(config.web.listen, "127.0.0.1:9113");
        assert_eq!(config.web.path, "/prometheus/metrics");
        assert_eq!(config.metrics.namespace, "edge");
        assert_eq!(
            config.metrics.labels.get("environment"),
            Some(&"production".to_string())
        );
        assert_eq!(config.metrics.histogram_buckets, vec![0.1, 1.0, 10.0]);
        assert_eq!(config.metrics.summary_quantiles, vec![0.5, 0.95]);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);

        let follower = config.log.follower();
        assert_eq!(follower.poll_interval, Duration::from_millis(100));
        assert_eq!(follower.missing_timeout, Duration::from_secs(5));
        assert_eq!(follower.channel_capacity, 16);
    }

    #[test]
    fn test_compile_format() {
        let config = ExporterConfig::default();
        let plan = config.compile_format().unwrap();
        assert!(plan.field_index("request_time").is_some());

        let config = ExporterConfig {
            log: LogConfig {
                format: "$status$request_time".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        let err = config.compile_format().unwrap_err();
        assert!(matches!(err, ConfigError::Format(_)));
    }

    #[test]
    fn test_validate_invalid_listen() {
        let result = ExporterConfig::parse(r#"{ web: { listen: "not-an-address" } }"#);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Invalid listen address")
        );
    }

    #[test]
    fn test_validate_invalid_path() {
        let result = ExporterConfig::parse(r#"{ web: { path: "no-leading-slash" } }"#);
        assert!(result.unwrap_err().to_string().contains("must start with /"));

        let result = ExporterConfig::parse(r#"{ web: { path: "/health" } }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_path_route_syntax() {
        for path in ["/:metrics", "/metrics/*rest", "/a:b", "/{id}"] {
            let json = format!(r#"{{ web: {{ path: "{}" }} }}"#, path);
            let err = ExporterConfig::parse(&json).unwrap_err();
            assert!(matches!(err, ConfigError::Validation(_)), "{}", path);
        }

        let config = ExporterConfig::parse(r#"{ web: { path: "/nginx-metrics" } }"#).unwrap();
        crate::http::create_router(
            std::sync::Arc::new(crate::MetricRegistry::new(&config.metrics).unwrap()),
            &config.web.path,
        );
    }

    #[test]
    fn test_validate_buckets() {
        assert!(ExporterConfig::parse("{ metrics: { histogram_buckets: [] } }").is_err());
        assert!(ExporterConfig::parse("{ metrics: { histogram_buckets: [1, 1] } }").is_err());
        assert!(ExporterConfig::parse("{ metrics: { histogram_buckets: [2, 1] } }").is_err());
        assert!(ExporterConfig::parse("{ metrics: { histogram_buckets: [0.5, 1] } }").is_ok());
    }

    #[test]
    fn test_validate_quantiles() {
        assert!(ExporterConfig::parse("{ metrics: { summary_quantiles: [1.5] } }").is_err());
        assert!(ExporterConfig::parse("{ metrics: { summary_quantiles: [] } }").is_err());
        assert!(ExporterConfig::parse("{ metrics: { summary_quantiles: [0, 1] } }").is_ok());
    }

    #[test]
    fn test_validate_zero_poll_interval() {
        assert!(ExporterConfig::parse("{ log: { poll_interval_ms: 0 } }").is_err());
        assert!(ExporterConfig::parse("{ log: { channel_capacity: 0 } }").is_err());
    }
}

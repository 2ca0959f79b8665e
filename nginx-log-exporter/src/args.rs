//! Command line arguments.

use std::path::PathBuf;

use clap::Parser;

use crate::config::ExporterConfig;

/// Prometheus exporter for nginx access logs.
#[derive(Parser, Debug, Default)]
#[command(name = "nginx-log-exporter")]
#[command(about = "Export nginx access log metrics to Prometheus")]
#[command(version)]
pub struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long, env = "NGINX_EXPORTER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Access log file to follow (overrides config).
    #[arg(short, long, env = "NGINX_EXPORTER_FILENAME")]
    pub filename: Option<PathBuf>,

    /// nginx log_format of the followed file (overrides config).
    #[arg(long, env = "NGINX_EXPORTER_FORMAT")]
    pub format: Option<String>,

    /// Static label added to every metric, repeatable.
    #[arg(
        short,
        long,
        value_name = "KEY=VALUE",
        value_parser = parse_label,
        value_delimiter = ',',
        env = "NGINX_EXPORTER_LABELS"
    )]
    pub labels: Vec<(String, String)>,

    /// HTTP listen address (overrides config).
    #[arg(long = "web.listen-address", env = "NGINX_EXPORTER_LISTEN_ADDRESS")]
    pub listen_address: Option<String>,

    /// Path under which metrics are served (overrides config).
    #[arg(long = "web.telemetry-path", env = "NGINX_EXPORTER_TELEMETRY_PATH")]
    pub telemetry_path: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "NGINX_EXPORTER_LOG_LEVEL")]
    pub log_level: Option<String>,
}

impl Args {
    /// Load the configuration file, if any, and apply the overrides.
    pub fn load_config(&self) -> Result<ExporterConfig, crate::config::ConfigError> {
        let mut config = match &self.config {
            Some(path) => ExporterConfig::load_from_file(path)?,
            None => ExporterConfig::default(),
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Override configuration values given on the command line.
    pub fn apply(&self, config: &mut ExporterConfig) {
        if let Some(filename) = &self.filename {
            config.log.filename = filename.clone();
        }
        if let Some(format) = &self.format {
            config.log.format = format.clone();
        }
        for (key, value) in &self.labels {
            config.metrics.labels.insert(key.clone(), value.clone());
        }
        if let Some(listen) = &self.listen_address {
            config.web.listen = listen.clone();
        }
        if let Some(path) = &self.telemetry_path {
            config.web.path = path.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }
}

fn parse_label(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

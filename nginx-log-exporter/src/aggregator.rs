//! Turns parsed lines into metric updates.

use nginx_log_format::{FieldError, FormatPlan, ParsedEntry};
use tracing::{debug, warn};

use crate::fields::{FieldMap, LabelSet, LogField};
use crate::metrics::SharedRegistry;

/// Applies parsed lines to the metric registry.
///
/// Each numeric field feeds its own metrics: a field that is absent or not a
/// number skips only those, never the request count.
pub struct Aggregator {
    registry: SharedRegistry,
    fields: FieldMap,
}

impl Aggregator {
    /// Create an aggregator for lines matched by `plan`.
    ///
    /// Known fields the plan does not declare are reported once here and then
    /// skipped silently.
    pub fn new(registry: SharedRegistry, plan: &FormatPlan) -> Self {
        let fields = FieldMap::new(plan);

        for field in fields.missing() {
            warn!(
                field = %field,
                "Log format does not declare field, metrics derived from it stay empty"
            );
        }

        Self { registry, fields }
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    /// Record one matched line.
    pub fn apply(&self, entry: &ParsedEntry<'_>) -> LabelSet {
        let registry = &self.registry;
        let labels = LabelSet::from_entry(&self.fields, entry);

        registry.request_count.with_labels(&labels).increment(1);

        if let Some(bytes) = self.number(entry, LogField::BodyBytesSent) {
            registry.bytes_total.with_labels(&labels).increment(bytes as u64);
        }

        if let Some(seconds) = self.number(entry, LogField::UpstreamResponseTime) {
            registry.upstream_seconds.with_labels(&labels).record(seconds);
            registry
                .upstream_seconds_hist
                .with_labels(&labels)
                .record(seconds);
        }

        if let Some(seconds) = self.number(entry, LogField::RequestTime) {
            registry.response_seconds.with_labels(&labels).record(seconds);
            registry
                .response_seconds_hist
                .with_labels(&labels)
                .record(seconds);
        }

        if let Some(bytes) = self.number(entry, LogField::UpstreamResponseLength) {
            registry.upstream_bytes.with_labels(&labels).increment(bytes as u64);
        }

        if let Some(bytes) = self.number(entry, LogField::BytesSent) {
            registry.response_bytes.with_labels(&labels).increment(bytes as u64);
        }

        labels
    }

    /// Record a line that did not match the format.
    pub fn record_parse_error(&self) {
        self.registry.parse_errors.inc();
    }

    fn number(&self, entry: &ParsedEntry<'_>, field: LogField) -> Option<f64> {
        match self.fields.number(entry, field) {
            Ok(value) => Some(value),
            // Undeclared fields were reported at startup.
            Err(FieldError::Missing { .. }) => None,
            Err(e) => {
                debug!(error = %e, "Skipping metric update");
                self.registry.stats.field_error();
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricsConfig;
    use crate::metrics::MetricRegistry;
    use std::sync::Arc;

    fn aggregator(template: &str) -> (Aggregator, FormatPlan) {
        let registry = Arc::new(MetricRegistry::new(&MetricsConfig::default()).unwrap());
        let plan = FormatPlan::compile(template).unwrap();
        (Aggregator::new(registry, &plan), plan)
    }

    #[test]
    fn test_status_and_request_time() {
        let (aggregator, plan) = aggregator("$status $request_time");
        let entry = plan.parse("200 0.123").unwrap();

        let labels = aggregator.apply(&entry);
        assert_eq!(labels, LabelSet::new("200", ""));

        let registry = aggregator.registry();
        let series = [("status", "200"), ("method", "")];
        assert_eq!(
            registry.sample("nginx_http_response_count_total", &series),
            Some(1.0)
        );

        let median = registry.sample(
            "nginx_http_response_time_seconds",
            &[("status", "200"), ("method", ""), ("quantile", "0.5")],
        );
        assert!(median.is_some_and(|v| (v - 0.123).abs() < 0.001));
        assert_eq!(
            registry.sample("nginx_http_response_time_seconds_count", &series),
            Some(1.0)
        );
        assert_eq!(
            registry.sample("nginx_http_response_time_seconds_hist_sum", &series),
            Some(0.123)
        );

        assert!(registry.bytes_total.is_empty());
        assert!(registry.upstream_seconds.is_empty());
        assert_eq!(registry.parse_errors.get(), 0);
    }

    #[test]
    fn test_parse_failure_counts_only_error() {
        let (aggregator, plan) = aggregator("$status $request_time");
        assert!(plan.parse("abc").is_err());

        aggregator.record_parse_error();

        let registry = aggregator.registry();
        assert_eq!(registry.parse_errors.get(), 1);
        assert_eq!(registry.sample("nginx_parse_errors_total", &[]), Some(1.0));
        assert!(registry.request_count.is_empty());
        assert!(registry.response_seconds.is_empty());
    }

    #[test]
    fn test_method_from_request() {
        let (aggregator, plan) = aggregator(r#"$status "$request""#);
        let entry = plan.parse(r#"200 "GET /x HTTP/1.1""#).unwrap();

        let labels = aggregator.apply(&entry);
        assert_eq!(labels, LabelSet::new("200", "GET"));
        assert_eq!(
            aggregator.registry().sample(
                "nginx_http_response_count_total",
                &[("status", "200"), ("method", "GET")]
            ),
            Some(1.0)
        );
    }

    #[test]
    fn test_unusable_field_skips_only_its_metric() {
        let (aggregator, plan) =
            aggregator("$status $body_bytes_sent $upstream_response_time $request_time");
        let entry = plan.parse("502 - 0.050 0.051").unwrap();

        let labels = aggregator.apply(&entry);
        let registry = aggregator.registry();
        let series = [("status", "502"), ("method", "")];

        assert_eq!(
            registry.sample("nginx_http_response_count_total", &series),
            Some(1.0)
        );
        assert!(!registry.bytes_total.contains(&labels));
        assert_eq!(
            registry.sample("nginx_http_upstream_time_seconds_count", &series),
            Some(1.0)
        );
        assert_eq!(
            registry.sample("nginx_http_response_time_seconds_hist_count", &series),
            Some(1.0)
        );
        assert_eq!(registry.stats.snapshot().field_errors, 1);
        assert_eq!(registry.parse_errors.get(), 0);
    }

    #[test]
    fn test_byte_counters() {
        let (aggregator, plan) = aggregator(
            "$status $body_bytes_sent $bytes_sent $upstream_response_length",
        );

        for line in ["200 100 350 90", "200 20 270 10"] {
            aggregator.apply(&plan.parse(line).unwrap());
        }

        let registry = aggregator.registry();
        let series = [("status", "200"), ("method", "")];
        let value = |name: &str| registry.sample(name, &series);
        assert_eq!(value("nginx_http_response_count_total"), Some(2.0));
        assert_eq!(value("nginx_http_response_bytes_total"), Some(120.0));
        assert_eq!(value("nginx_http_response_bytes"), Some(620.0));
        assert_eq!(value("nginx_http_upstream_bytes"), Some(100.0));
        assert_eq!(registry.stats.snapshot().field_errors, 0);
    }

    #[test]
    fn test_undeclared_fields_are_not_errors() {
        let (aggregator, plan) = aggregator("$request_time");
        aggregator.apply(&plan.parse("0.2").unwrap());

        let registry = aggregator.registry();
        assert!(registry.request_count.contains(&LabelSet::default()));
        assert_eq!(
            registry.sample(
                "nginx_http_response_count_total",
                &[("status", ""), ("method", "")]
            ),
            Some(1.0)
        );
        assert_eq!(registry.stats.snapshot().field_errors, 0);
        assert!(!aggregator.fields().contains(LogField::Status));
    }
}

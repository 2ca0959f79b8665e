//! Sequential line processing: match, then aggregate.

use nginx_log_format::FormatPlan;
use tracing::{debug, info, warn};

use crate::aggregator::Aggregator;
use crate::follower::LineStream;

/// Result of processing a single line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    Recorded,
    Rejected,
}

/// Drives every followed line through the format plan and the aggregator.
pub struct Pipeline {
    plan: FormatPlan,
    aggregator: Aggregator,
}

impl Pipeline {
    pub fn new(plan: FormatPlan, aggregator: Aggregator) -> Self {
        Self { plan, aggregator }
    }

    pub fn plan(&self) -> &FormatPlan {
        &self.plan
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Process one line. Lines that do not match are counted and dropped.
    pub fn process_line(&self, line: &str) -> LineOutcome {
        let stats = &self.aggregator.registry().stats;
        stats.line_received();

        match self.plan.parse(line) {
            Ok(entry) => {
                stats.line_parsed();
                self.aggregator.apply(&entry);
                LineOutcome::Recorded
            }
            Err(e) => {
                warn!(line = %line, error = %e, "Failed to parse log line");
                self.aggregator.record_parse_error();
                LineOutcome::Rejected
            }
        }
    }

    /// Consume `lines` until the follower closes the stream.
    pub async fn run(self, mut lines: LineStream) {
        info!(format = %self.plan.source(), "Processing log lines");

        while let Some(line) = lines.recv().await {
            if self.process_line(&line.text) == LineOutcome::Rejected {
                debug!(offset = line.offset, "Dropped line");
            }
        }

        let stats = self.aggregator.registry().stats.snapshot();
        info!(
            lines_received = stats.lines_received,
            lines_parsed = stats.lines_parsed,
            "Line stream closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricsConfig;
    use crate::fields::LabelSet;
    use crate::follower::LogLine;
    use crate::metrics::MetricRegistry;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn pipeline(template: &str) -> Pipeline {
        let registry = Arc::new(MetricRegistry::new(&MetricsConfig::default()).unwrap());
        let plan = FormatPlan::compile(template).unwrap();
        let aggregator = Aggregator::new(registry, &plan);
        Pipeline::new(plan, aggregator)
    }

    #[test]
    fn test_process_line() {
        let pipeline = pipeline("$status $request_time");

        assert_eq!(pipeline.process_line("200 0.123"), LineOutcome::Recorded);
        assert_eq!(pipeline.process_line("abc"), LineOutcome::Rejected);
        assert_eq!(pipeline.process_line("200"), LineOutcome::Rejected);

        let registry = pipeline.aggregator().registry();
        assert_eq!(registry.parse_errors.get(), 2);
        assert!(registry.request_count.contains(&LabelSet::new("200", "")));
        assert_eq!(
            registry.sample(
                "nginx_http_response_count_total",
                &[("status", "200"), ("method", "")]
            ),
            Some(1.0)
        );

        let stats = registry.stats.snapshot();
        assert_eq!(stats.lines_received, 3);
        assert_eq!(stats.lines_parsed, 1);
    }

    #[tokio::test]
    async fn test_run_until_stream_closes() {
        let pipeline = pipeline(r#"$status "$request" $request_time"#);
        let registry = pipeline.aggregator().registry().clone();
        let (tx, rx) = mpsc::channel(16);

        let lines = [
            r#"200 "GET / HTTP/1.1" 0.010"#,
            r#"404 "GET /missing HTTP/1.1" 0.002"#,
            "garbage",
            r#"200 "POST /form HTTP/1.1" 0.120"#,
            r#"200 "GET /again HTTP/1.1" 0.011"#,
        ];
        for (i, text) in lines.iter().enumerate() {
            tx.send(LogLine {
                text: text.to_string(),
                offset: i as u64,
            })
            .await
            .unwrap();
        }
        drop(tx);

        pipeline.run(rx).await;

        let count = |status: &str, method: &str| {
            registry
                .sample(
                    "nginx_http_response_count_total",
                    &[("status", status), ("method", method)],
                )
                .unwrap_or_default()
        };
        assert_eq!(count("200", "GET"), 2.0);
        assert_eq!(count("404", "GET"), 1.0);
        assert_eq!(count("200", "POST"), 1.0);
        assert_eq!(registry.parse_errors.get(), 1);
        assert_eq!(registry.stats.snapshot().lines_received, 5);
    }
}

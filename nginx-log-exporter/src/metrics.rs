//! The exporter's metric registry.
//!
//! Series live in a non-global [`PrometheusRecorder`] owned by the registry,
//! which renders the text exposition format. Latencies are recorded twice:
//! once into a family rendered as a summary over a rolling window, and once
//! into a `_hist` family rendered with explicit buckets.
//!
//! Every family is keyed by [`LabelSet`]; handles are registered on first use
//! and cached so that per-line updates do not go through the recorder.

use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::{
    Counter, Histogram, Key, KeyName, Label, Level, Metadata, Recorder, SharedString,
};
use metrics_exporter_prometheus::{
    Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder,
};
use parking_lot::RwLock;
use tracing::warn;

use crate::config::MetricsConfig;
use crate::fields::{LABEL_NAMES, LabelSet};
use crate::naming::{sanitize_label_name, sanitize_metric_name};

pub use metrics_exporter_prometheus::BuildError;

/// Families whose name ends with this are rendered as bucketed histograms.
pub const HISTOGRAM_SUFFIX: &str = "_hist";

/// Rolling buckets making up a summary window.
const SUMMARY_BUCKETS: u32 = 5;

fn metadata() -> Metadata<'static> {
    Metadata::new(module_path!(), Level::INFO, Some(module_path!()))
}

/// A metric handle that can be registered with the recorder.
pub trait Series: Clone + Send + Sync {
    fn register(recorder: &PrometheusRecorder, key: &Key) -> Self;

    fn describe(recorder: &PrometheusRecorder, name: &str, help: &'static str);
}

impl Series for Counter {
    fn register(recorder: &PrometheusRecorder, key: &Key) -> Self {
        recorder.register_counter(key, &metadata())
    }

    fn describe(recorder: &PrometheusRecorder, name: &str, help: &'static str) {
        recorder.describe_counter(KeyName::from(name.to_string()), None, SharedString::from(help));
    }
}

impl Series for Histogram {
    fn register(recorder: &PrometheusRecorder, key: &Key) -> Self {
        recorder.register_histogram(key, &metadata())
    }

    fn describe(recorder: &PrometheusRecorder, name: &str, help: &'static str) {
        recorder.describe_histogram(KeyName::from(name.to_string()), None, SharedString::from(help));
    }
}

/// A metric family with one series per [`LabelSet`].
pub struct MetricVec<M: Series> {
    name: String,
    recorder: Arc<PrometheusRecorder>,
    series: RwLock<BTreeMap<LabelSet, M>>,
}

impl<M: Series> MetricVec<M> {
    fn new(recorder: &Arc<PrometheusRecorder>, name: String, help: &'static str) -> Self {
        M::describe(recorder, &name, help);
        Self {
            name,
            recorder: recorder.clone(),
            series: RwLock::new(BTreeMap::new()),
        }
    }

    /// The series for `labels`, registered on first use.
    pub fn with_labels(&self, labels: &LabelSet) -> M {
        if let Some(series) = self.series.read().get(labels) {
            return series.clone();
        }

        self.series
            .write()
            .entry(labels.clone())
            .or_insert_with(|| {
                let pairs = LABEL_NAMES
                    .iter()
                    .zip(labels.values())
                    .map(|(name, value)| Label::new(*name, value.to_string()))
                    .collect::<Vec<_>>();
                M::register(&self.recorder, &Key::from_parts(self.name.clone(), pairs))
            })
            .clone()
    }

    /// Whether the series for `labels` has been used.
    pub fn contains(&self, labels: &LabelSet) -> bool {
        self.series.read().contains_key(labels)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of series in the family.
    pub fn len(&self) -> usize {
        self.series.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.read().is_empty()
    }
}

/// An unlabelled counter that can also be read back.
pub struct Tally {
    count: AtomicU64,
    counter: Counter,
}

impl Tally {
    fn new(recorder: &PrometheusRecorder, name: String, help: &'static str) -> Self {
        Counter::describe(recorder, &name, help);
        let counter = Counter::register(recorder, &Key::from_name(name));
        // Registered up front so the series is exported before the first event.
        counter.increment(0);
        Self {
            count: AtomicU64::new(0),
            counter,
        }
    }

    pub fn inc(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.counter.increment(1);
    }

    pub fn get(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// Counts kept about the processing pipeline itself.
pub struct PipelineStats {
    lines_received: Tally,
    lines_parsed: Tally,
    field_errors: Tally,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub lines_received: u64,
    pub lines_parsed: u64,
    pub field_errors: u64,
}

impl PipelineStats {
    fn new(recorder: &PrometheusRecorder, namespace: &str) -> Self {
        let name = |suffix: &str| format!("{}_exporter_{}", namespace, suffix);
        Self {
            lines_received: Tally::new(
                recorder,
                name("lines_received_total"),
                "Log lines read from the followed file",
            ),
            lines_parsed: Tally::new(
                recorder,
                name("lines_parsed_total"),
                "Log lines that matched the configured format",
            ),
            field_errors: Tally::new(
                recorder,
                name("field_errors_total"),
                "Metric updates skipped because a field was not numeric",
            ),
        }
    }

    pub fn line_received(&self) {
        self.lines_received.inc();
    }

    pub fn line_parsed(&self) {
        self.lines_parsed.inc();
    }

    pub fn field_error(&self) {
        self.field_errors.inc();
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            lines_received: self.lines_received.get(),
            lines_parsed: self.lines_parsed.get(),
            field_errors: self.field_errors.get(),
        }
    }
}

/// All metrics exported by the process.
///
/// Created once at startup and shared by reference; the processing task is
/// the only writer, scrapes only call [`render`](Self::render).
pub struct MetricRegistry {
    namespace: String,
    const_labels: Vec<(String, String)>,
    handle: PrometheusHandle,

    pub request_count: MetricVec<Counter>,
    pub bytes_total: MetricVec<Counter>,
    pub upstream_seconds: MetricVec<Histogram>,
    pub upstream_seconds_hist: MetricVec<Histogram>,
    pub upstream_bytes: MetricVec<Counter>,
    pub response_seconds: MetricVec<Histogram>,
    pub response_seconds_hist: MetricVec<Histogram>,
    pub response_bytes: MetricVec<Counter>,
    pub parse_errors: Tally,

    pub stats: PipelineStats,
}

/// Shared handle to the registry.
pub type SharedRegistry = Arc<MetricRegistry>;

impl MetricRegistry {
    pub fn new(config: &MetricsConfig) -> Result<Self, BuildError> {
        let namespace = sanitize_metric_name(&config.namespace);
        let const_labels = const_labels(&config.labels);

        let window = Duration::from_secs(config.summary_max_age_secs);
        let mut builder = PrometheusBuilder::new()
            .set_quantiles(&config.summary_quantiles)?
            .set_buckets_for_metric(
                Matcher::Suffix(HISTOGRAM_SUFFIX.to_string()),
                &config.histogram_buckets,
            )?
            .set_bucket_duration(window / SUMMARY_BUCKETS)?
            .set_bucket_count(NonZeroU32::new(SUMMARY_BUCKETS).unwrap_or(NonZeroU32::MIN));
        for (key, value) in &const_labels {
            builder = builder.add_global_label(key.clone(), value.clone());
        }

        let recorder = Arc::new(builder.build_recorder());
        let handle = recorder.handle();
        let name = |suffix: &str| format!("{}_{}", namespace, suffix);

        Ok(Self {
            request_count: MetricVec::new(
                &recorder,
                name("http_response_count_total"),
                "Amount of processed HTTP requests",
            ),
            bytes_total: MetricVec::new(
                &recorder,
                name("http_response_bytes_total"),
                "Total amount of transferred bytes",
            ),
            upstream_seconds: MetricVec::new(
                &recorder,
                name("http_upstream_time_seconds"),
                "Time needed by upstream servers to handle requests",
            ),
            upstream_seconds_hist: MetricVec::new(
                &recorder,
                name("http_upstream_time_seconds_hist"),
                "Time needed by upstream servers to handle requests",
            ),
            upstream_bytes: MetricVec::new(
                &recorder,
                name("http_upstream_bytes"),
                "Amount of upstream bytes sent",
            ),
            response_seconds: MetricVec::new(
                &recorder,
                name("http_response_time_seconds"),
                "Time needed by nginx to handle requests",
            ),
            response_seconds_hist: MetricVec::new(
                &recorder,
                name("http_response_time_seconds_hist"),
                "Time needed by nginx to handle requests",
            ),
            response_bytes: MetricVec::new(
                &recorder,
                name("http_response_bytes"),
                "Amount of response bytes sent",
            ),
            parse_errors: Tally::new(
                &recorder,
                name("parse_errors_total"),
                "Total number of log file lines that could not be parsed",
            ),
            stats: PipelineStats::new(&recorder, &namespace),
            handle,
            const_labels,
            namespace,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Static labels attached to every series, sanitized and sorted.
    pub fn const_labels(&self) -> &[(String, String)] {
        &self.const_labels
    }

    /// Render every metric in Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Fold pending histogram samples into their series.
    ///
    /// Must run periodically when scrapes are rare, or samples accumulate.
    pub fn run_upkeep(&self) {
        self.handle.run_upkeep();
    }
}

/// Sanitize static labels, dropping names reserved by the exporter.
fn const_labels(labels: &BTreeMap<String, String>) -> Vec<(String, String)> {
    let mut result: Vec<(String, String)> = Vec::with_capacity(labels.len());

    for (key, value) in labels {
        let name = sanitize_label_name(key);
        if LABEL_NAMES.contains(&name.as_str()) || name == "le" || name == "quantile" {
            warn!(label = %key, "Static label conflicts with a built-in label, ignoring");
            continue;
        }
        if result.iter().any(|(k, _)| k == &name) {
            warn!(label = %key, "Static label duplicates another after sanitizing, ignoring");
            continue;
        }
        result.push((name, value.clone()));
    }

    result.sort_by(|a, b| a.0.cmp(&b.0));
    result
}

/// Value of the sample `name{labels}` in exposition text, labels in any order.
#[cfg(test)]
pub(crate) fn find_sample(body: &str, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
    let mut wanted: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, v))
        .collect();
    wanted.sort();

    body.lines()
        .filter(|line| !line.starts_with('#'))
        .find_map(|line| {
            let (series, value) = line.rsplit_once(' ')?;
            let (series_name, mut series_labels) = match series.split_once('{') {
                Some((n, rest)) => (
                    n,
                    rest.trim_end_matches('}')
                        .split(',')
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect::<Vec<_>>(),
                ),
                None => (series, Vec::new()),
            };
            series_labels.sort();
            (series_name == name && series_labels == wanted)
                .then(|| value.parse().ok())
                .flatten()
        })
}

#[cfg(test)]
impl MetricRegistry {
    /// Rendered value of one series.
    pub(crate) fn sample(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        find_sample(&self.render(), name, labels)
    }
}

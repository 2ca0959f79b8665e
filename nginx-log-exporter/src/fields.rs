//! Log fields the exporter derives metrics from.
//!
//! The format itself is arbitrary; only the fields listed in [`LogField`]
//! feed metrics. Their positions in a [`FormatPlan`] are resolved once so that
//! per-line access is a plain index.

use nginx_log_format::{FieldError, FormatPlan, ParsedEntry};

/// Fields with a meaning for the exported metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogField {
    Status,
    Request,
    BodyBytesSent,
    BytesSent,
    UpstreamResponseTime,
    UpstreamResponseLength,
    RequestTime,
}

impl LogField {
    pub const ALL: [LogField; 7] = [
        Self::Status,
        Self::Request,
        Self::BodyBytesSent,
        Self::BytesSent,
        Self::UpstreamResponseTime,
        Self::UpstreamResponseLength,
        Self::RequestTime,
    ];

    /// The nginx variable name, without `$`.
    pub fn name(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Request => "request",
            Self::BodyBytesSent => "body_bytes_sent",
            Self::BytesSent => "bytes_sent",
            Self::UpstreamResponseTime => "upstream_response_time",
            Self::UpstreamResponseLength => "upstream_response_length",
            Self::RequestTime => "request_time",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for LogField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${}", self.name())
    }
}

/// Positions of the known fields in one compiled plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMap {
    indices: [Option<usize>; LogField::ALL.len()],
}

impl FieldMap {
    pub fn new(plan: &FormatPlan) -> Self {
        let mut indices = [None; LogField::ALL.len()];
        for field in LogField::ALL {
            indices[field.slot()] = plan.field_index(field.name());
        }
        Self { indices }
    }

    pub fn index(&self, field: LogField) -> Option<usize> {
        self.indices[field.slot()]
    }

    pub fn contains(&self, field: LogField) -> bool {
        self.index(field).is_some()
    }

    /// Known fields the plan does not declare.
    pub fn missing(&self) -> impl Iterator<Item = LogField> + '_ {
        LogField::ALL.into_iter().filter(|f| !self.contains(*f))
    }

    /// Raw value of a known field.
    pub fn value<'a>(&self, entry: &ParsedEntry<'a>, field: LogField) -> Option<&'a str> {
        self.index(field).and_then(|i| entry.get(i))
    }

    /// Value of a known field read as a number.
    pub fn number(&self, entry: &ParsedEntry<'_>, field: LogField) -> Result<f64, FieldError> {
        match self.index(field) {
            Some(i) => entry.float_at(i),
            None => Err(FieldError::Missing {
                field: field.name().to_string(),
            }),
        }
    }
}

/// Label names of every metric vector, in key order.
pub const LABEL_NAMES: [&str; 2] = ["status", "method"];

/// Metric vector key derived from one line.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LabelSet {
    pub status: String,
    pub method: String,
}

impl LabelSet {
    pub fn new(status: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            method: method.into(),
        }
    }

    /// Labels for a parsed line.
    ///
    /// `status` is taken verbatim; `method` is the first whitespace separated
    /// word of the request line, whatever it is. Absent fields give "".
    pub fn from_entry(fields: &FieldMap, entry: &ParsedEntry<'_>) -> Self {
        let status = fields.value(entry, LogField::Status).unwrap_or_default();
        let method = fields
            .value(entry, LogField::Request)
            .and_then(|request| request.split_whitespace().next())
            .unwrap_or_default();

        Self::new(status, method)
    }

    /// Values in [`LABEL_NAMES`] order.
    pub fn values(&self) -> [&str; 2] {
        [&self.status, &self.method]
    }
}

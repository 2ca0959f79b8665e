//! Error types for template compilation, line matching and field access.

use std::fmt;

use thiserror::Error;

/// A format template that cannot be compiled into a plan.
///
/// Always fatal: a process configured with a bad template must not start.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("format template is empty")]
    Empty,

    #[error("format template declares no fields")]
    NoFields,

    #[error("'$' at byte {position} is not followed by a field name")]
    EmptyFieldName { position: usize },

    #[error("unterminated '${{' at byte {position}")]
    UnterminatedBrace { position: usize },

    #[error("fields '${first}' and '${second}' are adjacent; a literal separator is required")]
    AdjacentFields { first: String, second: String },

    #[error("field '${name}' is declared more than once")]
    DuplicateField { name: String },
}

/// Why a line did not match a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseFailure {
    /// The line has different text where a literal was expected.
    LiteralMismatch { expected: String },
    /// The line ended before a literal or field could be matched.
    UnexpectedEnd { expected: String },
    /// The text terminating a field never appears in the rest of the line.
    MissingBoundary { field: String, boundary: String },
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LiteralMismatch { expected } => write!(f, "expected {:?}", expected),
            Self::UnexpectedEnd { expected } => {
                write!(f, "line ended while expecting {:?}", expected)
            }
            Self::MissingBoundary { field, boundary } => {
                write!(f, "no {:?} terminating field '{}'", boundary, field)
            }
        }
    }
}

/// A line that does not match the compiled plan.
///
/// Carries the full original line so the failure can be logged with context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line does not match format at byte {position}: {reason}")]
pub struct ParseError {
    line: String,
    position: usize,
    reason: ParseFailure,
}

impl ParseError {
    pub(crate) fn new(line: &str, position: usize, reason: ParseFailure) -> Self {
        Self {
            line: line.to_string(),
            position,
            reason,
        }
    }

    /// The line that failed to match.
    pub fn line(&self) -> &str {
        &self.line
    }

    /// Byte offset in the line where matching failed.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn reason(&self) -> &ParseFailure {
        &self.reason
    }
}

/// A field that cannot be read as requested.
///
/// Recovered locally: only the metric depending on the field is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("field '{field}' is not declared by the format")]
    Missing { field: String },

    #[error("field '{field}' has non-numeric value {value:?}")]
    NotNumeric { field: String, value: String },
}

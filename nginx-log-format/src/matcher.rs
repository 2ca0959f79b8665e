//! Matching of raw log lines against a compiled plan.
//!
//! Literals are anchors: each one must appear verbatim at the cursor. A field
//! takes everything up to its [`Boundary`]. Text left after the last token
//! is ignored. Values are not unescaped, so a
//! quoted field whose value itself contains a quote ends at that first inner
//! quote; this mirrors how nginx writes its logs and is accepted as is.

use crate::compiler::{Boundary, FormatPlan, FormatToken};
use crate::error::{FieldError, ParseError, ParseFailure};

/// Field values extracted from one line.
///
/// Borrows both the line and the plan; values are indexed in the plan's
/// field declaration order.
#[derive(Debug, Clone)]
pub struct ParsedEntry<'a> {
    plan: &'a FormatPlan,
    values: Vec<&'a str>,
}

impl<'a> ParsedEntry<'a> {
    /// Raw value of a field by name.
    pub fn field(&self, name: &str) -> Result<&'a str, FieldError> {
        self.plan
            .field_index(name)
            .map(|index| self.values[index])
            .ok_or_else(|| FieldError::Missing {
                field: name.to_string(),
            })
    }

    /// Value of a field by name, read as a finite float.
    pub fn float_field(&self, name: &str) -> Result<f64, FieldError> {
        let value = self.field(name)?;
        parse_float(name, value)
    }

    /// Raw value of the field at `index`.
    pub fn get(&self, index: usize) -> Option<&'a str> {
        self.values.get(index).copied()
    }

    /// Value of the field at `index`, read as a finite float.
    pub fn float_at(&self, index: usize) -> Result<f64, FieldError> {
        match self.values.get(index) {
            Some(value) => parse_float(&self.plan.field_spec(index).name, value),
            None => Err(FieldError::Missing {
                field: format!("#{}", index),
            }),
        }
    }

    /// `(name, value)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a str)> + '_ {
        self.plan.field_names().zip(self.values.iter().copied())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn parse_float(name: &str, value: &str) -> Result<f64, FieldError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| FieldError::NotNumeric {
            field: name.to_string(),
            value: value.to_string(),
        })
}

impl FormatPlan {
    /// Match one line against this plan.
    ///
    /// Either every field is extracted or the line is rejected; partial
    /// results are never returned.
    pub fn parse<'a>(&'a self, line: &'a str) -> Result<ParsedEntry<'a>, ParseError> {
        let mut values = Vec::with_capacity(self.len_fields());
        let mut cursor = 0;

        for token in self.tokens() {
            let rest = &line[cursor..];

            match token {
                FormatToken::Literal(text) => {
                    if rest.starts_with(text.as_str()) {
                        cursor += text.len();
                    } else if text.starts_with(rest) {
                        return Err(ParseError::new(
                            line,
                            cursor,
                            ParseFailure::UnexpectedEnd {
                                expected: text.clone(),
                            },
                        ));
                    } else {
                        return Err(ParseError::new(
                            line,
                            cursor,
                            ParseFailure::LiteralMismatch {
                                expected: text.clone(),
                            },
                        ));
                    }
                }
                FormatToken::Field(_) => {
                    let spec = self.field_spec(values.len());
                    let end = match &spec.boundary {
                        Boundary::Closing(c) => rest.find(*c),
                        Boundary::Literal(text) => rest.find(text.as_str()),
                        Boundary::EndOfLine => Some(rest.len()),
                    };

                    let Some(end) = end else {
                        let boundary = match &spec.boundary {
                            Boundary::Closing(c) => c.to_string(),
                            Boundary::Literal(text) => text.clone(),
                            Boundary::EndOfLine => String::new(),
                        };
                        let reason = if rest.is_empty() {
                            ParseFailure::UnexpectedEnd { expected: boundary }
                        } else {
                            ParseFailure::MissingBoundary {
                                field: spec.name.clone(),
                                boundary,
                            }
                        };
                        return Err(ParseError::new(line, cursor, reason));
                    };

                    values.push(&rest[..end]);
                    cursor += end;
                }
            }
        }

        // Text after the last token is ignored.
        Ok(ParsedEntry { plan: self, values })
    }
}

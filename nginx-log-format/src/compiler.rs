//! Compilation of format templates into immutable matching plans.
//!
//! A template mixes literal text with `$name` placeholders, exactly like the
//! nginx `log_format` directive:
//!
//! ```text
//! $remote_addr - $remote_user [$time_local] "$request" $status $body_bytes_sent
//! ```
//!
//! The brace form `${name}` separates a placeholder from identifier characters
//! that follow it (`${status}xyz`).

use std::str::FromStr;

use crate::error::ConfigError;

/// One element of a compiled template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatToken {
    Literal(String),
    Field(String),
}

/// Where the value of a field stops in a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Boundary {
    /// The field is wrapped by a quote or bracket pair and the next literal
    /// starts with the closer; the value ends at the first closing character.
    Closing(char),
    /// The value ends at the first occurrence of the following literal.
    Literal(String),
    /// The field is the last token and runs to the end of the line.
    EndOfLine,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FieldSpec {
    pub(crate) name: String,
    pub(crate) boundary: Boundary,
}

/// A compiled, immutable format template.
///
/// Built once at startup and shared read-only by every match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatPlan {
    source: String,
    tokens: Vec<FormatToken>,
    fields: Vec<FieldSpec>,
}

impl FormatPlan {
    /// Compile a template string.
    pub fn compile(template: &str) -> Result<Self, ConfigError> {
        if template.is_empty() {
            return Err(ConfigError::Empty);
        }

        let tokens = tokenize(template)?;
        let fields = resolve_fields(&tokens)?;

        Ok(Self {
            source: template.to_string(),
            tokens,
            fields,
        })
    }

    /// The template this plan was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn tokens(&self) -> &[FormatToken] {
        &self.tokens
    }

    /// Field names in declaration order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Number of fields declared by the template.
    pub fn len_fields(&self) -> usize {
        self.fields.len()
    }

    /// Position of a field in every [`ParsedEntry`](crate::ParsedEntry) of this plan.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// How the value of the field at `index` is delimited.
    pub fn boundary(&self, index: usize) -> Option<&Boundary> {
        self.fields.get(index).map(|f| &f.boundary)
    }

    pub(crate) fn field_spec(&self, index: usize) -> &FieldSpec {
        &self.fields[index]
    }
}

impl FromStr for FormatPlan {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::compile(s)
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Split a template into literal and field tokens, left to right.
fn tokenize(template: &str) -> Result<Vec<FormatToken>, ConfigError> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut chars = template.char_indices().peekable();

    while let Some((position, c)) = chars.next() {
        if c != '$' {
            literal.push(c);
            continue;
        }

        let mut name = String::new();
        if chars.next_if(|&(_, c)| c == '{').is_some() {
            loop {
                match chars.next() {
                    Some((_, '}')) => break,
                    Some((_, c)) if is_ident_char(c) => name.push(c),
                    _ => return Err(ConfigError::UnterminatedBrace { position }),
                }
            }
        } else {
            while let Some((_, c)) = chars.next_if(|&(_, c)| is_ident_char(c)) {
                name.push(c);
            }
        }

        if name.is_empty() {
            return Err(ConfigError::EmptyFieldName { position });
        }

        if literal.is_empty() {
            if let Some(FormatToken::Field(previous)) = tokens.last() {
                return Err(ConfigError::AdjacentFields {
                    first: previous.clone(),
                    second: name,
                });
            }
        } else {
            tokens.push(FormatToken::Literal(std::mem::take(&mut literal)));
        }
        tokens.push(FormatToken::Field(name));
    }

    if !literal.is_empty() {
        tokens.push(FormatToken::Literal(literal));
    }

    Ok(tokens)
}

/// Decide once, per field, how its value is delimited in a line.
fn resolve_fields(tokens: &[FormatToken]) -> Result<Vec<FieldSpec>, ConfigError> {
    let mut fields: Vec<FieldSpec> = Vec::new();

    for (i, token) in tokens.iter().enumerate() {
        let FormatToken::Field(name) = token else {
            continue;
        };

        if fields.iter().any(|f| &f.name == name) {
            return Err(ConfigError::DuplicateField { name: name.clone() });
        }

        let previous = match i.checked_sub(1).map(|p| &tokens[p]) {
            Some(FormatToken::Literal(text)) => Some(text.as_str()),
            _ => None,
        };
        let next = match tokens.get(i + 1) {
            Some(FormatToken::Literal(text)) => Some(text.as_str()),
            _ => None,
        };

        let closing = previous
            .and_then(|text| text.chars().last())
            .and_then(closing_char)
            .filter(|&c| next.is_some_and(|text| text.starts_with(c)));

        let boundary = match (closing, next) {
            (Some(c), _) => Boundary::Closing(c),
            (None, Some(text)) => Boundary::Literal(text.to_string()),
            (None, None) => Boundary::EndOfLine,
        };

        fields.push(FieldSpec {
            name: name.clone(),
            boundary,
        });
    }

    if fields.is_empty() {
        return Err(ConfigError::NoFields);
    }

    Ok(fields)
}

/// The character closing a field opened by `open`, if `open` is an opener.
fn closing_char(open: char) -> Option<char> {
    match open {
        '"' => Some('"'),
        '[' => Some(']'),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(s: &str) -> FormatToken {
        FormatToken::Literal(s.to_string())
    }

    fn field(s: &str) -> FormatToken {
        FormatToken::Field(s.to_string())
    }

    #[test]
    fn test_compile_simple() {
        let plan = FormatPlan::compile("$status $request_time").unwrap();
        assert_eq!(
            plan.tokens(),
            &[field("status"), lit(" "), field("request_time")]
        );
        assert_eq!(
            plan.field_names().collect::<Vec<_>>(),
            vec!["status", "request_time"]
        );
        assert_eq!(plan.boundary(0), Some(&Boundary::Literal(" ".to_string())));
        assert_eq!(plan.boundary(1), Some(&Boundary::EndOfLine));
    }

    #[test]
    fn test_compile_combined_format() {
        let plan = FormatPlan::compile(
            r#"$remote_addr - $remote_user [$time_local] "$request" $status $body_bytes_sent "$http_referer" "$http_user_agent""#,
        )
        .unwrap();

        assert_eq!(plan.len_fields(), 8);
        assert_eq!(plan.tokens()[0], field("remote_addr"));
        assert_eq!(plan.tokens()[1], lit(" - "));

        let time = plan.field_index("time_local").unwrap();
        assert_eq!(plan.boundary(time), Some(&Boundary::Closing(']')));

        let request = plan.field_index("request").unwrap();
        assert_eq!(plan.boundary(request), Some(&Boundary::Closing('"')));

        let agent = plan.field_index("http_user_agent").unwrap();
        assert_eq!(plan.boundary(agent), Some(&Boundary::Closing('"')));

        let status = plan.field_index("status").unwrap();
        assert_eq!(plan.boundary(status), Some(&Boundary::Literal(" ".to_string())));
    }

    #[test]
    fn test_quote_without_matching_close_uses_literal() {
        let plan = FormatPlan::compile(r#""$a-$b""#).unwrap();
        assert_eq!(plan.boundary(0), Some(&Boundary::Literal("-".to_string())));
        assert_eq!(plan.boundary(1), Some(&Boundary::Literal("\"".to_string())));
    }

    #[test]
    fn test_unclosed_last_field_runs_to_end_of_line() {
        let plan = FormatPlan::compile(r#"$status "$request"#).unwrap();
        assert_eq!(plan.boundary(1), Some(&Boundary::EndOfLine));

        let plan = FormatPlan::compile("$status [$time").unwrap();
        assert_eq!(plan.boundary(1), Some(&Boundary::EndOfLine));

        let plan = FormatPlan::compile("$status [$time]").unwrap();
        assert_eq!(plan.boundary(1), Some(&Boundary::Closing(']')));
    }

    #[test]
    fn test_leading_and_trailing_literals() {
        let plan = FormatPlan::compile("<$level> msg=$msg;").unwrap();
        assert_eq!(
            plan.tokens(),
            &[lit("<"), field("level"), lit("> msg="), field("msg"), lit(";")]
        );
    }

    #[test]
    fn test_brace_form() {
        let plan = FormatPlan::compile("${status}ms $rt").unwrap();
        assert_eq!(
            plan.tokens(),
            &[field("status"), lit("ms "), field("rt")]
        );
    }

    #[test]
    fn test_adjacent_fields_rejected() {
        assert_eq!(
            FormatPlan::compile("$a$b").unwrap_err(),
            ConfigError::AdjacentFields {
                first: "a".to_string(),
                second: "b".to_string()
            }
        );
        assert!(matches!(
            FormatPlan::compile("x ${a}${b} y"),
            Err(ConfigError::AdjacentFields { .. })
        ));
    }

    #[test]
    fn test_empty_and_fieldless_templates() {
        assert_eq!(FormatPlan::compile(""), Err(ConfigError::Empty));
        assert_eq!(
            FormatPlan::compile("just text"),
            Err(ConfigError::NoFields)
        );
    }

    #[test]
    fn test_bare_sigil_rejected() {
        assert_eq!(
            FormatPlan::compile("$status $ x"),
            Err(ConfigError::EmptyFieldName { position: 8 })
        );
        assert_eq!(
            FormatPlan::compile("$status $"),
            Err(ConfigError::EmptyFieldName { position: 8 })
        );
    }

    #[test]
    fn test_unterminated_brace() {
        assert_eq!(
            FormatPlan::compile("$a ${status"),
            Err(ConfigError::UnterminatedBrace { position: 3 })
        );
        assert_eq!(
            FormatPlan::compile("$a ${sta tus}"),
            Err(ConfigError::UnterminatedBrace { position: 3 })
        );
    }

    #[test]
    fn test_duplicate_field_rejected() {
        assert_eq!(
            FormatPlan::compile("$a $b $a"),
            Err(ConfigError::DuplicateField {
                name: "a".to_string()
            })
        );
    }

    #[test]
    fn test_from_str() {
        let plan: FormatPlan = "$a $b".parse().unwrap();
        assert_eq!(plan.source(), "$a $b");
        assert_eq!(plan.field_index("b"), Some(1));
        assert_eq!(plan.field_index("c"), None);
    }
}

//! nginx access log format handling.
//!
//! This crate turns an nginx `log_format` template into a reusable plan and
//! applies it to individual access log lines:
//!
//! - [`compiler`] - Template compilation (`FormatPlan`, `FormatToken`)
//! - [`matcher`] - Line matching and field access (`ParsedEntry`)
//! - [`error`] - Error types
//!
//! # Example
//!
//! ```
//! use nginx_log_format::FormatPlan;
//!
//! let plan = FormatPlan::compile(r#"$status "$request" $request_time"#)?;
//! let entry = plan.parse(r#"200 "GET / HTTP/1.1" 0.012"#)?;
//!
//! assert_eq!(entry.field("request")?, "GET / HTTP/1.1");
//! assert_eq!(entry.float_field("request_time")?, 0.012);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod compiler;
pub mod error;
pub mod matcher;

pub use compiler::{Boundary, FormatPlan, FormatToken};
pub use error::{ConfigError, FieldError, ParseError, ParseFailure};
pub use matcher::ParsedEntry;

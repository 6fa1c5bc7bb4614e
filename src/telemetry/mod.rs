//! Structured logging and tracing spans for suite runs.

mod logging;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use spans::{SpanExt, SuiteSpan};

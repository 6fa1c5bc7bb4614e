//! Span utilities for suite tracing.

use tracing::{info_span, Span};

use crate::suite::Status;

/// Fills in the outcome fields of a [`SuiteSpan`].
pub trait SpanExt {
    /// Record the error that aborted a suite run.
    fn record_error(&self, message: &str);

    /// Record the worst step status and step count of a finished suite.
    fn record_outcome(&self, worst: Status, steps: usize, broken: bool);
}

impl SpanExt for Span {
    fn record_error(&self, message: &str) {
        self.record("error.message", message);
    }

    fn record_outcome(&self, worst: Status, steps: usize, broken: bool) {
        self.record("status", worst.as_str());
        self.record("steps", steps);
        self.record("broken", broken);
    }
}

/// Factory for suite-run spans.
pub struct SuiteSpan;

impl SuiteSpan {
    /// Create a span for one suite run.
    ///
    /// Fields included:
    /// - `api`, `version`, `url`: the endpoint under test
    /// - `status`, `steps`, `broken`: filled in by `SpanExt::record_outcome`
    /// - `error.message`: filled in by `SpanExt::record_error`
    pub fn new(api: &str, version: &str, url: &str) -> Span {
        info_span!(
            "suite_run",
            api = %api,
            version = %version,
            url = %url,
            status = tracing::field::Empty,
            steps = tracing::field::Empty,
            broken = tracing::field::Empty,
            error.message = tracing::field::Empty,
        )
    }
}

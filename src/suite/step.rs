//! Validation steps and their status state machine.
//!
//! A step starts `Pending` and moves to exactly one terminal status the
//! first time it is run. Step bodies report expected problems through
//! [`Failure`] and everything else through [`StepError::Fault`] (or by
//! panicking), which always ends as `Error`.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::http::{Request, Response};
use crate::security::{CertificateError, CryptoError, SignatureError};

/// Step outcome, ordered from best to worst. `Pending` sorts last and is
/// never a final result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Success,
    Notice,
    Warning,
    Failure,
    Error,
    Pending,
}

impl Status {
    /// Every terminal status, best first.
    pub const TERMINAL: [Status; 5] =
        [Status::Success, Status::Notice, Status::Warning, Status::Failure, Status::Error];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Success => "SUCCESS",
            Status::Notice => "NOTICE",
            Status::Warning => "WARNING",
            Status::Failure => "FAILURE",
            Status::Error => "ERROR",
            Status::Pending => "PENDING",
        }
    }

    pub fn is_terminal(self) -> bool {
        self != Status::Pending
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A check that did not hold, with the status it should be reported as.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct Failure {
    pub message: String,
    pub status: Status,
    pub response: Option<Response>,
}

impl Failure {
    pub fn new(message: impl Into<String>, status: Status) -> Self {
        Self { message: message.into(), status, response: None }
    }

    pub fn with_response(mut self, response: &Response) -> Self {
        self.response = Some(response.clone());
        self
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    /// Status of the attached server response, if any.
    pub fn response_status(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status)
    }
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Failure(#[from] Failure),
    /// The harness itself could not complete the step.
    #[error("{0}")]
    Fault(String),
}

impl From<SignatureError> for StepError {
    fn from(e: SignatureError) -> Self {
        StepError::Fault(format!("Could not sign the request: {}", e))
    }
}

impl From<CryptoError> for StepError {
    fn from(e: CryptoError) -> Self {
        StepError::Fault(format!("Could not encrypt the request: {}", e))
    }
}

impl From<CertificateError> for StepError {
    fn from(e: CertificateError) -> Self {
        StepError::Fault(format!("Could not generate a client certificate: {}", e))
    }
}

/// What a step body produces: optionally the final server response.
pub type StepResult = Result<Option<Response>, StepError>;

/// Ordered request and response snapshots taken while a step runs.
///
/// Requests go plain body, encoded, signed; responses go raw, verified,
/// decoded. Consecutive identical snapshots are recorded once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshots {
    requests: Vec<Request>,
    responses: Vec<Response>,
}

impl Snapshots {
    pub fn add_request(&mut self, request: &Request) {
        if self.requests.last() != Some(request) {
            self.requests.push(request.clone());
        }
    }

    pub fn add_response(&mut self, response: &Response) {
        if self.responses.last() != Some(response) {
            self.responses.push(response.clone());
        }
    }

    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    pub fn responses(&self) -> &[Response] {
        &self.responses
    }
}

#[derive(Debug, Clone)]
pub struct ValidationStep {
    name: String,
    status: Status,
    message: Option<String>,
    snapshots: Snapshots,
}

impl ValidationStep {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: Status::Pending,
            message: None,
            snapshots: Snapshots::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or("OK")
    }

    pub fn snapshots(&self) -> &Snapshots {
        &self.snapshots
    }

    /// The request as it was sent.
    pub fn request(&self) -> Option<&Request> {
        self.snapshots.requests.last()
    }

    /// The response after verification and decoding.
    pub fn response(&self) -> Option<&Response> {
        self.snapshots.responses.last()
    }

    /// Run `body` once and settle on a terminal status.
    ///
    /// Running a step that already finished returns its status and drops
    /// `body` unexecuted.
    pub fn run<F>(&mut self, body: F) -> Status
    where
        F: FnOnce(&mut Snapshots) -> StepResult,
    {
        if self.status.is_terminal() {
            return self.status;
        }
        debug!(step = %self.name, "running step");
        let outcome = catch_unwind(AssertUnwindSafe(|| body(&mut self.snapshots)));
        match outcome {
            Ok(Ok(response)) => {
                self.status = Status::Success;
                if let Some(response) = response {
                    self.snapshots.add_response(&response);
                }
            }
            Ok(Err(StepError::Failure(failure))) => {
                self.status = match failure.status {
                    Status::Pending => Status::Error,
                    status => status,
                };
                self.message = Some(failure.message);
                if let Some(response) = failure.response {
                    self.snapshots.add_response(&response);
                }
            }
            Ok(Err(StepError::Fault(fault))) => {
                self.status = Status::Error;
                self.message = Some(format!("Error: {}", fault));
            }
            Err(panic) => {
                self.status = Status::Error;
                self.message = Some(format!("Error: {}", panic_message(panic.as_ref())));
            }
        }

        if self.status >= Status::Failure {
            warn!(
                step = %self.name,
                status = %self.status,
                message = %self.message(),
                "step failed"
            );
        } else {
            info!(step = %self.name, status = %self.status, "step finished");
        }
        self.status
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_order_is_total() {
        for pair in Status::TERMINAL.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert!(Status::Error < Status::Pending);
        assert_eq!(Status::TERMINAL.iter().max(), Some(&Status::Error));
    }

    #[test]
    fn test_success_when_body_returns() {
        let mut step = ValidationStep::new("ok");
        assert_eq!(step.status(), Status::Pending);
        assert_eq!(step.run(|_| Ok(None)), Status::Success);
        assert_eq!(step.message(), "OK");
    }

    #[test]
    fn test_failure_sets_status_and_response() {
        let mut step = ValidationStep::new("fails");
        let response = Response::new(404);
        let status = step.run(|_| {
            Err(Failure::new("HTTP 200 expected", Status::Warning).with_response(&response).into())
        });
        assert_eq!(status, Status::Warning);
        assert_eq!(step.message(), "HTTP 200 expected");
        assert_eq!(step.response(), Some(&response));
    }

    #[test]
    fn test_fault_and_panic_are_errors() {
        let mut step = ValidationStep::new("fault");
        assert_eq!(step.run(|_| Err(StepError::Fault("boom".into()))), Status::Error);
        assert_eq!(step.message(), "Error: boom");

        let mut step = ValidationStep::new("panic");
        assert_eq!(step.run(|_| panic!("exploded")), Status::Error);
        assert!(step.message().contains("exploded"));
    }

    #[test]
    fn test_run_twice_is_noop() {
        let mut step = ValidationStep::new("once");
        let mut calls = 0;
        step.run(|_| {
            calls += 1;
            Err(Failure::new("nope", Status::Failure).into())
        });
        let again = step.run(|_| {
            calls += 1;
            Ok(None)
        });
        assert_eq!(again, Status::Failure);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_snapshots_skip_consecutive_duplicates() {
        let mut snapshots = Snapshots::default();
        let request = Request::new(crate::http::Method::GET, "https://example.com/");
        snapshots.add_request(&request);
        snapshots.add_request(&request);
        let mut signed = request.clone();
        signed.put_header("Authorization", "Signature x");
        snapshots.add_request(&signed);
        assert_eq!(snapshots.requests().len(), 2);
        assert_eq!(snapshots.requests().last(), Some(&signed));
    }
}

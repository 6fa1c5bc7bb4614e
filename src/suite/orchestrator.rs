//! Engine entry point and the sequential step orchestrator.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use super::descriptor::{SuiteDescriptor, SuiteRegistry};
use super::state::SuiteState;
use super::step::{panic_message, Snapshots, Status, StepError, StepResult, ValidationStep};
use super::summary::SuiteReport;
use crate::combination::{Combination, DeclaredSecurity};
use crate::config::EngineConfig;
use crate::document::DocumentValidator;
use crate::http::Transport;
use crate::registry::Registry;
use crate::security::{Credentials, HttpSecurityDescription};
use crate::telemetry::{SpanExt, SuiteSpan};
use crate::version::SemanticVersion;

/// Name of the synthetic step recorded when the driving loop itself fails.
pub const UNEXPECTED_ERROR_STEP: &str = "Unexpected error, please contact the developers.";

/// Raised when a step that had to succeed did not; stops the current suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("a required step did not succeed")]
pub struct SuiteBroken;

#[derive(Debug, Error)]
pub enum SuiteError {
    #[error(transparent)]
    Broken(#[from] SuiteBroken),
    #[error("{0}")]
    Unexpected(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("no validation suite registered for {api} {version}")]
    UnknownSuite { api: String, version: SemanticVersion },
}

/// What to validate.
#[derive(Debug, Clone)]
pub struct RunParams {
    pub api: String,
    pub version: SemanticVersion,
    pub url: String,
    /// Run only combinations matching this selector.
    pub security: Option<HttpSecurityDescription>,
    /// Declared security support; looked up in the registry when absent.
    pub declared: Option<DeclaredSecurity>,
}

impl RunParams {
    pub fn new(api: impl Into<String>, version: SemanticVersion, url: impl Into<String>) -> Self {
        Self { api: api.into(), version, url: url.into(), security: None, declared: None }
    }

    pub fn with_security(mut self, security: HttpSecurityDescription) -> Self {
        self.security = Some(security);
        self
    }

    pub fn with_declared(mut self, declared: DeclaredSecurity) -> Self {
        self.declared = Some(declared);
        self
    }
}

/// Shared collaborators for suite runs. Read-only, so one engine can drive
/// independent suites on separate threads.
pub struct Engine {
    transport: Arc<dyn Transport>,
    validator: Arc<dyn DocumentValidator>,
    registry: Arc<dyn Registry>,
    credentials: Arc<Credentials>,
    config: EngineConfig,
    suites: SuiteRegistry,
}

impl Engine {
    pub fn new(
        transport: Arc<dyn Transport>,
        validator: Arc<dyn DocumentValidator>,
        registry: Arc<dyn Registry>,
        credentials: Arc<Credentials>,
    ) -> Self {
        Self {
            transport,
            validator,
            registry,
            credentials,
            config: EngineConfig::default(),
            suites: SuiteRegistry::with_defaults(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_suites(mut self, suites: SuiteRegistry) -> Self {
        self.suites = suites;
        self
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn validator(&self) -> &dyn DocumentValidator {
        self.validator.as_ref()
    }

    pub fn registry(&self) -> &dyn Registry {
        self.registry.as_ref()
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn suites(&self) -> &SuiteRegistry {
        &self.suites
    }

    /// Run the suite registered for `params.api` / `params.version`.
    pub fn run(&self, params: &RunParams) -> Result<SuiteReport, EngineError> {
        let descriptor = self.suites.find(&params.api, &params.version).ok_or_else(|| {
            EngineError::UnknownSuite { api: params.api.clone(), version: params.version.clone() }
        })?;
        let mut state = SuiteState::new(
            params.url.clone(),
            descriptor.api_name.clone(),
            params.version.clone(),
            descriptor.response_document.clone(),
        );
        state.identifier_element = descriptor.identifier_element.map(String::from);
        state.value_element = descriptor.value_element.map(String::from);
        state.declared = params.declared.clone();
        Ok(Orchestrator::new(self, state).run(descriptor, params.security.as_ref()))
    }
}

/// What a step body sees: the engine, the suite state, and the step's own
/// snapshot log.
pub struct StepScope<'a> {
    pub(crate) engine: &'a Engine,
    pub(crate) state: &'a mut SuiteState,
    pub(crate) snapshots: &'a mut Snapshots,
}

impl<'a> StepScope<'a> {
    pub fn engine(&self) -> &'a Engine {
        self.engine
    }

    pub fn state(&self) -> &SuiteState {
        self.state
    }

    pub fn state_mut(&mut self) -> &mut SuiteState {
        self.state
    }

    pub fn snapshots(&mut self) -> &mut Snapshots {
        self.snapshots
    }
}

/// Appends and runs steps strictly in order, owning the suite state.
pub struct Orchestrator<'e> {
    engine: &'e Engine,
    state: SuiteState,
    steps: Vec<ValidationStep>,
}

impl<'e> Orchestrator<'e> {
    pub fn new(engine: &'e Engine, state: SuiteState) -> Self {
        Self { engine, state, steps: Vec::new() }
    }

    pub fn engine(&self) -> &'e Engine {
        self.engine
    }

    pub fn state(&self) -> &SuiteState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut SuiteState {
        &mut self.state
    }

    pub fn steps(&self) -> &[ValidationStep] {
        &self.steps
    }

    /// Append a step and run it. With `require_success`, anything but
    /// SUCCESS breaks the suite.
    pub fn add_and_run<F>(
        &mut self,
        require_success: bool,
        name: impl Into<String>,
        body: F,
    ) -> Result<Status, SuiteBroken>
    where
        F: FnOnce(&mut StepScope<'_>) -> StepResult,
    {
        let threshold = require_success.then_some(Status::Notice);
        self.push_and_run(ValidationStep::new(name), threshold, body)
    }

    fn push_and_run<F>(
        &mut self,
        mut step: ValidationStep,
        threshold: Option<Status>,
        body: F,
    ) -> Result<Status, SuiteBroken>
    where
        F: FnOnce(&mut StepScope<'_>) -> StepResult,
    {
        let engine = self.engine;
        let state = &mut self.state;
        let status = step.run(|snapshots| {
            let mut scope = StepScope { engine, state, snapshots };
            body(&mut scope)
        });
        self.steps.push(step);
        match threshold {
            Some(threshold) if status >= threshold => {
                info!(status = %status, "required step did not succeed, suite broken");
                Err(SuiteBroken)
            }
            _ => Ok(status),
        }
    }

    /// Run setup steps, then every combination step for each combination
    /// matching `selector`. Never fails: the report holds whatever ran.
    pub fn run(
        mut self,
        descriptor: &SuiteDescriptor,
        selector: Option<&HttpSecurityDescription>,
    ) -> SuiteReport {
        let span = SuiteSpan::new(
            &descriptor.api_name,
            &descriptor.version.to_string(),
            &self.state.url,
        );
        let _guard = span.enter();

        let outcome = catch_unwind(AssertUnwindSafe(|| self.drive(descriptor, selector)));
        let unexpected = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(SuiteError::Broken(_))) => {
                self.state.broken = true;
                None
            }
            Ok(Err(SuiteError::Unexpected(message))) => Some(message),
            Err(panic) => Some(panic_message(panic.as_ref())),
        };
        if let Some(message) = unexpected {
            span.record_error(&message);
            self.push_unexpected(message);
        }

        let report = SuiteReport::new(self.steps, self.state.broken);
        span.record_outcome(report.worst(), report.steps().len(), report.broken());
        report
    }

    fn drive(
        &mut self,
        descriptor: &SuiteDescriptor,
        selector: Option<&HttpSecurityDescription>,
    ) -> Result<(), SuiteError> {
        for setup in &descriptor.setup_steps {
            setup(self, descriptor)?;
        }

        let combinations: Vec<Combination> = self
            .state
            .combinations
            .iter()
            .filter(|c| selector.map_or(true, |s| c.matches(s)))
            .cloned()
            .collect();
        if let (true, Some(selector)) = (combinations.is_empty(), selector) {
            return Err(SuiteError::Unexpected(format!(
                "Security {} is not supported by this endpoint.",
                selector
            )));
        }

        for combination in &combinations {
            for step in &descriptor.combination_steps {
                step(self, combination)?;
            }
        }
        Ok(())
    }

    fn push_unexpected(&mut self, message: String) {
        warn!(error = %message, "suite aborted by an unexpected error");
        let mut step = ValidationStep::new(UNEXPECTED_ERROR_STEP);
        step.run(|_| Err(StepError::Fault(message)));
        self.steps.push(step);
    }
}

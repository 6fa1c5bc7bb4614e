//! Setup steps run once per suite, before any combination.

use std::sync::Arc;

use chrono::Utc;

use super::descriptor::{CombinationSource, SuiteDescriptor};
use super::orchestrator::{Orchestrator, SuiteError};
use super::step::{Failure, Status, StepResult};
use crate::combination::{generate, Combination, GeneratedMatrix};
use crate::http::UrlParts;

pub const FRESHNESS_STEP: &str = "Check if our client credentials have been served long enough.";
pub const HTTPS_STEP: &str = "Verifying the format of the URL. Expecting a valid HTTPS-scheme URL.";
pub const REGISTRATION_STEP: &str = "Verifying if the URL is properly registered.";
pub const SECURITY_STEP: &str =
    "Querying for supported security methods. Validating http-security integrity.";

/// NOTICE while our TLS credentials may not have reached every registry
/// cache yet.
pub fn credentials_freshness(
    orchestrator: &mut Orchestrator<'_>,
    _descriptor: &SuiteDescriptor,
) -> Result<(), SuiteError> {
    orchestrator.add_and_run(false, FRESHNESS_STEP, |scope| {
        let window = scope.config().credentials_freshness;
        if scope.credentials().tls.is_fresh(window, Utc::now()) {
            return Err(Failure::new(
                format!(
                    "Our client credentials are quite fresh. This means that many APIs will \
                     (correctly) return error responses in places where we expect HTTP 200. \
                     This notice will disappear once our credentials are {} minutes old.",
                    window.as_secs() / 60
                ),
                Status::Notice,
            )
            .into());
        }
        Ok(None)
    })?;
    Ok(())
}

pub fn https_scheme(
    orchestrator: &mut Orchestrator<'_>,
    _descriptor: &SuiteDescriptor,
) -> Result<(), SuiteError> {
    orchestrator.add_and_run(true, HTTPS_STEP, |scope| {
        let parts = UrlParts::parse(&scope.state().url).map_err(|e| {
            Failure::new(format!("Exception while parsing URL format: {}", e), Status::Failure)
        })?;
        if parts.scheme != "https" {
            return Err(Failure::new("It needs to be HTTPS.", Status::Failure).into());
        }
        Ok(None)
    })?;
    Ok(())
}

/// Exactly one registry entry must match the URL and version. Its server
/// keys and declared security are kept in the suite state.
pub fn registration(
    orchestrator: &mut Orchestrator<'_>,
    _descriptor: &SuiteDescriptor,
) -> Result<(), SuiteError> {
    orchestrator.add_and_run(true, REGISTRATION_STEP, |scope| {
        let registry = scope.engine().registry();
        let state = scope.state_mut();
        let mut entries = registry.find_api_entries(&state.api, &state.url, &state.version);
        match entries.len() {
            0 => Err(Failure::new(
                format!(
                    "Could not find this URL and version in the Registry Catalogue. Make sure \
                     that it is properly registered (as declared in API's `manifest-entry.xsd` \
                     file): {}",
                    state.url
                ),
                Status::Failure,
            )
            .into()),
            1 => {
                let entry = entries.remove(0);
                state.server_keys = registry.server_keys_covering(&entry);
                if state.declared.is_none() {
                    state.declared = Some(entry.security.clone());
                }
                state.matched_entry = Some(Arc::new(entry));
                Ok(None)
            }
            n => Err(Failure::new(
                format!("Multiple ({}) API entries found for this URL and version.", n),
                Status::Failure,
            )
            .into()),
        }
    })?;
    Ok(())
}

/// Build the combination list. Generated suites report the generator's
/// advisories as a step; fixed suites add no step.
pub fn security_methods(
    orchestrator: &mut Orchestrator<'_>,
    descriptor: &SuiteDescriptor,
) -> Result<(), SuiteError> {
    match descriptor.combinations {
        CombinationSource::Fixed(codes) => {
            let state = orchestrator.state_mut();
            let entry = state.matched_entry.clone();
            state.combinations = codes
                .iter()
                .map(|code| Combination::from_code(code, state.url.clone(), entry.clone()))
                .collect::<Result<_, _>>()
                .map_err(|e| SuiteError::Unexpected(e.to_string()))?;
            Ok(())
        }
        CombinationSource::Generated => {
            orchestrator.add_and_run(false, SECURITY_STEP, |scope| {
                let state = scope.state_mut();
                let declared = state.declared.clone().unwrap_or_default();
                let mut matrix = generate(
                    &declared,
                    &state.url,
                    state.matched_entry.clone(),
                    &descriptor.http_methods,
                );
                if let Some(advisories) = descriptor.advisories {
                    advisories(&declared, &mut matrix);
                }
                state.combinations = matrix.combinations.clone();
                check_auth_errors(&matrix)
            })?;
            Ok(())
        }
    }
}

/// Fold generator advisories into one step outcome: ERROR if there are
/// errors, else WARNING for warnings, else NOTICE for notices.
pub fn check_auth_errors(matrix: &GeneratedMatrix) -> StepResult {
    let sections = [
        ("Errors", &matrix.errors, Status::Error),
        ("Warnings", &matrix.warnings, Status::Warning),
        ("Notices", &matrix.notices, Status::Notice),
    ];
    let mut message = String::new();
    let mut status = Status::Success;
    for (title, items, severity) in sections {
        if items.is_empty() {
            continue;
        }
        status = status.max(severity);
        message.push_str(title);
        message.push_str(":\n");
        for item in items {
            message.push_str(&format!("- {}\n", item));
        }
        message.push('\n');
    }
    if status == Status::Success {
        Ok(None)
    } else {
        Err(Failure::new(message, status).into())
    }
}

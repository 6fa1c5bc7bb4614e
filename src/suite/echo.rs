//! Echo API suites: the endpoint repeats the `echo` values it receives and
//! lists the institutions covered by the caller's credentials.

use super::catalog::{catalog, run_check};
use super::descriptor::{default_setup_steps, CombinationSource, SuiteDescriptor};
use super::orchestrator::{Orchestrator, SuiteError};
use super::step::{Failure, Status, StepResult};
use crate::combination::{Combination, DeclaredSecurity, GeneratedMatrix};
use crate::document::DocumentType;
use crate::http::{append_query, comma_separated_tokens, Method};
use crate::security::ewp_rsa_aes::CONTENT_CODING;
use crate::security::ClientAuth;
use crate::version::SemanticVersion;

pub const API_NAME: &str = "echo";

/// Echo 1.0.0 predates security declarations.
pub const V1_COMBINATIONS: &[&str] = &["GATTT", "PATTT", "GSTTT", "PSTTT"];

const ECHO_ABA: &str = "echo=a&echo=b&echo=a";
const ABA: [&str; 3] = ["a", "b", "a"];

fn descriptor(
    version: SemanticVersion,
    document: DocumentType,
    combinations: CombinationSource,
) -> SuiteDescriptor {
    SuiteDescriptor {
        api_name: API_NAME.to_string(),
        version,
        response_document: document,
        identifier_element: Some("hei-id"),
        value_element: Some("echo"),
        http_methods: vec![Method::GET, Method::POST],
        combinations,
        setup_steps: default_setup_steps(),
        combination_steps: vec![positive_steps, edge_cases],
        advisories: None,
    }
}

pub fn v1() -> SuiteDescriptor {
    descriptor(
        SemanticVersion::new(1, 0, 0),
        DocumentType::EchoResponseV1,
        CombinationSource::Fixed(V1_COMBINATIONS),
    )
}

pub fn v2() -> SuiteDescriptor {
    SuiteDescriptor {
        advisories: Some(advisories),
        ..descriptor(
            SemanticVersion::new(2, 0, 0),
            DocumentType::EchoResponseV2,
            CombinationSource::Generated,
        )
    }
}

pub fn advisories(declared: &DeclaredSecurity, matrix: &mut GeneratedMatrix) {
    if declared.supports_client_auth(ClientAuth::None) {
        matrix.warnings.push(
            "Anonymous Client Authentication SHOULD NOT be enabled for Echo API.".to_string(),
        );
    }
}

/// Requests a conforming endpoint must answer properly. Anonymous
/// combinations are covered by the edge cases only.
pub fn positive_steps(
    orchestrator: &mut Orchestrator<'_>,
    c: &Combination,
) -> Result<(), SuiteError> {
    if c.client_auth() == ClientAuth::None {
        return Ok(());
    }
    if *c.http_method() == Method::POST {
        for method in [Method::PUT, Method::DELETE] {
            unsupported_method(orchestrator, c, method)?;
        }
        orchestrator.add_and_run(
            false,
            format!(
                "Trying {} with a list of echo values [a, b, a]. Expecting to receive a valid \
                 HTTP 200 response with the same list of echo values.",
                c
            ),
            |scope| {
                let request = scope.create_valid_request(c, Some(ECHO_ABA))?;
                let expectation = scope.expectation(&ABA);
                scope.make_request_and_expect_http200(c, &request, &expectation)
            },
        )?;
        orchestrator.add_and_run(
            false,
            format!(
                "Trying {} with a POST request with a list of echo values [a, b, a], plus an \
                 additional GET echo=c&echo=c parameters. Expecting the GET parameters to be \
                 ignored. (It's a POST request, so all parameters are passed via POST body.)",
                c
            ),
            |scope| {
                let mut request = scope.create_valid_request(c, Some(ECHO_ABA))?;
                request.url = append_query(&request.url, "echo=c&echo=c");
                scope.sign(&mut request, c.client_auth())?;
                let expectation = scope.expectation(&ABA);
                scope.make_request_and_expect_http200(c, &request, &expectation)
            },
        )?;
        orchestrator.add_and_run(
            false,
            format!(
                "Trying {} with additional \"gzip\" added in Accept-Encoding. Expecting the \
                 same response, but preferably gzipped.",
                c
            ),
            |scope| gzip_body(scope, c),
        )?;
    } else {
        orchestrator.add_and_run(
            false,
            format!(
                "Trying {} with a list of echo values [a, b, a]. Expecting to receive a valid \
                 HTTP 200 response with the same list of echo values.",
                c
            ),
            |scope| {
                let with_query = c.with_changed_url(append_query(c.url(), ECHO_ABA));
                let request = scope.create_valid_request(&with_query, None)?;
                let expectation = scope.expectation(&ABA);
                scope.make_request_and_expect_http200(c, &request, &expectation)
            },
        )?;
    }
    Ok(())
}

fn unsupported_method(
    orchestrator: &mut Orchestrator<'_>,
    c: &Combination,
    method: Method,
) -> Result<(), SuiteError> {
    orchestrator.add_and_run(
        false,
        format!(
            "Trying {} with a {} request. Expecting to receive a valid HTTP 405 error response.",
            c, method
        ),
        |scope| {
            let request = scope.create_valid_request(&c.with_changed_http_method(method), None)?;
            scope.make_request_and_expect_error(c, &request, &[405])
        },
    )?;
    Ok(())
}

fn gzip_body(scope: &mut super::orchestrator::StepScope<'_>, c: &Combination) -> StepResult {
    let mut request = scope.create_valid_request(c, Some(ECHO_ABA))?;
    let accept = match request.header("Accept-Encoding") {
        Some(existing) => format!("gzip, {}", existing),
        None => "gzip".to_string(),
    };
    request.put_header("Accept-Encoding", accept);
    scope.sign(&mut request, c.client_auth())?;

    let response = scope.make_request(&request)?;
    let codings: Vec<String> = comma_separated_tokens(response.header("Content-Encoding"))
        .into_iter()
        .map(|coding| coding.to_ascii_lowercase())
        .collect();
    let gzip_index = codings.iter().position(|coding| coding == "gzip");
    let encryption_index = codings.iter().position(|coding| coding == CONTENT_CODING);

    let expectation = scope.expectation(&ABA);
    let decoded = scope.expect_http200(c, &request, &response, &expectation)?;

    match (gzip_index, encryption_index) {
        (None, _) => Err(Failure::new(
            "The client explicitly accepted gzip, but the server didn't compress its response. \
             That's not an error, but it might be useful to support gzip encoding to save \
             bandwidth.",
            Status::Notice,
        )
        .with_response(&decoded)
        .into()),
        (Some(gzip), Some(encryption)) if gzip > encryption => Err(Failure::new(
            "The response was valid, but the order of its encodings was \"weird\". Your response \
             was first encrypted, and gzipped later. (Gzipping encrypted content doesn't work \
             well, you should switch the order of your encoders)",
            Status::Warning,
        )
        .with_response(&decoded)
        .into()),
        _ => Ok(Some(decoded)),
    }
}

/// Every catalog check that applies to `c`.
pub fn edge_cases(orchestrator: &mut Orchestrator<'_>, c: &Combination) -> Result<(), SuiteError> {
    for check in catalog() {
        run_check(orchestrator, &check, c)?;
    }
    Ok(())
}

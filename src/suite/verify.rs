//! Request construction and response verification shared by every step.
//!
//! These run inside a step body through [`StepScope`]. Each one records
//! request and response snapshots as it goes and reports problems as
//! [`Failure`]s carrying the status they should be reported with.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::seq::SliceRandom;
use tracing::debug;

use super::orchestrator::StepScope;
use super::step::{Failure, Status, StepError, StepResult};
use crate::combination::Combination;
use crate::config::EngineConfig;
use crate::document::{format_errors, DocumentType, ParsedDocument};
use crate::http::{comma_separated_tokens, Method, MethodExt, Request, Response, TransportError};
use crate::security::decoding::ResponseDecoder;
use crate::security::ewp_rsa_aes::{RequestEncryptor, CONTENT_CODING};
use crate::security::httpsig::{Challenge, ALGORITHM, REQUIRED_REQUEST_HEADERS};
use crate::security::response_auth::HttpSigResponseVerifier;
use crate::security::{
    signer_for, ClientAuth, Credentials, RequestEncryption, RequestSigner, ResponseEncryption,
    ServerAuth,
};

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// `Accept-Encoding` sent when encrypted responses are wanted.
pub const ENCRYPTED_ACCEPT_ENCODING: &str = "ewp-rsa-aes128gcm, identity;q=0.1";

const SCHEMA_OK_PREFIX: &str =
    "The response has proper HTTP status and it passed the schema validation. However, ";

/// A set of identifiers a successful response must list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierSet {
    pub element: String,
    pub expected: Vec<String>,
    /// Every expected identifier must be present, not only a subset.
    pub superset: bool,
}

/// Values a successful response must repeat back, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedValues {
    pub element: String,
    pub expected: Vec<String>,
}

/// What `expect_http200` checks beyond the status code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseExpectation {
    pub document: DocumentType,
    pub identifier_sets: Vec<IdentifierSet>,
    pub ordered_values: Option<OrderedValues>,
}

fn bracketed(values: &[String]) -> String {
    format!("[{}]", values.join(", "))
}

fn notices_failure(notices: &[String]) -> Option<Failure> {
    if notices.is_empty() {
        return None;
    }
    let mut message = String::from("Notices:\n");
    for notice in notices {
        message.push_str(&format!("- {}\n", notice));
    }
    Some(Failure::new(message, Status::Notice))
}

impl<'a> StepScope<'a> {
    pub fn credentials(&self) -> &'a Credentials {
        self.engine.credentials()
    }

    pub fn config(&self) -> &'a EngineConfig {
        self.engine.config()
    }

    /// Send `request` and return the raw response.
    pub fn make_request(&mut self, request: &Request) -> Result<Response, StepError> {
        self.snapshots.add_request(request);
        let timeout = self.config().request_timeout;
        match self.engine.transport().send(request, timeout) {
            Ok(response) => {
                self.snapshots.add_response(&response);
                Ok(response)
            }
            Err(TransportError::Timeout(elapsed)) => {
                debug!(url = %request.url, ?elapsed, "request timed out");
                Err(Failure::new(
                    format!(
                        "Timeout when retrieving {} response from url {}.",
                        request.method, request.url
                    ),
                    Status::Error,
                )
                .into())
            }
            Err(e @ TransportError::Io(_)) => Err(Failure::new(
                format!("Problems retrieving response from server: {}", e),
                Status::Error,
            )
            .into()),
        }
    }

    /// Apply `signer`, snapshotting the request before and after.
    pub fn sign_with(
        &mut self,
        request: &mut Request,
        signer: &dyn RequestSigner,
    ) -> Result<(), StepError> {
        self.snapshots.add_request(request);
        signer.sign(request)?;
        self.snapshots.add_request(request);
        Ok(())
    }

    /// Sign with our valid credentials for `client_auth`.
    pub fn sign(
        &mut self,
        request: &mut Request,
        client_auth: ClientAuth,
    ) -> Result<(), StepError> {
        let signer = signer_for(client_auth, self.credentials()).ok_or_else(|| {
            StepError::Fault(format!(
                "No credentials available for {:?} client authentication.",
                client_auth
            ))
        })?;
        self.sign_with(request, signer.as_ref())
    }

    /// A random server key covering the API, used as request recipient.
    pub fn request_recipient(&self) -> Result<rsa::RsaPublicKey, StepError> {
        self.state
            .server_keys
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| {
                StepError::Fault(
                    "No server keys cover this API, cannot encrypt the request.".to_string(),
                )
            })
    }

    /// A request that passes every check `combination` implies.
    pub fn create_valid_request(
        &mut self,
        combination: &Combination,
        body: Option<&str>,
    ) -> Result<Request, StepError> {
        let mut request = Request::new(combination.http_method().clone(), combination.url());
        if let Some(body) = body {
            request.set_body(body.as_bytes().to_vec());
        }
        if combination.http_method().has_body() {
            request.put_header("Content-Type", FORM_CONTENT_TYPE);
        }
        self.snapshots.add_request(&request);

        if combination.request_encryption() == RequestEncryption::EwpRsaAes {
            if *combination.http_method() == Method::GET {
                return Err(StepError::Fault(
                    "GET requests cannot carry an encrypted body.".to_string(),
                ));
            }
            let recipient = self.request_recipient()?;
            RequestEncryptor::new(recipient).encode(&mut request)?;
            self.snapshots.add_request(&request);
        }

        if combination.server_auth() == ServerAuth::HttpSig {
            request.put_header("Want-Digest", "SHA-256");
            request.put_header("Accept-Signature", ALGORITHM);
        }

        if combination.response_encryption() == ResponseEncryption::EwpRsaAes {
            request.put_header("Accept-Encoding", ENCRYPTED_ACCEPT_ENCODING);
            if combination.client_auth() != ClientAuth::HttpSig {
                let key = STANDARD.encode(self.credentials().client.public_key_der());
                request.put_header("Accept-Response-Encryption-Key", key);
            }
        }

        self.sign(&mut request, combination.client_auth())?;
        Ok(request)
    }

    /// Server authentication and decoding every response goes through.
    /// Returns the decoded response and the notices collected on the way.
    pub fn decode_and_verify_commons(
        &mut self,
        combination: &Combination,
        request: &Request,
        response: &Response,
    ) -> Result<(Response, Vec<String>), StepError> {
        let mut notices = Vec::new();
        self.snapshots.add_response(response);

        match combination.server_auth() {
            ServerAuth::TlsCert => {
                if response.header("Signature").is_some() {
                    notices.push(
                        "Response contains the Signature header, even though the client didn't \
                         ask for it. In general, there's nothing wrong with that, but you might \
                         want to tweak your implementation to save some computing time."
                            .to_string(),
                    );
                }
            }
            ServerAuth::HttpSig => {
                HttpSigResponseVerifier::new(&self.state.server_keys)
                    .verify(request, response)
                    .map_err(|e| Failure::new(e.0, Status::Failure).with_response(response))?;
                self.snapshots.add_response(response);
            }
        }

        let keys = self.credentials().decryption_keys();
        let mut decoder = ResponseDecoder::new(&keys, request.header("Accept-Encoding"));
        if combination.response_encryption() == ResponseEncryption::EwpRsaAes {
            decoder = decoder.require(CONTENT_CODING);
        }
        let decoded = decoder
            .decode(response)
            .map_err(|e| Failure::new(e.0, Status::Failure).with_response(response))?;
        self.snapshots.add_response(&decoded);
        Ok((decoded, notices))
    }

    /// Check that `response` is a proper error response with one of `codes`.
    ///
    /// A status in the same hundreds class as `codes[0]` is a WARNING, any
    /// other is reported as `failure_status`.
    pub fn expect_error(
        &mut self,
        combination: &Combination,
        request: &Request,
        response: &Response,
        codes: &[u16],
        failure_status: Status,
    ) -> Result<Response, StepError> {
        let (decoded, notices) = self.decode_and_verify_commons(combination, request, response)?;

        if !codes.contains(&decoded.status) {
            let expected = codes
                .iter()
                .map(|c| format!("HTTP {}", c))
                .collect::<Vec<_>>()
                .join(" or ");
            let message =
                format!("{} expected, but HTTP {} received.", expected, decoded.status);
            let status = match codes.first() {
                Some(first) if first / 100 == decoded.status / 100 => Status::Warning,
                _ => failure_status,
            };
            return Err(Failure::new(message, status).with_response(&decoded).into());
        }

        let report = self
            .engine
            .validator()
            .validate(&decoded.body, &DocumentType::ErrorResponse);
        if !report.valid {
            return Err(Failure::new(
                format!(
                    "HTTP response status was okay, but the content has failed Schema \
                     validation. It is recommended to return a proper <error-response> in case \
                     of errors. {}",
                    format_errors(&report.errors)
                ),
                Status::Warning,
            )
            .with_response(&decoded)
            .into());
        }

        if decoded.status == 401 {
            if let Some(problem) = unauthorized_problem(&decoded) {
                return Err(Failure::new(problem, Status::Warning).with_response(&decoded).into());
            }
        }

        if let Some(failure) = notices_failure(&notices) {
            return Err(failure.with_response(&decoded).into());
        }
        Ok(decoded)
    }

    /// Check that `response` is a valid HTTP 200 meeting `expectation`.
    pub fn expect_http200(
        &mut self,
        combination: &Combination,
        request: &Request,
        response: &Response,
        expectation: &ResponseExpectation,
    ) -> Result<Response, StepError> {
        let (decoded, notices) = self.decode_and_verify_commons(combination, request, response)?;
        let fail = |message: String| -> StepError {
            Failure::new(message, Status::Failure).with_response(&decoded).into()
        };

        if decoded.status != 200 {
            let mut message = format!("HTTP 200 expected, but HTTP {} received.", decoded.status);
            if decoded.status == 403 {
                message.push_str(
                    " Make sure you validate clients' credentials against a fresh Registry \
                     catalogue version.",
                );
            }
            return Err(fail(message));
        }

        let report = self.engine.validator().validate(&decoded.body, &expectation.document);
        if !report.valid {
            return Err(fail(format!(
                "HTTP response status was okay, but the content has failed Schema validation. {}",
                format_errors(&report.errors)
            )));
        }
        let document = report.document.unwrap_or_else(ParsedDocument::new);

        for set in &expectation.identifier_sets {
            let found = document.texts(&set.element);
            if let Some(extra) = found.iter().find(|id| !set.expected.contains(id)) {
                return Err(fail(format!(
                    "{}the set of returned {}s doesn't match what we expect. It contains \
                     <{}>{}</{}>, but it shouldn't. It should contain the following: {}",
                    SCHEMA_OK_PREFIX,
                    set.element,
                    set.element,
                    extra,
                    set.element,
                    bracketed(&set.expected)
                )));
            }
            if set.superset {
                if let Some(missing) = set.expected.iter().find(|id| !found.contains(id)) {
                    return Err(fail(format!(
                        "{}the set of returned {}s doesn't match what we expect. It doesn't \
                         contain <{}>{}</{}>, but it should. It should contain the following: {}",
                        SCHEMA_OK_PREFIX,
                        set.element,
                        set.element,
                        missing,
                        set.element,
                        bracketed(&set.expected)
                    )));
                }
            }
        }

        if let Some(values) = &expectation.ordered_values {
            let found = document.texts(&values.element);
            if found != values.expected {
                return Err(fail(format!(
                    "{}there's something wrong with the {} values produced. We expected the \
                     response to contain the following {} values: {}, but the following values \
                     were found instead: {}",
                    SCHEMA_OK_PREFIX,
                    values.element,
                    values.element,
                    bracketed(&values.expected),
                    bracketed(&found)
                )));
            }
        }

        if let Some(failure) = notices_failure(&notices) {
            return Err(failure.with_response(&decoded).into());
        }
        Ok(decoded)
    }

    pub fn make_request_and_expect_error(
        &mut self,
        combination: &Combination,
        request: &Request,
        codes: &[u16],
    ) -> StepResult {
        let response = self.make_request(request)?;
        let decoded = self.expect_error(combination, request, &response, codes, Status::Failure)?;
        Ok(Some(decoded))
    }

    pub fn make_request_and_expect_http200(
        &mut self,
        combination: &Combination,
        request: &Request,
        expectation: &ResponseExpectation,
    ) -> StepResult {
        let response = self.make_request(request)?;
        let decoded = self.expect_http200(combination, request, &response, expectation)?;
        Ok(Some(decoded))
    }

    /// Expectation for a successful response repeating `values`.
    pub fn expectation(&self, values: &[&str]) -> ResponseExpectation {
        let identifier_sets = self
            .state
            .identifier_element
            .iter()
            .map(|element| IdentifierSet {
                element: element.clone(),
                expected: self.credentials().covered_hei_ids.clone(),
                superset: true,
            })
            .collect();
        let ordered_values = self.state.value_element.as_ref().map(|element| OrderedValues {
            element: element.clone(),
            expected: values.iter().map(|v| v.to_string()).collect(),
        });
        ResponseExpectation {
            document: self.state.response_document.clone(),
            identifier_sets,
            ordered_values,
        }
    }
}

/// First problem with the authentication hints of a 401 response.
fn unauthorized_problem(response: &Response) -> Option<String> {
    let Some(header) = response.header("WWW-Authenticate") else {
        return Some(
            "It is recommended for HTTP 401 responses to contain a proper WWW-Authenticate \
             header, describing the HTTP Signature authentication scheme."
                .to_string(),
        );
    };
    // Only Signature challenges are checked.
    if let Some(challenge) = Challenge::parse(header) {
        if let Some(problem) = signature_challenge_problem(&challenge) {
            return Some(problem);
        }
    }
    let want_digest = comma_separated_tokens(response.header("Want-Digest"));
    if !want_digest.iter().any(|d| d.to_ascii_uppercase().starts_with("SHA-256")) {
        return Some(
            "It is recommended for HTTP 401 responses to contain a Want-Digest header \
             requesting the SHA-256 digest."
                .to_string(),
        );
    }
    None
}

fn signature_challenge_problem(challenge: &Challenge) -> Option<String> {
    if challenge.realm.as_deref() != Some("EWP") {
        return Some("The realm of the Signature challenge should be \"EWP\".".to_string());
    }
    if !challenge.algorithms.is_empty()
        && !challenge.algorithms.iter().any(|a| a.eq_ignore_ascii_case(ALGORITHM))
    {
        return Some(
            "Your WWW-Authenticate describes required Signature algorithms, but the list \
             doesn't contain the required rsa-sha256 algorithm."
                .to_string(),
        );
    }
    if !challenge.headers.is_empty()
        && !REQUIRED_REQUEST_HEADERS.iter().all(|h| challenge.headers.iter().any(|c| c == h))
    {
        return Some(
            "If you want to include the \"headers\" property in your WWW-Authenticate header, \
             then it should contain at least all required values: (request-target), host, \
             digest, x-request-id and date"
                .to_string(),
        );
    }
    None
}

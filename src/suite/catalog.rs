//! Edge-case checks: deliberately broken or unusual requests, one per
//! table row, each with the outcome a conforming endpoint must produce.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Utc;
use uuid::Uuid;

use super::orchestrator::{Orchestrator, StepScope, SuiteBroken};
use super::state::SuiteState;
use super::step::{Failure, Status, StepError, StepResult};
use crate::combination::Combination;
use crate::http::{ClientIdentity, Method, Request};
use crate::security::credentials::generate_certificate;
use crate::security::ewp_rsa_aes::{EncryptionVerifier, CONTENT_CODING, HEADER_LEN};
use crate::security::httpsig::{http_date, SignatureParams, REQUIRED_REQUEST_HEADERS};
use crate::security::{
    ClientAuth, Dimension, DigestStyle, HttpSigSigner, RequestEncryption, ResponseEncryption,
    ServerAuth,
};

const ECHO_ABA: &str = "echo=a&echo=b&echo=a";
const ECHO_BB: &str = "echo=b&echo=b";

/// Facts about the endpoint some checks depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CheckEnv {
    pub request_encryption_required: bool,
    pub response_encryption_required: bool,
}

impl CheckEnv {
    pub fn from_state(state: &SuiteState) -> Self {
        Self {
            request_encryption_required: !state
                .endpoint_supports_request_encryption(RequestEncryption::Tls),
            response_encryption_required: !state
                .endpoint_supports_response_encryption(ResponseEncryption::Tls),
        }
    }
}

/// Which combination the response is verified against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyAs {
    Same,
    /// Response signatures are not expected.
    ServerAuthTls,
    /// Response encryption is not required.
    ResponseTls,
}

impl VerifyAs {
    fn apply(self, combination: &Combination) -> Combination {
        match self {
            VerifyAs::Same => combination.clone(),
            VerifyAs::ServerAuthTls => combination.with_changed_server_auth(ServerAuth::TlsCert),
            VerifyAs::ResponseTls => {
                combination.with_changed_response_encryption(ResponseEncryption::Tls)
            }
        }
    }
}

/// Tolerated deviations, per check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Downgrade {
    None,
    /// An HTTP 200 where an error was expected is only a WARNING.
    OkToWarning,
    /// Any FAILURE is only a WARNING.
    FailureToWarning,
}

impl Downgrade {
    pub fn apply(self, result: StepResult) -> StepResult {
        match (self, result) {
            (Downgrade::OkToWarning, Err(StepError::Failure(f)))
                if f.status == Status::Failure && f.response_status() == Some(200) =>
            {
                Err(f.with_status(Status::Warning).into())
            }
            (Downgrade::FailureToWarning, Err(StepError::Failure(f)))
                if f.status == Status::Failure =>
            {
                Err(f.with_status(Status::Warning).into())
            }
            (_, result) => result,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRole {
    Client,
    Server,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expected {
    Error { codes: Vec<u16>, verify_as: VerifyAs, downgrade: Downgrade },
    Success { verify_as: VerifyAs, values: Vec<&'static str>, downgrade: Downgrade },
    /// A valid HTTP 200 encrypted for a particular one of our keys.
    EncryptedFor { expected: Option<KeyRole>, forbidden: KeyRole, forbidden_message: &'static str },
}

impl Expected {
    fn error(codes: &[u16]) -> Self {
        Expected::Error {
            codes: codes.to_vec(),
            verify_as: VerifyAs::Same,
            downgrade: Downgrade::None,
        }
    }

    fn success() -> Self {
        Expected::Success {
            verify_as: VerifyAs::Same,
            values: Vec::new(),
            downgrade: Downgrade::None,
        }
    }

    fn verified_as(mut self, target: VerifyAs) -> Self {
        match &mut self {
            Expected::Error { verify_as, .. } | Expected::Success { verify_as, .. } => {
                *verify_as = target
            }
            Expected::EncryptedFor { .. } => {}
        }
        self
    }

    fn downgraded(mut self, to: Downgrade) -> Self {
        match &mut self {
            Expected::Error { downgrade, .. } | Expected::Success { downgrade, .. } => {
                *downgrade = to
            }
            Expected::EncryptedFor { .. } => {}
        }
        self
    }

    fn with_values(mut self, echo: &[&'static str]) -> Self {
        if let Expected::Success { values, .. } = &mut self {
            *values = echo.to_vec();
        }
        self
    }
}

/// Anonymous requests have to be rejected before anything else is looked at.
fn with_anonymous_codes(combination: &Combination, codes: &[u16]) -> Vec<u16> {
    let mut codes = codes.to_vec();
    if combination.client_auth() == ClientAuth::None {
        codes.extend([403, 401]);
    }
    codes
}

fn anonymous_rejected_or_success(combination: &Combination) -> Expected {
    match combination.client_auth() {
        ClientAuth::None => Expected::error(&[401, 403]),
        _ => Expected::success(),
    }
}

/// One row of the edge-case table.
#[derive(Clone, Copy)]
pub struct Check {
    pub id: &'static str,
    pub dimension: Dimension,
    /// Check-specific parameter, such as the header left unsigned.
    pub param: &'static str,
    pub applies: fn(&Combination, &CheckEnv) -> bool,
    pub name: fn(&Check, &Combination, &CheckEnv) -> String,
    pub build: fn(&Check, &mut StepScope<'_>, &Combination) -> Result<Request, StepError>,
    pub expected: fn(&Combination, &CheckEnv) -> Expected,
}

impl std::fmt::Debug for Check {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Check")
            .field("id", &self.id)
            .field("dimension", &self.dimension)
            .field("param", &self.param)
            .finish()
    }
}

fn is_httpsig_client(c: &Combination, _: &CheckEnv) -> bool {
    c.client_auth() == ClientAuth::HttpSig
}

fn is_httpsig_client_post(c: &Combination, _: &CheckEnv) -> bool {
    c.client_auth() == ClientAuth::HttpSig && *c.http_method() == Method::POST
}

fn is_httpsig_server(c: &Combination, _: &CheckEnv) -> bool {
    c.server_auth() == ServerAuth::HttpSig
}

fn is_encrypted_request(c: &Combination, _: &CheckEnv) -> bool {
    c.request_encryption() == RequestEncryption::EwpRsaAes
}

fn is_authenticated_encrypted_response(c: &Combination, _: &CheckEnv) -> bool {
    c.response_encryption() == ResponseEncryption::EwpRsaAes && c.client_auth() != ClientAuth::None
}

fn valid(scope: &mut StepScope<'_>, c: &Combination) -> Result<Request, StepError> {
    scope.create_valid_request(c, None)
}

fn valid_with(
    scope: &mut StepScope<'_>,
    c: &Combination,
    body: &str,
) -> Result<Request, StepError> {
    scope.create_valid_request(c, Some(body))
}

/// Valid request for `c`, then re-signed with `signer`.
fn resigned(
    scope: &mut StepScope<'_>,
    c: &Combination,
    body: Option<&str>,
    signer: HttpSigSigner,
) -> Result<Request, StepError> {
    let mut request = scope.create_valid_request(c, body)?;
    scope.sign_with(&mut request, &signer)?;
    Ok(request)
}

fn client_signer(scope: &StepScope<'_>) -> HttpSigSigner {
    HttpSigSigner::new(scope.credentials().client.clone())
}

fn server_key_header(scope: &StepScope<'_>) -> String {
    STANDARD.encode(scope.credentials().server.public_key_der())
}

fn trying(c: &Combination, rest: &str) -> String {
    format!("Trying {} {}", c, rest)
}

/// Every check, in the order they run for a combination.
pub fn catalog() -> Vec<Check> {
    let mut checks = vec![Check {
        id: "anonymous",
        dimension: Dimension::ClientAuthentication,
        param: "",
        applies: |c, _| c.client_auth() == ClientAuth::None,
        name: |_, c, _| {
            format!(
                "Trying {} (no client authentication). Expecting a valid HTTP 401 or HTTP 403 \
                 error response.",
                c
            )
        },
        build: |_, scope, c| valid(scope, c),
        expected: |_, _| Expected::error(&[401, 403]),
    }];

    checks.extend([
        Check {
            id: "unknown-client-key",
            dimension: Dimension::ClientAuthentication,
            param: "",
            applies: is_httpsig_client,
            name: |_, c, _| {
                trying(
                    c,
                    "with an unknown RSA client key (a random one, that has never been published \
                     in the Registry). Expecting to receive a valid HTTP 401 or HTTP 403 error \
                     response.",
                )
            },
            build: |_, scope, c| {
                let signer = HttpSigSigner::new(scope.credentials().unregistered.clone());
                resigned(scope, c, None, signer)
            },
            expected: |_, _| Expected::error(&[401, 403]).verified_as(VerifyAs::ResponseTls),
        },
        Check {
            id: "known-key-id-invalid-signature",
            dimension: Dimension::ClientAuthentication,
            param: "",
            applies: is_httpsig_client,
            name: |_, c, _| {
                trying(
                    c,
                    "with a known keyId, but invalid signature. Expecting to receive a valid \
                     HTTP 400 or HTTP 401 error response.",
                )
            },
            build: |_, scope, c| {
                let key_id = scope.credentials().client.key_id();
                let unregistered = scope.credentials().unregistered.clone();
                let signer = HttpSigSigner::new(unregistered).with_key_id(key_id);
                resigned(scope, c, None, signer)
            },
            expected: |_, _| Expected::error(&[400, 401]).verified_as(VerifyAs::ResponseTls),
        },
        Check {
            id: "missing-signed-header",
            dimension: Dimension::ClientAuthentication,
            param: "Missing-Header-That-Should-Exist",
            applies: is_httpsig_client,
            name: |_, c, _| {
                trying(
                    c,
                    "with missing headers that were supposed to be signed. Expecting to receive \
                     a valid HTTP 400 or HTTP 401 error response.",
                )
            },
            build: |check, scope, c| {
                let mut request = valid(scope, c)?;
                request.put_header(check.param, "Temporarilly exists");
                let signer = client_signer(scope);
                scope.sign_with(&mut request, &signer)?;
                request.remove_header(check.param);
                Ok(request)
            },
            expected: |_, _| Expected::error(&[400, 401]).verified_as(VerifyAs::ResponseTls),
        },
        Check {
            id: "original-date",
            dimension: Dimension::ClientAuthentication,
            param: "",
            applies: is_httpsig_client,
            name: |_, c, _| {
                trying(
                    c,
                    "with Original-Date (instead of Date). Expecting to receive a valid HTTP 200 \
                     response.",
                )
            },
            build: |_, scope, c| {
                let mut request = valid(scope, c)?;
                if let Some(date) = request.remove_header("Date") {
                    request.put_header("Original-Date", date);
                }
                let signer = client_signer(scope);
                scope.sign_with(&mut request, &signer)?;
                Ok(request)
            },
            expected: |_, _| Expected::success(),
        },
    ]);

    for header in REQUIRED_REQUEST_HEADERS {
        checks.push(Check {
            id: "unsigned-header",
            dimension: Dimension::ClientAuthentication,
            param: header,
            applies: is_httpsig_client,
            name: |check, c, _| {
                trying(
                    c,
                    &format!(
                        "with unsigned {} header. Expecting to receive a valid HTTP 400 or HTTP \
                         401 error response.",
                        check.param
                    ),
                )
            },
            build: |check, scope, c| {
                let headers = REQUIRED_REQUEST_HEADERS.into_iter().filter(|h| *h != check.param);
                let signer = client_signer(scope).with_headers(headers);
                resigned(scope, c, None, signer)
            },
            expected: |_, _| Expected::error(&[400, 401]).verified_as(VerifyAs::ResponseTls),
        });
    }

    checks.extend([
        Check {
            id: "extra-signed-header",
            dimension: Dimension::ClientAuthentication,
            param: "Some-Custom-Header",
            applies: is_httpsig_client,
            name: |_, c, _| {
                trying(
                    c,
                    "with some extra unknown, but properly signed headers. Expecting to receive \
                     a valid HTTP 200 response.",
                )
            },
            build: |check, scope, c| {
                let mut request = valid(scope, c)?;
                request.put_header(check.param, "Value");
                let signer = client_signer(scope);
                scope.sign_with(&mut request, &signer)?;
                Ok(request)
            },
            expected: |_, _| Expected::success(),
        },
        Check {
            id: "signed-with-server-key",
            dimension: Dimension::ClientAuthentication,
            param: "",
            applies: is_httpsig_client,
            name: |_, c, _| {
                trying(
                    c,
                    "signed with a server key, instead of a client key. Expecting to receive a \
                     valid HTTP 403 error response.",
                )
            },
            build: |_, scope, c| {
                let signer = HttpSigSigner::new(scope.credentials().server.clone());
                resigned(scope, c, None, signer)
            },
            expected: |_, _| Expected::error(&[403]).verified_as(VerifyAs::ResponseTls),
        },
        Check {
            id: "stale-original-date",
            dimension: Dimension::ClientAuthentication,
            param: "",
            applies: is_httpsig_client,
            name: |_, c, _| {
                trying(
                    c,
                    "with an unsynchronized clock (Original-Date 20 minutes in the past). \
                     Expecting to receive a valid HTTP 400 error response.",
                )
            },
            build: |_, scope, c| {
                let mut request = valid(scope, c)?;
                let stale = Utc::now() - scope.config().stale_date_offset();
                request.remove_header("Date");
                request.put_header("Original-Date", http_date(stale));
                let previous =
                    SignatureParams::parse(request.header("Authorization").unwrap_or(""))?;
                let mut headers: Vec<String> =
                    previous.headers.into_iter().filter(|h| h != "date").collect();
                headers.push("original-date".to_string());
                let signer = client_signer(scope).with_headers(headers);
                scope.sign_with(&mut request, &signer)?;
                Ok(request)
            },
            expected: |_, _| Expected::error(&[400]).downgraded(Downgrade::OkToWarning),
        },
        Check {
            id: "non-canonical-request-id",
            dimension: Dimension::ClientAuthentication,
            param: "",
            applies: is_httpsig_client,
            name: |_, c, _| {
                trying(
                    c,
                    "with non-canonical X-Request-ID. Expecting to receive a valid HTTP 400 \
                     error response.",
                )
            },
            build: |_, scope, c| {
                let mut request = valid(scope, c)?;
                let id = request.header("X-Request-Id").unwrap_or_default().replace('-', "");
                request.put_header("X-Request-Id", id.to_ascii_uppercase());
                let signer = client_signer(scope);
                scope.sign_with(&mut request, &signer)?;
                Ok(request)
            },
            expected: |_, _| {
                Expected::error(&[400])
                    .verified_as(VerifyAs::ResponseTls)
                    .downgraded(Downgrade::FailureToWarning)
            },
        },
        Check {
            id: "invalid-digest",
            dimension: Dimension::ClientAuthentication,
            param: "something-else",
            applies: is_httpsig_client_post,
            name: |_, c, _| {
                trying(
                    c,
                    "with an invalid Digest. Expecting to receive a valid HTTP 400 error response.",
                )
            },
            build: |check, scope, c| {
                let mut request = valid_with(scope, c, ECHO_ABA)?;
                request.set_body(check.param.as_bytes().to_vec());
                Ok(request)
            },
            expected: |_, _| Expected::error(&[400]).verified_as(VerifyAs::ResponseTls),
        },
        Check {
            id: "multiple-digests",
            dimension: Dimension::ClientAuthentication,
            param: "",
            applies: is_httpsig_client_post,
            name: |_, c, _| {
                trying(
                    c,
                    "with multiple Digests (one of which is SHA-256). Expecting to receive a \
                     valid HTTP 200 response.",
                )
            },
            build: |_, scope, c| {
                let signer = client_signer(scope).with_digest(DigestStyle::WithUnknownAlgorithm);
                resigned(scope, c, Some(ECHO_BB), signer)
            },
            expected: |_, _| Expected::success().with_values(&["b", "b"]),
        },
        Check {
            id: "sha1-digest",
            dimension: Dimension::ClientAuthentication,
            param: "",
            applies: is_httpsig_client_post,
            name: |_, c, _| {
                trying(
                    c,
                    "with \"SHA\" request digest. This algorithm is deprecated, so we are \
                     expecting to receive a valid HTTP 400 response.",
                )
            },
            build: |_, scope, c| {
                let signer = client_signer(scope).with_digest(DigestStyle::Sha1Only);
                resigned(scope, c, Some(ECHO_BB), signer)
            },
            expected: |_, _| {
                Expected::error(&[400])
                    .verified_as(VerifyAs::ResponseTls)
                    .downgraded(Downgrade::OkToWarning)
            },
        },
        Check {
            id: "mixed-case-digest",
            dimension: Dimension::ClientAuthentication,
            param: "",
            applies: is_httpsig_client_post,
            name: |_, c, _| {
                trying(
                    c,
                    "with \"shA-256\" request digest (mixed case). Digest RFC requires clients \
                     to accept that. Expecting to receive a valid HTTP 200 response.",
                )
            },
            build: |_, scope, c| {
                let signer = client_signer(scope).with_digest(DigestStyle::Sha256MixedCase);
                resigned(scope, c, Some(ECHO_BB), signer)
            },
            expected: |_, _| {
                Expected::success()
                    .with_values(&["b", "b"])
                    .downgraded(Downgrade::FailureToWarning)
            },
        },
        Check {
            id: "unknown-tls-certificate",
            dimension: Dimension::ClientAuthentication,
            param: "",
            applies: |c, _| c.client_auth() == ClientAuth::TlsSelfSigned,
            name: |_, c, _| {
                trying(
                    c,
                    "with an unknown TLS client certificate (a random one, that has never been \
                     published in the Registry). Expecting to receive a valid HTTP 401 or HTTP \
                     403 error response.",
                )
            },
            build: |_, scope, c| {
                let mut request = valid(scope, c)?;
                let unregistered = scope.credentials().unregistered.clone();
                let identity = ClientIdentity {
                    certificate_der: generate_certificate(&unregistered)?,
                    private_key_der: unregistered.private_key_pkcs8_der()?,
                };
                request.client_certificate = Some(std::sync::Arc::new(identity));
                scope.snapshots().add_request(&request);
                Ok(request)
            },
            expected: |_, _| Expected::error(&[401, 403]).verified_as(VerifyAs::ResponseTls),
        },
        Check {
            id: "no-valid-signature-algorithm",
            dimension: Dimension::ServerAuthentication,
            param: "unknown-algorithm",
            applies: is_httpsig_server,
            name: |_, c, _| {
                trying(
                    c,
                    "with no valid algorithm in Accept-Signature header. Expecting to receive \
                     unsigned response.",
                )
            },
            build: |check, scope, c| accept_signature(scope, c, check.param),
            expected: |c, _| anonymous_rejected_or_success(c).verified_as(VerifyAs::ServerAuthTls),
        },
        Check {
            id: "multiple-signature-algorithms",
            dimension: Dimension::ServerAuthentication,
            param: "rsa-sha256, unknown-algorithm",
            applies: is_httpsig_server,
            name: |_, c, _| {
                trying(
                    c,
                    "with multiple algorithms in Accept-Signature header (one of which is \
                     rsa-sha256). Expecting to receive a signed response.",
                )
            },
            build: |check, scope, c| accept_signature(scope, c, check.param),
            expected: |c, _| anonymous_rejected_or_success(c),
        },
        Check {
            id: "request-id-echo",
            dimension: Dimension::ServerAuthentication,
            param: "",
            applies: |c, env| is_httpsig_server(c, env) && c.client_auth() != ClientAuth::HttpSig,
            name: |_, c, _| {
                trying(
                    c,
                    "with X-Request-Id header. This header is not required to be present in \
                     this request in this combination, but we're still expecting the server to \
                     include its copy in the response.",
                )
            },
            build: |_, scope, c| {
                let mut request = valid(scope, c)?;
                request.put_header("X-Request-Id", Uuid::new_v4().to_string());
                scope.sign(&mut request, c.client_auth())?;
                Ok(request)
            },
            expected: |c, _| anonymous_rejected_or_success(c),
        },
        Check {
            id: "encrypted-get",
            dimension: Dimension::RequestEncryption,
            param: "",
            applies: is_encrypted_request,
            name: |_, c, _| {
                format!(
                    "Trying {} - this is invalid, because GET requests are not supported by \
                     ewp-rsa-aes128gcm encryption. Expecting HTTP 405 error response.",
                    c.with_changed_http_method(Method::GET)
                )
            },
            build: |_, scope, c| {
                let mut request = valid(scope, c)?;
                request.method = Method::GET;
                scope.sign(&mut request, c.client_auth())?;
                Ok(request)
            },
            expected: |c, _| Expected::error(&with_anonymous_codes(c, &[405])),
        },
        Check {
            id: "truncated-encrypted-body",
            dimension: Dimension::RequestEncryption,
            param: "",
            applies: is_encrypted_request,
            name: |_, c, _| {
                trying(c, "with truncated encrypted body. Expecting HTTP 400 error response.")
            },
            build: |_, scope, c| {
                let mut request = valid_with(scope, c, ECHO_ABA)?;
                let mut body = request.body_bytes().to_vec();
                body.truncate(HEADER_LEN);
                request.set_body(body);
                scope.sign(&mut request, c.client_auth())?;
                Ok(request)
            },
            expected: |c, _| Expected::error(&with_anonymous_codes(c, &[400])),
        },
        Check {
            id: "unencrypted-request",
            dimension: Dimension::RequestEncryption,
            param: "",
            applies: |c, env| is_encrypted_request(c, env) && env.request_encryption_required,
            name: |_, c, _| {
                trying(
                    c,
                    "without encryption. Your endpoint explicitly requires all requests to be \
                     encrypted, so we're expecting HTTP 415 error response.",
                )
            },
            build: |_, scope, c| {
                valid(scope, &c.with_changed_request_encryption(RequestEncryption::Tls))
            },
            expected: |c, _| Expected::error(&with_anonymous_codes(c, &[415])),
        },
        Check {
            id: "invalid-accept-encoding",
            dimension: Dimension::ResponseEncryption,
            param: "invalid-coding",
            applies: is_authenticated_encrypted_response,
            name: |_, c, env| {
                let tail = if env.response_encryption_required {
                    "Your endpoint requires encryption, so we're expecting unencrypted HTTP 406 \
                     error response."
                } else {
                    "Your endpoint does not require encryption, so we're expecting a valid \
                     unencrypted HTTP 200 response."
                };
                trying(c, &format!("with an invalid Accept-Encoding header. {}", tail))
            },
            build: |check, scope, c| accept_encoding(scope, c, check.param),
            expected: |_, env| {
                let expected = if env.response_encryption_required {
                    Expected::error(&[406])
                } else {
                    Expected::success()
                };
                expected.verified_as(VerifyAs::ResponseTls)
            },
        },
        Check {
            id: "reformatted-accept-encoding",
            dimension: Dimension::ResponseEncryption,
            param: " ewp-rsa-AES128GCM ; q=1 , *;q=0",
            applies: is_authenticated_encrypted_response,
            name: |_, c, _| {
                trying(
                    c,
                    "with Accept-Encoding header formatted in a different way. This formatting \
                     is still valid (per RFC), so we are expecting a valid encrypted HTTP 200 \
                     response.",
                )
            },
            build: |check, scope, c| accept_encoding(scope, c, check.param),
            expected: |_, _| Expected::success(),
        },
        Check {
            id: "forbidden-encryption",
            dimension: Dimension::ResponseEncryption,
            param: " ewp-rsa-aes128gcm;q=0, identity;q=1",
            applies: |c, env| {
                is_authenticated_encrypted_response(c, env) && !env.response_encryption_required
            },
            name: |_, c, _| {
                trying(
                    c,
                    "with explicitly forbidden ewp-rsa-aes128gcm in its Accept-Encoding header. \
                     Expecting unencrypted response.",
                )
            },
            build: |check, scope, c| accept_encoding(scope, c, check.param),
            expected: |_, _| Expected::success().verified_as(VerifyAs::ResponseTls),
        },
        Check {
            id: "unsigned-encryption-key",
            dimension: Dimension::ResponseEncryption,
            param: "",
            applies: |c, env| {
                is_authenticated_encrypted_response(c, env)
                    && c.client_auth() == ClientAuth::HttpSig
            },
            name: |_, c, _| {
                trying(
                    c,
                    "with unsigned Accept-Response-Encryption-Key header. Expecting the unsigned \
                     header to be ignored (man-in-the-middle attack).",
                )
            },
            build: |_, scope, c| {
                let mut request = valid(scope, c)?;
                request.put_header("Accept-Response-Encryption-Key", server_key_header(scope));
                scope.snapshots().add_request(&request);
                Ok(request)
            },
            expected: |_, _| Expected::EncryptedFor {
                expected: None,
                forbidden: KeyRole::Server,
                forbidden_message: "The response was encrypted with the attacker's key. Your \
                                    installation is vulnerable to man-in-the-middle attacks.",
            },
        },
        Check {
            id: "signed-encryption-key",
            dimension: Dimension::ResponseEncryption,
            param: "",
            applies: |c, env| {
                is_authenticated_encrypted_response(c, env)
                    && c.client_auth() == ClientAuth::HttpSig
            },
            name: |_, c, _| {
                trying(
                    c,
                    "with overriden encryption key (properly signed \
                     Accept-Response-Encryption-Key header). Expecting the response to be \
                     encrypted for the overriden key.",
                )
            },
            build: |_, scope, c| {
                let mut request = valid(scope, c)?;
                request.put_header("Accept-Response-Encryption-Key", server_key_header(scope));
                scope.sign(&mut request, c.client_auth())?;
                Ok(request)
            },
            expected: |_, _| Expected::EncryptedFor {
                expected: Some(KeyRole::Server),
                forbidden: KeyRole::Client,
                forbidden_message: "The response was encrypted with the signer's key. Your \
                                    installation seems to be ignoring the (properly signed) \
                                    Accept-Response-Encryption-Key header.",
            },
        },
    ]);
    checks
}

fn accept_signature(
    scope: &mut StepScope<'_>,
    c: &Combination,
    value: &str,
) -> Result<Request, StepError> {
    let mut request = valid(scope, c)?;
    request.put_header("Accept-Signature", value);
    scope.sign(&mut request, c.client_auth())?;
    Ok(request)
}

fn accept_encoding(
    scope: &mut StepScope<'_>,
    c: &Combination,
    value: &str,
) -> Result<Request, StepError> {
    let mut request = valid(scope, c)?;
    request.put_header("Accept-Encoding", value);
    scope.sign(&mut request, c.client_auth())?;
    Ok(request)
}

fn check_recipient(
    scope: &StepScope<'_>,
    response: &crate::http::Response,
    expected: Option<KeyRole>,
    forbidden: KeyRole,
    forbidden_message: &str,
) -> Result<(), StepError> {
    let encrypted = response
        .header("Content-Encoding")
        .is_some_and(|v| v.to_ascii_lowercase().contains(CONTENT_CODING));
    if response.status != 200 || !encrypted {
        return Ok(());
    }
    let credentials = scope.credentials();
    let key = |role| match role {
        KeyRole::Client => credentials.client.as_ref(),
        KeyRole::Server => credentials.server.as_ref(),
    };
    if EncryptionVerifier::is_encrypted_for(&response.body, key(forbidden)) {
        return Err(Failure::new(forbidden_message, Status::Failure).with_response(response).into());
    }
    if let Some(role) = expected {
        if !EncryptionVerifier::is_encrypted_for(&response.body, key(role)) {
            return Err(Failure::new(
                "The response seems to be encrypted to neither the signer's key, nor to the \
                 overridden key.",
                Status::Failure,
            )
            .with_response(response)
            .into());
        }
    }
    Ok(())
}

fn run_body(
    check: &Check,
    scope: &mut StepScope<'_>,
    c: &Combination,
    env: &CheckEnv,
) -> StepResult {
    let request = (check.build)(check, scope, c)?;
    let response = scope.make_request(&request)?;
    match (check.expected)(c, env) {
        Expected::Error { codes, verify_as, downgrade } => {
            let verified = verify_as.apply(c);
            let result = scope
                .expect_error(&verified, &request, &response, &codes, Status::Failure)
                .map(Some);
            downgrade.apply(result)
        }
        Expected::Success { verify_as, values, downgrade } => {
            let verified = verify_as.apply(c);
            let expectation = scope.expectation(&values);
            let result = scope
                .expect_http200(&verified, &request, &response, &expectation)
                .map(Some);
            downgrade.apply(result)
        }
        Expected::EncryptedFor { expected, forbidden, forbidden_message } => {
            check_recipient(scope, &response, expected, forbidden, forbidden_message)?;
            let expectation = scope.expectation(&[]);
            scope.expect_http200(c, &request, &response, &expectation).map(Some)
        }
    }
}

/// Append and run `check` against `combination` if it applies.
pub fn run_check(
    orchestrator: &mut Orchestrator<'_>,
    check: &Check,
    combination: &Combination,
) -> Result<Option<Status>, SuiteBroken> {
    let env = CheckEnv::from_state(orchestrator.state());
    if !(check.applies)(combination, &env) {
        return Ok(None);
    }
    let name = (check.name)(check, combination, &env);
    orchestrator
        .add_and_run(false, name, |scope| run_body(check, scope, combination, &env))
        .map(Some)
}

//! In-process Echo endpoint, document validator and key material shared by
//! the integration tests.
#![allow(dead_code)]

use std::io::Write;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use regex::Regex;
use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;

use httpsec_conformance::combination::DeclaredSecurity;
use httpsec_conformance::document::{
    DocumentError, DocumentType, DocumentValidator, ParsedDocument, ValidationReport,
};
use httpsec_conformance::http::{
    acceptable_codings, comma_separated_tokens, Method, Request, Response, Transport,
    TransportError,
};
use httpsec_conformance::registry::{ApiEntry, StaticRegistry};
use httpsec_conformance::security::credentials::generate_certificate;
use httpsec_conformance::security::digest;
use httpsec_conformance::security::ewp_rsa_aes::{self, CONTENT_CODING};
use httpsec_conformance::security::httpsig::{self, SignatureParams};
use httpsec_conformance::security::response_auth::date_problem;
use httpsec_conformance::security::{
    Credentials, RequestEncryption, ResponseEncryption, RsaKeyPair, ServerAuth, TlsCredentials,
};
use httpsec_conformance::suite::{Status, SuiteReport};
use httpsec_conformance::{Engine, SemanticVersion};

pub const URL: &str = "https://echo.example.com/echo";

pub struct TestKeys {
    pub client: Arc<RsaKeyPair>,
    pub server: Arc<RsaKeyPair>,
    pub tls: Arc<RsaKeyPair>,
    pub tls_certificate: Vec<u8>,
    pub unregistered: Arc<RsaKeyPair>,
    /// The endpoint's own key, published in the registry.
    pub endpoint: Arc<RsaKeyPair>,
}

pub fn keys() -> &'static TestKeys {
    static KEYS: OnceLock<TestKeys> = OnceLock::new();
    KEYS.get_or_init(|| {
        let generate = |bits| Arc::new(RsaKeyPair::generate(bits).unwrap());
        let tls = generate(2048);
        let tls_certificate = generate_certificate(&tls).unwrap();
        TestKeys {
            client: generate(1024),
            server: generate(1024),
            tls,
            tls_certificate,
            unregistered: generate(2048),
            endpoint: generate(1024),
        }
    })
}

pub fn heis() -> Vec<String> {
    vec!["uw.edu.pl".to_string(), "bob.example.com".to_string()]
}

fn credentials_since(in_use_since: chrono::DateTime<Utc>) -> Credentials {
    let k = keys();
    Credentials {
        client: k.client.clone(),
        server: k.server.clone(),
        tls: TlsCredentials::new(k.tls.clone(), k.tls_certificate.clone(), in_use_since).unwrap(),
        unregistered: k.unregistered.clone(),
        covered_hei_ids: heis(),
    }
}

/// Credentials that have been in use for a day.
pub fn credentials() -> Credentials {
    credentials_since(Utc::now() - chrono::Duration::days(1))
}

pub fn fresh_credentials() -> Credentials {
    credentials_since(Utc::now())
}

pub fn declared(cli: &str, srv: &str, req: &str, res: &str) -> DeclaredSecurity {
    DeclaredSecurity::from_codes(Some(cli), Some(srv), Some(req), Some(res)).unwrap()
}

pub fn registry_for(version: SemanticVersion, declared: &DeclaredSecurity) -> StaticRegistry {
    StaticRegistry::new().with_entry(
        ApiEntry {
            api: "echo".to_string(),
            version,
            url: URL.to_string(),
            security: declared.clone(),
        },
        vec![keys().endpoint.public_key().clone()],
    )
}

pub fn engine(endpoint: Arc<FakeEndpoint>, version: SemanticVersion) -> Engine {
    let registry = registry_for(version, &endpoint.declared);
    Engine::new(endpoint, Arc::new(LineValidator), Arc::new(registry), Arc::new(credentials()))
}

/// `name: STATUS: message` lines of every step that is not SUCCESS.
pub fn problems(report: &SuiteReport) -> Vec<String> {
    report
        .steps()
        .iter()
        .filter(|s| s.status() != Status::Success)
        .map(|s| format!("{}: {}: {}", s.name(), s.status(), s.message()))
        .collect()
}

pub fn step_status(report: &SuiteReport, name_part: &str) -> Vec<Status> {
    report
        .steps()
        .iter()
        .filter(|s| s.name().contains(name_part))
        .map(|s| s.status())
        .collect()
}

/// Documents are lines: the root element name, then `element: text`.
pub struct LineValidator;

impl DocumentValidator for LineValidator {
    fn validate(&self, body: &[u8], expected: &DocumentType) -> ValidationReport {
        let invalid = |line, message: String| {
            ValidationReport::invalid(vec![DocumentError { line, message }])
        };
        let Ok(text) = std::str::from_utf8(body) else {
            return invalid(1, "body is not UTF-8".to_string());
        };
        let root = match expected {
            DocumentType::ErrorResponse => "error-response",
            DocumentType::EchoResponseV1 | DocumentType::EchoResponseV2 => "echo-response",
            DocumentType::Other(name) => name.as_str(),
        };
        let mut lines = text.lines();
        match lines.next() {
            Some(first) if first.trim() == root => {}
            other => return invalid(1, format!("expected <{}>, found {:?}", root, other)),
        }
        let mut document = ParsedDocument::new();
        for (i, line) in lines.enumerate() {
            match line.split_once(": ") {
                Some((element, value)) => document.push(element, value),
                None => return invalid(i + 2, format!("malformed line {:?}", line)),
            }
        }
        ValidationReport::valid(document)
    }
}

/// Deviations from a conforming endpoint.
#[derive(Debug, Clone, Default)]
pub struct Quirks {
    /// Status returned to anonymous requests instead of 401.
    pub anonymous_status: Option<u16>,
    /// Treat our server key as a valid client key.
    pub accept_server_key: bool,
    pub reject_mixed_case_digest: bool,
    /// Lose the last echo value.
    pub drop_last_echo: bool,
    pub no_gzip: bool,
    /// Accept any `Date` / `Original-Date`.
    pub ignore_clock_skew: bool,
    /// Accept a body checked against a deprecated `SHA=` digest.
    pub accept_sha1_digest: bool,
    /// Treat a body that does not decrypt as empty.
    pub accept_undecryptable_body: bool,
    /// Encrypt to `Accept-Response-Encryption-Key` even when it is not signed.
    pub honor_unsigned_encryption_key: bool,
    /// Always encrypt to the signer's key.
    pub ignore_signed_encryption_key: bool,
}

enum Auth {
    Anonymous,
    Tls,
    HttpSig { signed: Vec<String> },
    Rejected,
}

/// Echo endpoint following the transport-security rules, plus [`Quirks`].
pub struct FakeEndpoint {
    pub declared: DeclaredSecurity,
    pub quirks: Quirks,
    requests: Mutex<Vec<Request>>,
}

impl FakeEndpoint {
    pub fn new(declared: DeclaredSecurity) -> Self {
        Self { declared, quirks: Quirks::default(), requests: Mutex::new(Vec::new()) }
    }

    pub fn with_quirks(mut self, quirks: Quirks) -> Self {
        self.quirks = quirks;
        self
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub fn handle(&self, request: &Request) -> Response {
        let (auth, response) = match self.authenticate(request) {
            Ok(auth) => {
                let response = self.process(request);
                (auth, response)
            }
            Err(status) => (Auth::Rejected, error(status)),
        };
        self.finish(request, &auth, response)
    }

    fn authenticate(&self, request: &Request) -> Result<Auth, u16> {
        if let Some(value) = request.header("Authorization") {
            return self.verify_signature(request, value);
        }
        if let Some(identity) = &request.client_certificate {
            return if identity.certificate_der == keys().tls_certificate {
                Ok(Auth::Tls)
            } else {
                Err(403)
            };
        }
        match self.quirks.anonymous_status.unwrap_or(401) {
            200 => Ok(Auth::Anonymous),
            status => Err(status),
        }
    }

    fn verify_signature(&self, request: &Request, value: &str) -> Result<Auth, u16> {
        let k = keys();
        let params = SignatureParams::parse(value).map_err(|_| 400u16)?;
        for required in ["(request-target)", "host", "digest", "x-request-id"] {
            if !params.covers(required) {
                return Err(400);
            }
        }
        if !params.covers("date") && !params.covers("original-date") {
            return Err(400);
        }
        let key = if params.key_id == k.client.key_id() {
            k.client.public_key()
        } else if params.key_id == k.server.key_id() && self.quirks.accept_server_key {
            k.server.public_key()
        } else if params.key_id == k.server.key_id() {
            return Err(403);
        } else {
            return Err(401);
        };
        let path = request.path_and_query().map_err(|_| 400u16)?;
        let target = Some((&request.method, path.as_str()));
        let text = httpsig::signing_string(target, &request.headers, &params.headers)
            .map_err(|_| 400u16)?;
        httpsig::verify_rsa_sha256(key, &text, &params.signature).map_err(|_| 400u16)?;

        let date = request.header("Original-Date").or(request.header("Date")).ok_or(400u16)?;
        if !self.quirks.ignore_clock_skew && date_problem(date, Utc::now()).is_some() {
            return Err(400);
        }
        if !canonical_uuid(request.header("X-Request-Id").unwrap_or_default()) {
            return Err(400);
        }
        let digest_header = request.header("Digest").ok_or(400u16)?;
        if self.quirks.reject_mixed_case_digest
            && digest::parse_digest_header(digest_header)
                .iter()
                .any(|(alg, _)| alg != "SHA-256" && alg.eq_ignore_ascii_case("SHA-256"))
        {
            return Err(400);
        }
        let body = request.body_bytes();
        let sha1 = format!("SHA={}", digest::sha1_base64(body));
        match digest::find_sha256(digest_header) {
            Some(sha256) if sha256 == digest::sha256_base64(body) => {}
            None if self.quirks.accept_sha1_digest && digest_header == sha1 => {}
            _ => return Err(400),
        }
        Ok(Auth::HttpSig { signed: params.headers })
    }

    fn process(&self, request: &Request) -> Response {
        if request.method == Method::PUT || request.method == Method::DELETE {
            return error(405);
        }
        let encrypted = request
            .header("Content-Encoding")
            .is_some_and(|c| c.to_ascii_lowercase().contains(CONTENT_CODING));
        let body = if encrypted {
            if request.method == Method::GET {
                return error(405);
            }
            match ewp_rsa_aes::decrypt(&keys().endpoint, request.body_bytes()) {
                Ok(body) => body,
                Err(_) if self.quirks.accept_undecryptable_body => Vec::new(),
                Err(_) => return error(400),
            }
        } else {
            if request.method == Method::POST
                && !self.declared.supports_request_encryption(RequestEncryption::Tls)
            {
                return error(415);
            }
            request.body_bytes().to_vec()
        };

        let parameters = if request.method == Method::GET {
            request.url.split_once('?').map(|(_, q)| q.to_string()).unwrap_or_default()
        } else {
            String::from_utf8_lossy(&body).into_owned()
        };
        let mut echo: Vec<&str> = parameters
            .split('&')
            .filter_map(|p| p.split_once('='))
            .filter(|(name, _)| *name == "echo")
            .map(|(_, value)| value)
            .collect();
        if self.quirks.drop_last_echo {
            echo.pop();
        }

        let mut lines = vec!["echo-response".to_string()];
        lines.extend(heis().iter().map(|h| format!("hei-id: {}", h)));
        lines.extend(echo.iter().map(|e| format!("echo: {}", e)));
        Response::new(200).with_body(lines.join("\n").into_bytes())
    }

    fn recipient(&self, request: &Request, auth: &Auth) -> Option<RsaPublicKey> {
        let from_header = request
            .header("Accept-Response-Encryption-Key")
            .and_then(|v| STANDARD.decode(v.trim()).ok())
            .and_then(|der| RsaPublicKey::from_public_key_der(&der).ok());
        match auth {
            Auth::HttpSig { signed } => {
                let key_signed = signed.iter().any(|h| h == "accept-response-encryption-key");
                let header_wins = !self.quirks.ignore_signed_encryption_key
                    && (key_signed || self.quirks.honor_unsigned_encryption_key);
                match from_header {
                    Some(key) if header_wins => Some(key),
                    _ => Some(keys().client.public_key().clone()),
                }
            }
            Auth::Anonymous | Auth::Tls => from_header,
            // A rejected request still names its signer.
            Auth::Rejected => from_header.or_else(|| identified_client(request)),
        }
    }

    fn finish(&self, request: &Request, auth: &Auth, mut response: Response) -> Response {
        let accept = acceptable_codings(request.header("Accept-Encoding"));
        let wants_encryption = accept.iter().any(|c| c == CONTENT_CODING)
            && self.declared.supports_response_encryption(ResponseEncryption::EwpRsaAes);
        if response.status == 200
            && !wants_encryption
            && !self.declared.supports_response_encryption(ResponseEncryption::Tls)
        {
            response = error(406);
        }

        let mut codings = Vec::new();
        if accept.iter().any(|c| c == "gzip") && !self.quirks.no_gzip {
            response.body = gzip(&response.body);
            codings.push("gzip");
        }
        if wants_encryption {
            if let Some(key) = self.recipient(request, auth) {
                response.body = ewp_rsa_aes::encrypt(&key, &response.body).unwrap();
                codings.push(CONTENT_CODING);
            }
        }
        if !codings.is_empty() {
            response.headers.put("Content-Encoding", codings.join(", "));
        }

        let accept_signature = comma_separated_tokens(request.header("Accept-Signature"));
        if self.declared.supports_server_auth(ServerAuth::HttpSig)
            && accept_signature.iter().any(|a| a.eq_ignore_ascii_case("rsa-sha256"))
        {
            httpsig::sign_response(request, &mut response, &keys().endpoint).unwrap();
        }
        response
    }
}

impl Transport for FakeEndpoint {
    fn send(&self, request: &Request, _timeout: Duration) -> Result<Response, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(self.handle(request))
    }
}

/// Every request times out.
pub struct TimeoutTransport;

impl Transport for TimeoutTransport {
    fn send(&self, _request: &Request, timeout: Duration) -> Result<Response, TransportError> {
        Err(TransportError::Timeout(timeout))
    }
}

fn identified_client(request: &Request) -> Option<RsaPublicKey> {
    let params = SignatureParams::parse(request.header("Authorization")?).ok()?;
    (params.key_id == keys().client.key_id()).then(|| keys().client.public_key().clone())
}

fn error(status: u16) -> Response {
    let mut response = Response::new(status)
        .with_body(format!("error-response\ndeveloper-message: HTTP {}", status).into_bytes());
    if status == 401 {
        response = response
            .with_header(
                "WWW-Authenticate",
                "Signature realm=\"EWP\",algorithms=\"rsa-sha256\",\
                 headers=\"(request-target) host date digest x-request-id\"",
            )
            .with_header("Want-Digest", "SHA-256");
    }
    response
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn canonical_uuid(value: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$").unwrap()
        })
        .is_match(value)
}

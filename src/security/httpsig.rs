//! HTTP message signatures (draft-cavage, `rsa-sha256`).
//!
//! [`HttpSigSigner`] produces valid signatures and exposes one override point
//! per sub-step (declared key id, signed header set, digest computation), so
//! adversarial checks can corrupt exactly one aspect of an otherwise valid
//! request. The parsing and verification helpers are shared with response
//! authentication.

use std::sync::{Arc, OnceLock};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use regex::Regex;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::RsaPublicKey;
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

use super::credentials::RsaKeyPair;
use super::digest;
use super::RequestSigner;
use crate::http::{Headers, Method, Request, Response, UrlError};

pub const ALGORITHM: &str = "rsa-sha256";
pub const REQUEST_TARGET: &str = "(request-target)";

/// Headers every request signature must cover.
pub const REQUIRED_REQUEST_HEADERS: [&str; 5] =
    [REQUEST_TARGET, "host", "date", "digest", "x-request-id"];

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("header {0:?} is listed for signing but is not present")]
    MissingHeader(String),
    #[error("(request-target) cannot be computed without a request")]
    NoRequestTarget,
    #[error("malformed signature header: {0}")]
    Malformed(String),
    #[error("unsupported signature algorithm {0:?}")]
    UnsupportedAlgorithm(String),
    #[error("signature does not verify")]
    Invalid,
    #[error(transparent)]
    Url(#[from] UrlError),
}

/// How the `Digest` header is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestStyle {
    /// `SHA-256=<base64>`
    #[default]
    Sha256,
    /// `shA-256=<base64>`
    Sha256MixedCase,
    /// `SHA-256=<base64>, Unknown-Digest-Algorithm=SomeValue`
    WithUnknownAlgorithm,
    /// Deprecated `SHA=<base64 sha1>` only.
    Sha1Only,
}

impl DigestStyle {
    pub fn header_value(self, body: &[u8]) -> String {
        match self {
            DigestStyle::Sha256 => digest::sha256_header_value(body),
            DigestStyle::Sha256MixedCase => format!("shA-256={}", digest::sha256_base64(body)),
            DigestStyle::WithUnknownAlgorithm => format!(
                "{}, Unknown-Digest-Algorithm=SomeValue",
                digest::sha256_header_value(body)
            ),
            DigestStyle::Sha1Only => format!("SHA={}", digest::sha1_base64(body)),
        }
    }
}

/// HTTP signature signer for requests.
#[derive(Debug, Clone)]
pub struct HttpSigSigner {
    key_pair: Arc<RsaKeyPair>,
    key_id: Option<String>,
    headers: Option<Vec<String>>,
    digest: DigestStyle,
}

impl HttpSigSigner {
    pub fn new(key_pair: Arc<RsaKeyPair>) -> Self {
        Self { key_pair, key_id: None, headers: None, digest: DigestStyle::Sha256 }
    }

    /// Declare a different `keyId` than the signing key's fingerprint.
    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    /// Sign exactly these (lowercase) header names.
    pub fn with_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.headers = Some(headers.into_iter().map(|h| h.into().to_ascii_lowercase()).collect());
        self
    }

    pub fn with_digest(mut self, digest: DigestStyle) -> Self {
        self.digest = digest;
        self
    }

    pub fn key_id(&self) -> String {
        self.key_id.clone().unwrap_or_else(|| self.key_pair.key_id())
    }

    /// `(request-target)` plus every header currently on the request.
    fn headers_to_sign(&self, request: &Request) -> Vec<String> {
        match &self.headers {
            Some(headers) => headers.clone(),
            None => {
                let mut headers = vec![REQUEST_TARGET.to_string()];
                headers.extend(request.headers.names());
                headers
            }
        }
    }

    fn add_missing_headers(&self, request: &mut Request) -> Result<(), SignatureError> {
        if !request.headers.contains("Host") {
            let host = request.host()?;
            request.put_header("Host", host);
        }
        if !request.headers.contains("Date") && !request.headers.contains("Original-Date") {
            request.put_header("Date", http_date(Utc::now()));
        }
        if !request.headers.contains("X-Request-Id") {
            request.put_header("X-Request-Id", Uuid::new_v4().to_string());
        }
        Ok(())
    }
}

impl RequestSigner for HttpSigSigner {
    fn sign(&self, request: &mut Request) -> Result<(), SignatureError> {
        self.add_missing_headers(request)?;
        let digest = self.digest.header_value(request.body_bytes());
        request.put_header("Digest", digest);
        request.remove_header("Authorization");

        let mut headers = self.headers_to_sign(request);
        if headers.is_empty() {
            headers.push("date".to_string());
        }
        let path = request.path_and_query()?;
        let text = signing_string(Some((&request.method, &path)), &request.headers, &headers)?;
        let signature = sign_rsa_sha256(&self.key_pair, &text);

        let params = SignatureParams {
            key_id: self.key_id(),
            algorithm: ALGORITHM.to_string(),
            headers,
            signature,
        };
        request.put_header("Authorization", format!("Signature {}", params.to_header_value()));
        Ok(())
    }
}

/// Sign `response` the way a server authenticating with HTTP signatures
/// does: echo `X-Request-Id` and the request signature, add `Date` and
/// `Digest`, then emit a `Signature` header.
pub fn sign_response(
    request: &Request,
    response: &mut Response,
    key_pair: &RsaKeyPair,
) -> Result<(), SignatureError> {
    if !response.headers.contains("Date") {
        response.headers.put("Date", http_date(Utc::now()));
    }
    if let Some(id) = request.header("X-Request-Id") {
        response.headers.put("X-Request-Id", id);
    }
    let authorization = request.header("Authorization");
    if let Some(params) = authorization.and_then(|v| SignatureParams::parse(v).ok()) {
        response.headers.put("X-Request-Signature", params.signature);
    }
    response.headers.put("Digest", digest::sha256_header_value(&response.body));

    let mut headers = vec![REQUEST_TARGET.to_string()];
    headers.extend(
        ["date", "digest", "x-request-id", "x-request-signature"]
            .into_iter()
            .filter(|h| response.headers.contains(h))
            .map(String::from),
    );
    let path = request.path_and_query()?;
    let text = signing_string(Some((&request.method, &path)), &response.headers, &headers)?;
    let params = SignatureParams {
        key_id: key_pair.key_id(),
        algorithm: ALGORITHM.to_string(),
        headers,
        signature: sign_rsa_sha256(key_pair, &text),
    };
    response.headers.put("Signature", params.to_header_value());
    Ok(())
}

/// RFC 1123 date as used by `Date` and `Original-Date`.
pub fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim().replace("GMT", "+0000").as_str())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Build the signing string for the listed headers.
///
/// `target` supplies method and `path?query` for `(request-target)`.
pub fn signing_string(
    target: Option<(&Method, &str)>,
    headers: &Headers,
    names: &[String],
) -> Result<String, SignatureError> {
    let mut lines = Vec::with_capacity(names.len());
    for name in names {
        let name = name.to_ascii_lowercase();
        if name == REQUEST_TARGET {
            let (method, path) = target.ok_or(SignatureError::NoRequestTarget)?;
            let method = method.as_str().to_ascii_lowercase();
            lines.push(format!("{}: {} {}", REQUEST_TARGET, method, path));
        } else {
            let value = headers
                .get(&name)
                .ok_or_else(|| SignatureError::MissingHeader(name.clone()))?;
            lines.push(format!("{}: {}", name, value));
        }
    }
    Ok(lines.join("\n"))
}

/// Base64 RSASSA-PKCS1-v1_5 SHA-256 signature of `text`.
pub fn sign_rsa_sha256(key_pair: &RsaKeyPair, text: &str) -> String {
    let signing_key = SigningKey::<Sha256>::new(key_pair.private_key().clone());
    STANDARD.encode(signing_key.sign(text.as_bytes()).to_bytes())
}

pub fn verify_rsa_sha256(
    key: &RsaPublicKey,
    text: &str,
    signature_b64: &str,
) -> Result<(), SignatureError> {
    let raw = STANDARD
        .decode(signature_b64)
        .map_err(|e| SignatureError::Malformed(e.to_string()))?;
    let signature =
        Signature::try_from(raw.as_slice()).map_err(|e| SignatureError::Malformed(e.to_string()))?;
    VerifyingKey::<Sha256>::new(key.clone())
        .verify(text.as_bytes(), &signature)
        .map_err(|_| SignatureError::Invalid)
}

fn param_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"([A-Za-z]+)\s*=\s*"([^"]*)""#).expect("static pattern"))
}

fn parse_params(value: &str) -> Vec<(String, String)> {
    param_regex()
        .captures_iter(value)
        .map(|c| (c[1].to_string(), c[2].to_string()))
        .collect()
}

fn strip_scheme<'a>(value: &'a str, scheme: &str) -> Option<&'a str> {
    let value = value.trim_start();
    let head = value.get(..scheme.len())?;
    if head.eq_ignore_ascii_case(scheme) {
        Some(&value[scheme.len()..])
    } else {
        None
    }
}

/// Parameters of an `Authorization: Signature ...` or `Signature:` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureParams {
    pub key_id: String,
    pub algorithm: String,
    pub headers: Vec<String>,
    pub signature: String,
}

impl SignatureParams {
    /// Parse either form. The `Signature ` scheme prefix is optional.
    pub fn parse(value: &str) -> Result<Self, SignatureError> {
        let body = strip_scheme(value, "Signature ").unwrap_or(value);
        let mut key_id = None;
        let mut algorithm = None;
        let mut headers = None;
        let mut signature = None;
        for (name, v) in parse_params(body) {
            match name.as_str() {
                "keyId" => key_id = Some(v),
                "algorithm" => algorithm = Some(v),
                "headers" => headers = Some(v),
                "signature" => signature = Some(v),
                _ => {}
            }
        }
        let key_id = key_id.ok_or_else(|| SignatureError::Malformed("missing keyId".into()))?;
        let signature =
            signature.ok_or_else(|| SignatureError::Malformed("missing signature".into()))?;
        let headers = headers
            .map(|h| h.split_whitespace().map(|s| s.to_ascii_lowercase()).collect())
            .unwrap_or_else(|| vec!["date".to_string()]);
        Ok(Self {
            key_id,
            algorithm: algorithm.unwrap_or_default(),
            headers,
            signature,
        })
    }

    pub fn to_header_value(&self) -> String {
        format!(
            "keyId=\"{}\",algorithm=\"{}\",headers=\"{}\",signature=\"{}\"",
            self.key_id,
            self.algorithm,
            self.headers.join(" "),
            self.signature
        )
    }

    pub fn covers(&self, header: &str) -> bool {
        self.headers.iter().any(|h| h.eq_ignore_ascii_case(header))
    }
}

/// `WWW-Authenticate: Signature realm="EWP",algorithms="...",headers="..."`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Challenge {
    pub realm: Option<String>,
    pub algorithms: Vec<String>,
    pub headers: Vec<String>,
}

impl Challenge {
    /// `None` unless the header uses the `Signature` scheme.
    pub fn parse(value: &str) -> Option<Self> {
        let body = strip_scheme(value, "Signature")?;
        let mut challenge = Challenge::default();
        for (name, v) in parse_params(body) {
            match name.as_str() {
                "realm" => challenge.realm = Some(v),
                "algorithms" => {
                    challenge.algorithms = v.split_whitespace().map(String::from).collect()
                }
                "headers" => {
                    challenge.headers =
                        v.split_whitespace().map(|s| s.to_ascii_lowercase()).collect()
                }
                _ => {}
            }
        }
        Some(challenge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::keys;

    fn signed_post() -> Request {
        let mut request = Request::new(Method::POST, "https://example.com/echo?x=1");
        request.put_header("Content-Type", "application/x-www-form-urlencoded");
        request.set_body(b"echo=a".to_vec());
        HttpSigSigner::new(keys().client.clone()).sign(&mut request).unwrap();
        request
    }

    #[test]
    fn test_sign_adds_required_headers() {
        let request = signed_post();
        assert_eq!(request.header("Host"), Some("example.com"));
        assert!(request.header("Date").is_some());
        assert_eq!(request.header("X-Request-Id").map(str::len), Some(36));
        assert_eq!(
            request.header("Digest"),
            Some(digest::sha256_header_value(b"echo=a").as_str())
        );
        let params = SignatureParams::parse(request.header("Authorization").unwrap()).unwrap();
        assert_eq!(params.key_id, keys().client.key_id());
        assert_eq!(params.algorithm, "rsa-sha256");
        for required in REQUIRED_REQUEST_HEADERS {
            assert!(params.covers(required), "{} not signed", required);
        }
        assert!(!params.covers("authorization"));
    }

    #[test]
    fn test_signature_verifies_with_public_key() {
        let request = signed_post();
        let params = SignatureParams::parse(request.header("Authorization").unwrap()).unwrap();
        let text = signing_string(
            Some((&Method::POST, "/echo?x=1")),
            &request.headers,
            &params.headers,
        )
        .unwrap();
        assert!(text.starts_with("(request-target): post /echo?x=1\n"));
        verify_rsa_sha256(keys().client.public_key(), &text, &params.signature).unwrap();
        assert!(matches!(
            verify_rsa_sha256(keys().server.public_key(), &text, &params.signature),
            Err(SignatureError::Invalid)
        ));
    }

    #[test]
    fn test_fragment_is_not_signed() {
        let mut request = Request::new(Method::GET, "https://example.com/echo?echo=a#results");
        HttpSigSigner::new(keys().client.clone()).sign(&mut request).unwrap();
        let params = SignatureParams::parse(request.header("Authorization").unwrap()).unwrap();
        let text = signing_string(
            Some((&Method::GET, "/echo?echo=a")),
            &request.headers,
            &params.headers,
        )
        .unwrap();
        assert!(text.starts_with("(request-target): get /echo?echo=a\n"));
        verify_rsa_sha256(keys().client.public_key(), &text, &params.signature).unwrap();
    }

    #[test]
    fn test_resign_does_not_cover_previous_authorization() {
        let mut request = signed_post();
        request.put_header("Accept-Signature", "rsa-sha256");
        HttpSigSigner::new(keys().client.clone()).sign(&mut request).unwrap();
        let params = SignatureParams::parse(request.header("Authorization").unwrap()).unwrap();
        assert!(params.covers("accept-signature"));
        assert!(!params.covers("authorization"));
    }

    #[test]
    fn test_overrides() {
        let mut request = Request::new(Method::GET, "https://example.com/echo");
        HttpSigSigner::new(keys().unregistered.clone())
            .with_key_id(keys().client.key_id())
            .with_headers(["(request-target)", "host", "date", "x-request-id"])
            .with_digest(DigestStyle::Sha1Only)
            .sign(&mut request)
            .unwrap();
        let params = SignatureParams::parse(request.header("Authorization").unwrap()).unwrap();
        assert_eq!(params.key_id, keys().client.key_id());
        assert!(!params.covers("digest"));
        assert!(request.header("Digest").unwrap().starts_with("SHA="));
    }

    #[test]
    fn test_missing_listed_header_is_an_error() {
        let mut request = Request::new(Method::GET, "https://example.com/echo");
        let result = HttpSigSigner::new(keys().client.clone())
            .with_headers(["host", "x-nonexistent"])
            .sign(&mut request);
        assert!(matches!(result, Err(SignatureError::MissingHeader(h)) if h == "x-nonexistent"));
    }

    #[test]
    fn test_original_date_suppresses_date() {
        let mut request = Request::new(Method::GET, "https://example.com/echo");
        request.put_header("Original-Date", http_date(Utc::now()));
        HttpSigSigner::new(keys().client.clone()).sign(&mut request).unwrap();
        assert!(request.header("Date").is_none());
    }

    #[test]
    fn test_digest_styles() {
        assert!(DigestStyle::Sha256MixedCase.header_value(b"x").starts_with("shA-256="));
        assert!(DigestStyle::WithUnknownAlgorithm
            .header_value(b"x")
            .ends_with(", Unknown-Digest-Algorithm=SomeValue"));
    }

    #[test]
    fn test_http_date_round_trip() {
        let now = Utc::now();
        let parsed = parse_http_date(&http_date(now)).unwrap();
        assert!((now - parsed).num_seconds().abs() <= 1);
        assert!(parse_http_date("yesterday").is_none());
    }

    #[test]
    fn test_challenge_parse() {
        let c = Challenge::parse(
            r#"Signature realm="EWP", algorithms="rsa-sha256", headers="(request-target) host""#,
        )
        .unwrap();
        assert_eq!(c.realm.as_deref(), Some("EWP"));
        assert_eq!(c.algorithms, vec!["rsa-sha256"]);
        assert_eq!(c.headers, vec!["(request-target)", "host"]);
        assert!(Challenge::parse("Basic realm=\"x\"").is_none());
    }
}

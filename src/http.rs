//! Minimal HTTP message model and the transport seam.
//!
//! The engine never opens sockets itself. Callers supply a [`Transport`]
//! that sends a [`Request`] (including an optional TLS client identity) and
//! returns the raw [`Response`].

use std::sync::Arc;
use std::time::Duration;

use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;
use thiserror::Error;
use url::Url;

pub use http::Method;

/// Combination-code letter and body rules for the HTTP methods the suites use.
pub trait MethodExt {
    /// One-letter code used as the first character of a combination code.
    fn code(&self) -> char;
    fn has_body(&self) -> bool;
}

impl MethodExt for Method {
    fn code(&self) -> char {
        if *self == Method::GET {
            'G'
        } else if *self == Method::POST {
            'P'
        } else {
            '-'
        }
    }

    fn has_body(&self) -> bool {
        *self == Method::POST || *self == Method::PUT
    }
}

/// Single-valued header map with case-insensitive names.
///
/// Setting a header that already exists replaces its value. Values that
/// are not visible ASCII read back as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(HeaderMap);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Insert or replace. A name or value HTTP cannot carry is dropped.
    pub fn put(&mut self, name: impl AsRef<str>, value: impl AsRef<str>) {
        let name = name.as_ref();
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value.as_ref())) {
            (Ok(name), Ok(value)) => {
                self.0.insert(name, value);
            }
            _ => tracing::warn!(header = name, "dropping header that HTTP cannot carry"),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let value = self.0.remove(name)?;
        value.to_str().ok().map(String::from)
    }

    /// Lowercased header names.
    pub fn names(&self) -> Vec<String> {
        self.0.keys().map(|k| k.as_str().to_string()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().filter_map(|(k, v)| Some((k.as_str(), v.to_str().ok()?)))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &HeaderMap {
        &self.0
    }
}

impl From<HeaderMap> for Headers {
    fn from(map: HeaderMap) -> Self {
        Self(map)
    }
}

/// TLS client certificate and its PKCS#8 private key, both DER-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub certificate_der: Vec<u8>,
    pub private_key_der: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Vec<u8>>,
    pub client_certificate: Option<Arc<ClientIdentity>>,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Headers::new(),
            body: None,
            client_certificate: None,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn put_header(&mut self, name: impl AsRef<str>, value: impl AsRef<str>) {
        self.headers.put(name, value);
    }

    pub fn remove_header(&mut self, name: &str) -> Option<String> {
        self.headers.remove(name)
    }

    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.body = Some(body.into());
    }

    pub fn body_bytes(&self) -> &[u8] {
        self.body.as_deref().unwrap_or(&[])
    }

    /// The `path?query` part of the URL, as used by `(request-target)`.
    pub fn path_and_query(&self) -> Result<String, UrlError> {
        Ok(UrlParts::parse(&self.url)?.path_and_query)
    }

    /// `Host` header value: the host, plus the port when it is not the
    /// scheme's default.
    pub fn host(&self) -> Result<String, UrlError> {
        let parts = UrlParts::parse(&self.url)?;
        Ok(match parts.port {
            Some(port) => format!("{}:{}", parts.host, port),
            None => parts.host,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self { status, headers: Headers::new(), body: Vec::new() }
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.headers.put(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Io(String),
}

/// Blocking request/response exchange with the endpoint under test.
pub trait Transport: Send + Sync {
    fn send(&self, request: &Request, timeout: Duration) -> Result<Response, TransportError>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrlError {
    #[error("invalid URL {url}: {source}")]
    Invalid {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("URL has no host: {0}")]
    MissingHost(String),
}

/// The pieces of an absolute URL the engine needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlParts {
    pub scheme: String,
    pub host: String,
    /// Explicit port, `None` when it is the scheme's default.
    pub port: Option<u16>,
    /// Path and query. The fragment never reaches the server and is dropped.
    pub path_and_query: String,
}

impl UrlParts {
    pub fn parse(url: &str) -> Result<Self, UrlError> {
        let parsed = Url::parse(url)
            .map_err(|source| UrlError::Invalid { url: url.to_string(), source })?;
        let host = match parsed.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(UrlError::MissingHost(url.to_string())),
        };
        let path_and_query = match parsed.query() {
            Some(query) => format!("{}?{}", parsed.path(), query),
            None => parsed.path().to_string(),
        };
        Ok(Self { scheme: parsed.scheme().to_string(), host, port: parsed.port(), path_and_query })
    }
}

/// Append `query` to the query of `url`, using `&` if it already has one.
///
/// Any fragment stays at the end.
pub fn append_query(url: &str, query: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            let combined = match parsed.query() {
                Some(existing) if !existing.is_empty() => format!("{}&{}", existing, query),
                _ => query.to_string(),
            };
            parsed.set_query(Some(&combined));
            parsed.into()
        }
        Err(_) if url.contains('?') => format!("{}&{}", url, query),
        Err(_) => format!("{}?{}", url, query),
    }
}

/// Split a comma-separated header value into trimmed, non-empty tokens.
pub fn comma_separated_tokens(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Codings a client accepts given its `Accept-Encoding` header.
///
/// `identity` is acceptable unless explicitly refused (directly or through
/// `*;q=0`). Codings listed with `q=0` are refused.
pub fn acceptable_codings(accept_encoding: Option<&str>) -> Vec<String> {
    let mut result = vec!["identity".to_string()];
    let mut identity_explicit = false;
    for entry in comma_separated_tokens(accept_encoding) {
        let entry = entry.to_ascii_lowercase();
        let params: Vec<&str> =
            entry.split(';').map(str::trim).filter(|s| !s.is_empty()).collect();
        let Some(&coding) = params.first() else { continue };
        let acceptable = !params.iter().any(|p| is_zero_quality(p));
        if coding == "*" {
            if !acceptable && !identity_explicit {
                result.retain(|c| c != "identity");
            }
        } else if acceptable {
            if !result.iter().any(|c| c == coding) {
                result.push(coding.to_string());
            }
            if coding == "identity" {
                identity_explicit = true;
            }
        } else {
            result.retain(|c| c != coding);
        }
    }
    result
}

fn is_zero_quality(param: &str) -> bool {
    match param.replace(' ', "").strip_prefix("q=") {
        Some(q) => q.parse::<f32>().map(|v| v == 0.0).unwrap_or(false),
        None => false,
    }
}

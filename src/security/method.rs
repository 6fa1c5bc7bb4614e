//! Security methods and the 4-letter security selector.
//!
//! Each of the four dimensions (client authentication, server
//! authentication, request encryption, response encryption) has a small
//! closed set of methods. Every method has a one-letter code that is only
//! meaningful at its position in a selector: `T` is "CA-signed TLS" in the
//! first position and "plain TLS" in the third.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The four security dimensions, in selector position order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Dimension {
    ClientAuthentication,
    ServerAuthentication,
    RequestEncryption,
    ResponseEncryption,
}

impl Dimension {
    /// Position of this dimension inside a 4-letter selector.
    pub fn position(self) -> usize {
        match self {
            Dimension::ClientAuthentication => 0,
            Dimension::ServerAuthentication => 1,
            Dimension::RequestEncryption => 2,
            Dimension::ResponseEncryption => 3,
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dimension::ClientAuthentication => "Client Authentication",
            Dimension::ServerAuthentication => "Server Authentication",
            Dimension::RequestEncryption => "Request Encryption",
            Dimension::ResponseEncryption => "Response Encryption",
        };
        f.write_str(name)
    }
}

/// Common behavior of the per-dimension method enums.
pub trait SecurityMethod: Copy + Eq + fmt::Debug + 'static {
    /// Dimension this method belongs to.
    const DIMENSION: Dimension;

    /// Every method of the dimension, in declaration order.
    fn all() -> &'static [Self];

    /// One-letter code, scoped to the dimension.
    fn code(self) -> char;

    /// Human description used in legends and explanations.
    fn description(self) -> &'static str;

    fn from_code(code: char) -> Option<Self> {
        Self::all().iter().copied().find(|m| m.code() == code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ClientAuth {
    None,
    TlsSelfSigned,
    TlsCaSigned,
    HttpSig,
}

impl SecurityMethod for ClientAuth {
    const DIMENSION: Dimension = Dimension::ClientAuthentication;

    fn all() -> &'static [Self] {
        &[
            ClientAuth::None,
            ClientAuth::TlsSelfSigned,
            ClientAuth::TlsCaSigned,
            ClientAuth::HttpSig,
        ]
    }

    fn code(self) -> char {
        match self {
            ClientAuth::None => 'A',
            ClientAuth::TlsSelfSigned => 'S',
            ClientAuth::TlsCaSigned => 'T',
            ClientAuth::HttpSig => 'H',
        }
    }

    fn description(self) -> &'static str {
        match self {
            ClientAuth::None => "No Client Authentication (Anonymous Client)",
            ClientAuth::TlsSelfSigned => "Client Authentication with TLS Certificate (self-signed)",
            ClientAuth::TlsCaSigned => "Client Authentication with TLS Certificate (CA-signed)",
            ClientAuth::HttpSig => "Client Authentication with HTTP Signature",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ServerAuth {
    TlsCert,
    HttpSig,
}

impl SecurityMethod for ServerAuth {
    const DIMENSION: Dimension = Dimension::ServerAuthentication;

    fn all() -> &'static [Self] {
        &[ServerAuth::TlsCert, ServerAuth::HttpSig]
    }

    fn code(self) -> char {
        match self {
            ServerAuth::TlsCert => 'T',
            ServerAuth::HttpSig => 'H',
        }
    }

    fn description(self) -> &'static str {
        match self {
            ServerAuth::TlsCert => "Server Authentication with TLS Certificate (CA-signed)",
            ServerAuth::HttpSig => "Server Authentication with HTTP Signature",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RequestEncryption {
    Tls,
    EwpRsaAes,
}

impl SecurityMethod for RequestEncryption {
    const DIMENSION: Dimension = Dimension::RequestEncryption;

    fn all() -> &'static [Self] {
        &[RequestEncryption::Tls, RequestEncryption::EwpRsaAes]
    }

    fn code(self) -> char {
        match self {
            RequestEncryption::Tls => 'T',
            RequestEncryption::EwpRsaAes => 'E',
        }
    }

    fn description(self) -> &'static str {
        match self {
            RequestEncryption::Tls => "Request Encryption only with regular TLS",
            RequestEncryption::EwpRsaAes => "Request Encryption with ewp-rsa-aes128gcm",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResponseEncryption {
    Tls,
    EwpRsaAes,
}

impl SecurityMethod for ResponseEncryption {
    const DIMENSION: Dimension = Dimension::ResponseEncryption;

    fn all() -> &'static [Self] {
        &[ResponseEncryption::Tls, ResponseEncryption::EwpRsaAes]
    }

    fn code(self) -> char {
        match self {
            ResponseEncryption::Tls => 'T',
            ResponseEncryption::EwpRsaAes => 'E',
        }
    }

    fn description(self) -> &'static str {
        match self {
            ResponseEncryption::Tls => "Response Encryption only with regular TLS",
            ResponseEncryption::EwpRsaAes => "Response Encryption with ewp-rsa-aes128gcm",
        }
    }
}

/// One concrete method per dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SecurityMethods {
    pub client_auth: ClientAuth,
    pub server_auth: ServerAuth,
    pub request_encryption: RequestEncryption,
    pub response_encryption: ResponseEncryption,
}

impl SecurityMethods {
    pub fn new(
        client_auth: ClientAuth,
        server_auth: ServerAuth,
        request_encryption: RequestEncryption,
        response_encryption: ResponseEncryption,
    ) -> Self {
        Self { client_auth, server_auth, request_encryption, response_encryption }
    }

    /// The 4-letter code, e.g. `"HTTT"`.
    pub fn code(&self) -> String {
        [
            self.client_auth.code(),
            self.server_auth.code(),
            self.request_encryption.code(),
            self.response_encryption.code(),
        ]
        .iter()
        .collect()
    }
}

/// Errors raised while parsing a security selector.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("security selector must have exactly 4 characters, got {0:?}")]
    InvalidLength(String),
    #[error("unknown {dimension} code {code:?}")]
    UnknownCode { dimension: Dimension, code: char },
}

/// A selector position: either a concrete method or the `*` wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selector<M> {
    Any,
    Exactly(M),
}

impl<M: SecurityMethod> Selector<M> {
    fn parse(code: char) -> Result<Self, SelectorError> {
        if code == '*' {
            return Ok(Selector::Any);
        }
        M::from_code(code)
            .map(Selector::Exactly)
            .ok_or(SelectorError::UnknownCode { dimension: M::DIMENSION, code })
    }

    pub fn matches(&self, method: M) -> bool {
        match self {
            Selector::Any => true,
            Selector::Exactly(m) => *m == method,
        }
    }

    fn code(&self) -> char {
        match self {
            Selector::Any => '*',
            Selector::Exactly(m) => m.code(),
        }
    }

    fn description(&self) -> String {
        match self {
            Selector::Any => format!("Any {} method", M::DIMENSION),
            Selector::Exactly(m) => m.description().to_string(),
        }
    }
}

/// Parsed 4-letter security selector, e.g. `"HT*E"`.
///
/// Equality compares the resolved selectors, so `"*T*T"` equals itself but
/// never equals `"AT*T"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HttpSecurityDescription {
    pub client_auth: Selector<ClientAuth>,
    pub server_auth: Selector<ServerAuth>,
    pub request_encryption: Selector<RequestEncryption>,
    pub response_encryption: Selector<ResponseEncryption>,
}

impl HttpSecurityDescription {
    pub fn parse(text: &str) -> Result<Self, SelectorError> {
        let chars: Vec<char> = text.chars().collect();
        if chars.len() != 4 {
            return Err(SelectorError::InvalidLength(text.to_string()));
        }
        Ok(Self {
            client_auth: Selector::parse(chars[0])?,
            server_auth: Selector::parse(chars[1])?,
            request_encryption: Selector::parse(chars[2])?,
            response_encryption: Selector::parse(chars[3])?,
        })
    }

    /// Selector matching exactly the given methods.
    pub fn exact(methods: SecurityMethods) -> Self {
        Self {
            client_auth: Selector::Exactly(methods.client_auth),
            server_auth: Selector::Exactly(methods.server_auth),
            request_encryption: Selector::Exactly(methods.request_encryption),
            response_encryption: Selector::Exactly(methods.response_encryption),
        }
    }

    pub fn matches(&self, methods: &SecurityMethods) -> bool {
        self.client_auth.matches(methods.client_auth)
            && self.server_auth.matches(methods.server_auth)
            && self.request_encryption.matches(methods.request_encryption)
            && self.response_encryption.matches(methods.response_encryption)
    }

    /// Four `key:value` lines, one per dimension.
    pub fn explanation(&self) -> String {
        let entries = [
            (self.client_auth.code(), 0, self.client_auth.description()),
            (self.server_auth.code(), 1, self.server_auth.description()),
            (self.request_encryption.code(), 2, self.request_encryption.description()),
            (self.response_encryption.code(), 3, self.response_encryption.description()),
        ];
        entries
            .iter()
            .map(|(code, position, description)| {
                format!("{}:{}", positional_key(*code, *position), description)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Every concrete code of every dimension with its description, e.g.
    /// `("-T--", "Server Authentication with TLS Certificate (CA-signed)")`.
    pub fn legend() -> Vec<(String, &'static str)> {
        let mut legend = Vec::new();
        push_legend::<ClientAuth>(&mut legend);
        push_legend::<ServerAuth>(&mut legend);
        push_legend::<RequestEncryption>(&mut legend);
        push_legend::<ResponseEncryption>(&mut legend);
        legend
    }
}

fn positional_key(code: char, position: usize) -> String {
    (0..4).map(|i| if i == position { code } else { '-' }).collect()
}

fn push_legend<M: SecurityMethod>(legend: &mut Vec<(String, &'static str)>) {
    for method in M::all() {
        legend.push((positional_key(method.code(), M::DIMENSION.position()), method.description()));
    }
}

impl fmt::Display for HttpSecurityDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}",
            self.client_auth.code(),
            self.server_auth.code(),
            self.request_encryption.code(),
            self.response_encryption.code()
        )
    }
}

impl std::str::FromStr for HttpSecurityDescription {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

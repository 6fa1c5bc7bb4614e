//! Test combinations: one HTTP method plus one method per security dimension.

mod generator;

pub use generator::{generate, DeclaredSecurity, GeneratedMatrix};

use std::fmt;
use std::sync::Arc;

use crate::http::{Method, MethodExt};
use crate::registry::ApiEntry;
use crate::security::method::{
    ClientAuth, HttpSecurityDescription, RequestEncryption, ResponseEncryption, SecurityMethods,
    Selector, SelectorError, ServerAuth,
};

/// Immutable; `with_changed_*` returns a modified copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Combination {
    http_method: Method,
    url: String,
    methods: SecurityMethods,
    api_entry: Option<Arc<ApiEntry>>,
}

impl Combination {
    pub fn new(
        http_method: Method,
        url: impl Into<String>,
        methods: SecurityMethods,
        api_entry: Option<Arc<ApiEntry>>,
    ) -> Self {
        Self { http_method, url: url.into(), methods, api_entry }
    }

    /// Build from a 5-letter code such as `"PSTTT"`.
    pub fn from_code(
        code: &str,
        url: impl Into<String>,
        api_entry: Option<Arc<ApiEntry>>,
    ) -> Result<Self, SelectorError> {
        let mut chars = code.chars();
        let http_method = match chars.next() {
            Some('G') => Method::GET,
            Some('P') => Method::POST,
            _ => return Err(SelectorError::InvalidLength(code.to_string())),
        };
        let security = HttpSecurityDescription::parse(chars.as_str())?;
        let methods = match security {
            HttpSecurityDescription {
                client_auth: Selector::Exactly(cli),
                server_auth: Selector::Exactly(srv),
                request_encryption: Selector::Exactly(req),
                response_encryption: Selector::Exactly(res),
            } => SecurityMethods::new(cli, srv, req, res),
            _ => return Err(SelectorError::InvalidLength(code.to_string())),
        };
        Ok(Self::new(http_method, url, methods, api_entry))
    }

    pub fn http_method(&self) -> &Method {
        &self.http_method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn methods(&self) -> &SecurityMethods {
        &self.methods
    }

    pub fn client_auth(&self) -> ClientAuth {
        self.methods.client_auth
    }

    pub fn server_auth(&self) -> ServerAuth {
        self.methods.server_auth
    }

    pub fn request_encryption(&self) -> RequestEncryption {
        self.methods.request_encryption
    }

    pub fn response_encryption(&self) -> ResponseEncryption {
        self.methods.response_encryption
    }

    pub fn api_entry(&self) -> Option<&Arc<ApiEntry>> {
        self.api_entry.as_ref()
    }

    pub fn with_changed_http_method(&self, http_method: Method) -> Self {
        Self { http_method, ..self.clone() }
    }

    pub fn with_changed_url(&self, url: impl Into<String>) -> Self {
        Self { url: url.into(), ..self.clone() }
    }

    pub fn with_changed_client_auth(&self, client_auth: ClientAuth) -> Self {
        Self { methods: SecurityMethods { client_auth, ..self.methods }, ..self.clone() }
    }

    pub fn with_changed_server_auth(&self, server_auth: ServerAuth) -> Self {
        Self { methods: SecurityMethods { server_auth, ..self.methods }, ..self.clone() }
    }

    pub fn with_changed_request_encryption(&self, request_encryption: RequestEncryption) -> Self {
        Self { methods: SecurityMethods { request_encryption, ..self.methods }, ..self.clone() }
    }

    pub fn with_changed_response_encryption(
        &self,
        response_encryption: ResponseEncryption,
    ) -> Self {
        Self { methods: SecurityMethods { response_encryption, ..self.methods }, ..self.clone() }
    }

    /// 4-letter security code, e.g. `"HTTT"`.
    pub fn security_code(&self) -> String {
        self.methods.code()
    }

    /// 5-letter code, e.g. `"PHTTT"`.
    pub fn code(&self) -> String {
        format!("{}{}", self.http_method.code(), self.methods.code())
    }

    pub fn matches(&self, selector: &HttpSecurityDescription) -> bool {
        selector.matches(&self.methods)
    }

    /// Security legend prefixed with the HTTP method column.
    pub fn legend() -> Vec<(String, &'static str)> {
        let mut legend = vec![
            ("G----".to_string(), "HTTP GET"),
            ("P----".to_string(), "HTTP POST"),
        ];
        legend.extend(
            HttpSecurityDescription::legend()
                .into_iter()
                .map(|(key, description)| (format!("-{}", key), description)),
        );
        legend
    }
}

impl fmt::Display for Combination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Combination[{}]", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn combo(code: &str) -> Combination {
        Combination::from_code(code, "https://example.com/echo", None).unwrap()
    }

    #[test]
    fn test_display_and_codes() {
        let c = combo("PHTTT");
        assert_eq!(c.to_string(), "Combination[PHTTT]");
        assert_eq!(c.security_code(), "HTTT");
        assert_eq!(c.client_auth(), ClientAuth::HttpSig);
    }

    #[test]
    fn test_with_changed_returns_new_value() {
        let c = combo("GSTTT");
        let changed = c
            .with_changed_http_method(Method::PUT)
            .with_changed_response_encryption(ResponseEncryption::EwpRsaAes);
        assert_eq!(changed.code(), "-STTE");
        assert_eq!(c.code(), "GSTTT");
        let relaxed = combo("PHHTT").with_changed_server_auth(ServerAuth::TlsCert);
        assert_eq!(relaxed.code(), "PHTTT");
        assert_eq!(c.with_changed_url("https://x/y").url(), "https://x/y");
    }

    #[test]
    fn test_from_code_rejects_wildcards() {
        assert!(Combination::from_code("GH*TT", "https://h", None).is_err());
        assert!(Combination::from_code("XHTTT", "https://h", None).is_err());
    }

    #[test]
    fn test_legend_has_method_column() {
        let legend = Combination::legend();
        assert_eq!(legend[0].0, "G----");
        assert!(legend.iter().any(|(k, _)| k == "--T--"));
        assert_eq!(legend.len(), 12);
    }
}

//! Expands declared security support into the test matrix.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::Combination;
use crate::http::{Method, MethodExt};
use crate::registry::ApiEntry;
use crate::security::method::{
    ClientAuth, Dimension, RequestEncryption, ResponseEncryption, SecurityMethod, SecurityMethods,
    SelectorError, ServerAuth,
};

/// Security methods an endpoint declares, per dimension.
///
/// `None` means the endpoint did not declare the dimension at all, which
/// selects the defaults: no client authentication methods, TLS server
/// certificate, plain TLS for both bodies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredSecurity {
    pub client_auth: Option<Vec<ClientAuth>>,
    pub server_auth: Option<Vec<ServerAuth>>,
    pub request_encryption: Option<Vec<RequestEncryption>>,
    pub response_encryption: Option<Vec<ResponseEncryption>>,
    /// Declared methods the engine does not recognize, as found.
    #[serde(default)]
    pub unrecognized: Vec<String>,
}

fn parse_codes<M: SecurityMethod>(codes: Option<&str>) -> Result<Option<Vec<M>>, SelectorError> {
    codes
        .map(|codes| {
            codes
                .chars()
                .map(|c| {
                    M::from_code(c)
                        .ok_or(SelectorError::UnknownCode { dimension: M::DIMENSION, code: c })
                })
                .collect()
        })
        .transpose()
}

impl DeclaredSecurity {
    /// Build from per-dimension code strings, e.g. `(Some("AH"), Some("TH"), None, Some("TE"))`.
    pub fn from_codes(
        client_auth: Option<&str>,
        server_auth: Option<&str>,
        request_encryption: Option<&str>,
        response_encryption: Option<&str>,
    ) -> Result<Self, SelectorError> {
        Ok(Self {
            client_auth: parse_codes(client_auth)?,
            server_auth: parse_codes(server_auth)?,
            request_encryption: parse_codes(request_encryption)?,
            response_encryption: parse_codes(response_encryption)?,
            unrecognized: Vec::new(),
        })
    }

    pub fn supports_client_auth(&self, method: ClientAuth) -> bool {
        self.client_auth.as_ref().is_some_and(|m| m.contains(&method))
    }

    pub fn supports_server_auth(&self, method: ServerAuth) -> bool {
        match &self.server_auth {
            Some(m) => m.contains(&method),
            None => method == ServerAuth::TlsCert,
        }
    }

    pub fn supports_request_encryption(&self, method: RequestEncryption) -> bool {
        match &self.request_encryption {
            Some(m) => m.contains(&method),
            None => method == RequestEncryption::Tls,
        }
    }

    pub fn supports_response_encryption(&self, method: ResponseEncryption) -> bool {
        match &self.response_encryption {
            Some(m) => m.contains(&method),
            None => method == ResponseEncryption::Tls,
        }
    }
}

/// Combinations to run plus the advisories raised while building them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedMatrix {
    pub combinations: Vec<Combination>,
    pub notices: Vec<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

fn unsupported(dimension: Dimension) -> String {
    format!(
        "This endpoint does not support ANY of the {} methods recognized by the validator.",
        dimension.to_string().to_lowercase()
    )
}

fn client_auth_methods(
    declared: &DeclaredSecurity,
    matrix: &mut GeneratedMatrix,
) -> Vec<ClientAuth> {
    // Anonymous requests are always tried, to see them rejected.
    let mut methods = vec![ClientAuth::None];
    if declared.supports_client_auth(ClientAuth::TlsSelfSigned) {
        methods.push(ClientAuth::TlsSelfSigned);
    } else if declared.supports_client_auth(ClientAuth::TlsCaSigned) {
        matrix.notices.push(
            "The validator is able to validate TLS Client Authentication ONLY with a \
             self-signed client certificate. This endpoint declares that it does not support \
             self-signed Client Certificates. Therefore, TLS Client Authentication tests will \
             be skipped."
                .to_string(),
        );
    }
    if declared.supports_client_auth(ClientAuth::HttpSig) {
        methods.push(ClientAuth::HttpSig);
    } else {
        matrix.warnings.push(
            "It is RECOMMENDED for all server endpoints to support HTTP Signature Client \
             Authentication. This endpoint doesn't."
                .to_string(),
        );
    }
    if methods.len() <= 1 {
        matrix.errors.push(unsupported(Dimension::ClientAuthentication));
    }
    methods
}

fn server_auth_methods(
    declared: &DeclaredSecurity,
    matrix: &mut GeneratedMatrix,
) -> Vec<ServerAuth> {
    let methods: Vec<ServerAuth> =
        ServerAuth::all().iter().copied().filter(|m| declared.supports_server_auth(*m)).collect();
    if declared.supports_server_auth(ServerAuth::HttpSig) {
        if !declared.supports_server_auth(ServerAuth::TlsCert) {
            matrix.warnings.push(
                "Server which support HTTP Signature Server Authentication SHOULD also support \
                 TLS Server Certificate Authentication"
                    .to_string(),
            );
        }
    } else {
        matrix.notices.push(
            "It is RECOMMENDED for all servers to support HTTP Signature Server Authentication."
                .to_string(),
        );
    }
    if methods.is_empty() {
        matrix.errors.push(unsupported(Dimension::ServerAuthentication));
    }
    methods
}

fn supported<M: SecurityMethod>(
    supports: impl Fn(M) -> bool,
    matrix: &mut GeneratedMatrix,
) -> Vec<M> {
    let methods: Vec<M> = M::all().iter().copied().filter(|m| supports(*m)).collect();
    if methods.is_empty() {
        matrix.errors.push(unsupported(M::DIMENSION));
    }
    methods
}

/// Build the ordered, pruned combination matrix.
///
/// Order is HTTP method first (GET before POST), then client auth, server
/// auth, request encryption, response encryption, each in enum order. GET is
/// never combined with encrypted requests.
pub fn generate(
    declared: &DeclaredSecurity,
    url: &str,
    api_entry: Option<Arc<ApiEntry>>,
    http_methods: &[Method],
) -> GeneratedMatrix {
    let mut matrix = GeneratedMatrix::default();
    for what in &declared.unrecognized {
        matrix.notices.push(format!("Unrecognized security method: {}", what));
    }

    let cli = client_auth_methods(declared, &mut matrix);
    let srv = server_auth_methods(declared, &mut matrix);
    let req = supported(|m| declared.supports_request_encryption(m), &mut matrix);
    let res = supported(|m| declared.supports_response_encryption(m), &mut matrix);

    let mut http_methods = http_methods.to_vec();
    http_methods.sort_by_key(|m| m.code());
    http_methods.dedup();

    for http_method in &http_methods {
        for &c in &cli {
            for &s in &srv {
                for &q in &req {
                    if *http_method == Method::GET && q == RequestEncryption::EwpRsaAes {
                        continue;
                    }
                    for &r in &res {
                        matrix.combinations.push(Combination::new(
                            http_method.clone(),
                            url,
                            SecurityMethods::new(c, s, q, r),
                            api_entry.clone(),
                        ));
                    }
                }
            }
        }
    }
    matrix
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://example.com/echo";
    const BOTH: &[Method] = &[Method::POST, Method::GET];

    fn codes(matrix: &GeneratedMatrix) -> Vec<String> {
        matrix.combinations.iter().map(Combination::code).collect()
    }

    #[test]
    fn test_always_includes_anonymous() {
        let declared = DeclaredSecurity::from_codes(Some("H"), None, None, None).unwrap();
        let matrix = generate(&declared, URL, None, BOTH);
        assert_eq!(codes(&matrix), vec!["GATTT", "GHTTT", "PATTT", "PHTTT"]);
        assert!(matrix.errors.is_empty());
        // no HttpSig server auth declared
        assert_eq!(matrix.notices.len(), 1);
    }

    #[test]
    fn test_never_get_with_encrypted_request() {
        let declared =
            DeclaredSecurity::from_codes(Some("H"), Some("T"), Some("TE"), Some("T")).unwrap();
        let matrix = generate(&declared, URL, None, BOTH);
        assert!(matrix.combinations.iter().all(|c| {
            let get = *c.http_method() == Method::GET;
            !(get && c.request_encryption() == RequestEncryption::EwpRsaAes)
        }));
        assert!(codes(&matrix).contains(&"PHTET".to_string()));
    }

    #[test]
    fn test_ordering_is_stable() {
        let declared =
            DeclaredSecurity::from_codes(Some("SH"), Some("TH"), Some("T"), Some("TE")).unwrap();
        let matrix = generate(&declared, URL, None, &[Method::GET]);
        assert_eq!(
            codes(&matrix),
            vec![
                "GATTT", "GATTE", "GAHTT", "GAHTE", "GSTTT", "GSTTE", "GSHTT", "GSHTE", "GHTTT",
                "GHTTE", "GHHTT", "GHHTE"
            ]
        );
    }

    #[test]
    fn test_no_client_auth_is_an_error() {
        let declared = DeclaredSecurity::default();
        let matrix = generate(&declared, URL, None, BOTH);
        assert_eq!(matrix.errors.len(), 1);
        assert!(matrix.errors[0].contains("client authentication"));
        assert_eq!(matrix.warnings.len(), 1);
        // anonymous combinations are still produced
        assert_eq!(codes(&matrix), vec!["GATTT", "PATTT"]);
    }

    #[test]
    fn test_empty_dimension_yields_no_combinations() {
        let declared = DeclaredSecurity::from_codes(Some("H"), Some(""), None, None).unwrap();
        let matrix = generate(&declared, URL, None, BOTH);
        assert!(matrix.combinations.is_empty());
        assert!(matrix.errors[0].contains("server authentication"));
    }

    #[test]
    fn test_ca_signed_only_is_a_notice() {
        let declared = DeclaredSecurity::from_codes(Some("TH"), Some("H"), None, None).unwrap();
        let matrix = generate(&declared, URL, None, &[Method::POST]);
        assert!(matrix.combinations.iter().all(|c| c.client_auth() != ClientAuth::TlsCaSigned));
        assert!(matrix.notices.iter().any(|n| n.contains("self-signed")));
        assert!(matrix.warnings.iter().any(|w| w.contains("SHOULD also support")));
    }

    #[test]
    fn test_from_codes_rejects_unknown() {
        assert!(DeclaredSecurity::from_codes(Some("X"), None, None, None).is_err());
    }
}

//! Suite-scoped mutable context.

use std::sync::Arc;

use rsa::RsaPublicKey;

use crate::combination::{Combination, DeclaredSecurity};
use crate::document::DocumentType;
use crate::registry::ApiEntry;
use crate::security::{RequestEncryption, ResponseEncryption};
use crate::version::SemanticVersion;

/// Everything one suite run learns as it goes. Owned by a single
/// orchestrator and dropped with it.
#[derive(Debug, Clone)]
pub struct SuiteState {
    pub url: String,
    pub api: String,
    pub version: SemanticVersion,
    /// Document type of successful responses.
    pub response_document: DocumentType,
    /// Element listing the identifiers our credentials cover (e.g. `hei-id`).
    pub identifier_element: Option<String>,
    /// Element holding values the endpoint must repeat back (e.g. `echo`).
    pub value_element: Option<String>,
    /// Declared security support; filled from the registry when not given.
    pub declared: Option<DeclaredSecurity>,
    pub matched_entry: Option<Arc<ApiEntry>>,
    pub server_keys: Vec<RsaPublicKey>,
    pub combinations: Vec<Combination>,
    pub broken: bool,
}

impl SuiteState {
    pub fn new(
        url: impl Into<String>,
        api: impl Into<String>,
        version: SemanticVersion,
        response_document: DocumentType,
    ) -> Self {
        Self {
            url: url.into(),
            api: api.into(),
            version,
            response_document,
            identifier_element: None,
            value_element: None,
            declared: None,
            matched_entry: None,
            server_keys: Vec::new(),
            combinations: Vec::new(),
            broken: false,
        }
    }

    /// Whether any generated combination uses `method` for requests.
    pub fn endpoint_supports_request_encryption(&self, method: RequestEncryption) -> bool {
        self.combinations.iter().any(|c| c.request_encryption() == method)
    }

    pub fn endpoint_supports_response_encryption(&self, method: ResponseEncryption) -> bool {
        self.combinations.iter().any(|c| c.response_encryption() == method)
    }
}

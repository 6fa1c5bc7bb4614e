//! Suite descriptors and the registry they are looked up in.

use super::echo;
use super::orchestrator::{Orchestrator, SuiteError};
use super::setup;
use crate::combination::{Combination, DeclaredSecurity, GeneratedMatrix};
use crate::document::DocumentType;
use crate::http::Method;
use crate::version::SemanticVersion;

pub type SetupStep = fn(&mut Orchestrator<'_>, &SuiteDescriptor) -> Result<(), SuiteError>;
pub type CombinationStep = fn(&mut Orchestrator<'_>, &Combination) -> Result<(), SuiteError>;
/// Suite-specific advisories added to the generated matrix.
pub type Advisories = fn(&DeclaredSecurity, &mut GeneratedMatrix);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombinationSource {
    /// Expanded from the endpoint's declared security.
    Generated,
    /// A fixed list of 5-letter codes.
    Fixed(&'static [&'static str]),
}

/// Everything needed to validate one API version.
#[derive(Clone)]
pub struct SuiteDescriptor {
    pub api_name: String,
    pub version: SemanticVersion,
    pub response_document: DocumentType,
    pub identifier_element: Option<&'static str>,
    pub value_element: Option<&'static str>,
    pub http_methods: Vec<Method>,
    pub combinations: CombinationSource,
    pub setup_steps: Vec<SetupStep>,
    pub combination_steps: Vec<CombinationStep>,
    pub advisories: Option<Advisories>,
}

impl std::fmt::Debug for SuiteDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuiteDescriptor")
            .field("api_name", &self.api_name)
            .field("version", &self.version)
            .field("combinations", &self.combinations)
            .field("setup_steps", &self.setup_steps.len())
            .field("combination_steps", &self.combination_steps.len())
            .finish()
    }
}

/// The setup steps every suite starts with.
pub fn default_setup_steps() -> Vec<SetupStep> {
    vec![
        setup::credentials_freshness,
        setup::https_scheme,
        setup::registration,
        setup::security_methods,
    ]
}

/// Suites keyed by API name and version.
#[derive(Debug, Clone, Default)]
pub struct SuiteRegistry {
    suites: Vec<SuiteDescriptor>,
}

impl SuiteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the Echo API suites.
    pub fn with_defaults() -> Self {
        Self::new().register(echo::v1()).register(echo::v2())
    }

    /// Add `descriptor`, replacing one registered for the same API and version.
    pub fn register(mut self, descriptor: SuiteDescriptor) -> Self {
        self.suites
            .retain(|d| !(d.api_name == descriptor.api_name && d.version == descriptor.version));
        self.suites.push(descriptor);
        self
    }

    /// Exact version if registered, else the newest suite compatible with it.
    pub fn find(&self, api: &str, version: &SemanticVersion) -> Option<&SuiteDescriptor> {
        let for_api = || self.suites.iter().filter(move |d| d.api_name == api);
        for_api().find(|d| &d.version == version).or_else(|| {
            for_api()
                .filter(|d| version.is_compatible_with(&d.version))
                .max_by(|a, b| a.version.cmp(&b.version))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &SuiteDescriptor> {
        self.suites.iter()
    }
}

//! Document validation seam.
//!
//! Schema validation of response bodies happens outside the engine. A
//! [`DocumentValidator`] receives raw bytes plus the expected document type
//! and returns a [`ValidationReport`]. On success the report carries a
//! [`ParsedDocument`], a flat view of element texts the engine can query by
//! element name.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentType {
    /// Common `<error-response>` document.
    ErrorResponse,
    EchoResponseV1,
    EchoResponseV2,
    /// Any other root element, by name.
    Other(String),
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentType::ErrorResponse => f.write_str("error-response"),
            DocumentType::EchoResponseV1 => f.write_str("echo-response (v1)"),
            DocumentType::EchoResponseV2 => f.write_str("echo-response (v2)"),
            DocumentType::Other(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentError {
    pub line: usize,
    pub message: String,
}

/// Element texts of a validated document, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedDocument {
    elements: Vec<(String, String)>,
}

impl ParsedDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, element: impl Into<String>, text: impl Into<String>) {
        self.elements.push((element.into(), text.into()));
    }

    /// Texts of every element with the given local name, in order.
    pub fn texts(&self, element: &str) -> Vec<String> {
        self.elements
            .iter()
            .filter(|(name, _)| name == element)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<DocumentError>,
    pub document: Option<ParsedDocument>,
}

impl ValidationReport {
    pub fn valid(document: ParsedDocument) -> Self {
        Self { valid: true, errors: Vec::new(), document: Some(document) }
    }

    pub fn invalid(errors: Vec<DocumentError>) -> Self {
        Self { valid: false, errors, document: None }
    }
}

pub trait DocumentValidator: Send + Sync {
    fn validate(&self, body: &[u8], expected: &DocumentType) -> ValidationReport;
}

/// Numbered listing of validator errors, as shown in step messages.
pub fn format_errors(errors: &[DocumentError]) -> String {
    let mut out = String::from("Our document parser has reported the following errors:");
    for (i, error) in errors.iter().enumerate() {
        out.push_str(&format!("\n{}. (Line {}) {}", i + 1, error.line, error.message));
    }
    out
}

//! HTTP Security Conformance Engine
//!
//! Validates that an API endpoint implements its declared transport
//! security correctly. For every combination of HTTP method, client
//! authentication, server authentication, request encryption and response
//! encryption the endpoint supports, the engine sends valid requests and
//! deliberately broken ones, then checks the responses.
//!
//! # Design Principles
//!
//! - **Caller-supplied I/O**: sockets, schema validation and the registry
//!   catalogue are traits ([`http::Transport`], [`document::DocumentValidator`],
//!   [`registry::Registry`])
//! - **Sequential**: steps of a suite run strictly in order on one thread
//! - **Partial results**: a run always yields every attempted step
//!
//! # Example
//!
//! ```ignore
//! let engine = Engine::new(transport, validator, registry, credentials)
//!     .with_config(config::load()?);
//! let report = engine.run(&RunParams::new("echo", SemanticVersion::new(2, 0, 0), url))?;
//! println!("{}", report.worst());
//! ```

pub mod combination;
pub mod config;
pub mod document;
pub mod http;
pub mod registry;
pub mod security;
pub mod suite;
pub mod telemetry;
pub mod version;

#[cfg(test)]
mod test_support;

pub use combination::{Combination, DeclaredSecurity};
pub use config::{ConfigError, EngineConfig};
pub use suite::{Engine, EngineError, RunParams, Status, SuiteReport, SuiteSummary, ValidationStep};
pub use version::SemanticVersion;

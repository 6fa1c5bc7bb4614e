//! Suite orchestration: steps, shared verification, the edge-case catalog,
//! and the registered API suites.

pub mod catalog;
pub mod descriptor;
pub mod echo;
pub mod orchestrator;
pub mod setup;
pub mod state;
pub mod step;
pub mod summary;
pub mod verify;

pub use catalog::{catalog, Expected, Check, CheckEnv};
pub use descriptor::{CombinationSource, SuiteDescriptor, SuiteRegistry};
pub use orchestrator::{
    Engine, EngineError, Orchestrator, RunParams, StepScope, SuiteBroken, SuiteError,
    UNEXPECTED_ERROR_STEP,
};
pub use state::SuiteState;
pub use step::{Failure, Snapshots, Status, StepError, StepResult, ValidationStep};
pub use summary::{SuiteReport, SuiteSummary};
pub use verify::ResponseExpectation;

pub mod build;
pub mod config;
pub mod contract;
pub mod error;
pub mod orchestrator;

pub use build::{run_scanner, BuildFailure, BuildOutcome, BuildResult, LogBuffer, ScannerBuild};
pub use config::HarnessConfig;
pub use contract::{
    issues_mode, non_associated_mode, publish_mode_offline, run_suite, setup, ContractContext,
    ScenarioReport, StepReport, SuiteReport,
};
pub use error::{HarnessError, HarnessResult};
pub use orchestrator::{AvailabilityGuard, Orchestrator, ServerAvailability};

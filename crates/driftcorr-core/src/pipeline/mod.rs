pub mod config;
mod orchestrator;
mod types;

pub use config::DriftConfig;
pub use orchestrator::{
    correct_drift, correct_drift_stack, correct_drift_stack_reported, estimate_drift,
    DriftEstimate,
};
pub use types::{DriftCorrection, DriftStage, DriftSummary, ProgressReporter};

// file: src/pipeline/mod.rs
// description: pipeline module exports and public api
// reference: pipeline orchestration

pub mod orchestrator;
pub mod prepare;
pub mod progress;

pub use orchestrator::{PipelineOrchestrator, RunOptions, RunSummary};
pub use prepare::{PrepareOptions, PreparedCity, prepare};
pub use progress::{ProgressTracker, StatusSpinner, TaskStats};

// file: src/lib.rs
// description: library entry point and public api exports
// reference: rust library patterns
#![doc = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/readme.md"))]

pub mod config;
pub mod database;
pub mod download;
pub mod error;
pub mod exporter;
pub mod geo;
pub mod models;
pub mod pipeline;
pub mod tools;
pub mod utils;

pub use config::{
    AnalysisConfig, CacheConfig, ComposeConfig, Config, DatabaseConfig, DownloadConfig,
    PathsConfig,
};
pub use database::{
    CityFiles, ComputeSettings, Computer, DatabaseUrl, ImportOptions, Ingestor, PostgresClient,
    SchemaManager,
};
pub use error::{BnaError, Result};
pub use exporter::{ExportManifest, LocalExporter};
pub use models::{ComputePart, Exporter, Location, StateInfo};
pub use pipeline::{
    PipelineOrchestrator, PrepareOptions, PreparedCity, ProgressTracker, RunOptions, RunSummary,
};
pub use utils::{CleanupReport, Validator};

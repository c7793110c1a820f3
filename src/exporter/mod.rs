// file: src/exporter/mod.rs
// description: export module entry point

pub mod calver;
pub mod local;

pub use calver::create_calver_directories;
pub use local::{ExportManifest, LocalExporter, bundle};

// file: src/tools/mod.rs
// description: external command line tools used by the pipeline
// reference: internal module structure

pub mod docker;
pub mod osm;
pub mod postgis;
pub mod process;

pub use docker::DockerInfo;
pub use process::{ToolCommand, ToolOutput, run_piped};

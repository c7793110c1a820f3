// file: src/database/mod.rs
// description: database operations module exports
// reference: internal module structure

pub mod client;
pub mod compute;
pub mod ingest;
pub mod schema;

pub use client::{DatabaseUrl, PostgresClient};
pub use compute::{ComputeSettings, Computer, compute};
pub use ingest::{CityFiles, ImportOptions, Ingestor};
pub use schema::SchemaManager;

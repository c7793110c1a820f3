// file: src/download/mod.rs
// description: remote data sources module exports
// reference: internal module structure

pub mod census;
pub mod client;
pub mod datastore;
pub mod geofabrik;
pub mod nominatim;

pub use census::{CensusDownloader, CensusSource};
pub use client::{HttpClient, with_retries};
pub use datastore::{CacheStrategy, DataStore};
pub use geofabrik::GeofabrikIndex;

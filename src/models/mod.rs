// file: src/models/mod.rs
// description: data models module exports
// reference: internal module structure

pub mod analysis;
pub mod location;
pub mod state;

pub use analysis::{ComputePart, Exporter, LodesPart};
pub use location::{Location, is_usa, normalize_country_name};
pub use state::{StateInfo, derive_state_info};

// file: src/geo/mod.rs
// description: geometry helpers module exports
// reference: internal module structure

pub mod boundary;
pub mod grid;
pub mod srid;

pub use boundary::{Boundary, BoundingBox, Polygon};
pub use grid::{PopulationCell, synthetic_population, write_census_blocks};
pub use srid::{srid_for_bbox, srid_for_boundary_file};

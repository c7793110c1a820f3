// file: src/geo/grid.rs
// description: synthetic population grid standing in for census blocks outside the US
// reference: internal data structures

use crate::error::{BnaError, Result};
use crate::geo::boundary::{Boundary, BoundingBox};
use serde_json::{Value, json};
use std::fs;
use std::path::Path;
use tracing::debug;

const METERS_PER_DEGREE: f64 = 111_320.0;

#[derive(Debug, Clone, PartialEq)]
pub struct PopulationCell {
    pub block_id: String,
    pub population: u32,
    pub bbox: BoundingBox,
}

impl PopulationCell {
    fn to_feature(&self) -> Value {
        let ring: Vec<[f64; 2]> = self
            .bbox
            .corners()
            .iter()
            .chain(std::iter::once(&self.bbox.corners()[0]))
            .map(|(x, y)| [*x, *y])
            .collect();
        json!({
            "type": "Feature",
            "properties": { "BLOCKID10": self.block_id, "POP10": self.population },
            "geometry": { "type": "Polygon", "coordinates": [ring] },
        })
    }
}

/// Degree steps matching `cell_size_m` at the given latitude.
pub fn cell_steps(cell_size_m: f64, latitude: f64) -> (f64, f64) {
    let lat_step = cell_size_m / METERS_PER_DEGREE;
    let lon_step = cell_size_m / (METERS_PER_DEGREE * latitude.to_radians().cos().max(1e-6));
    (lon_step, lat_step)
}

/// Covers the boundary with square cells of `cell_size_m` metres holding `population` people each.
pub fn synthetic_population(
    boundary: &Boundary,
    cell_size_m: u32,
    population: u32,
) -> Result<Vec<PopulationCell>> {
    if cell_size_m == 0 {
        return Err(BnaError::Validation(
            "the block size must be greater than 0".to_string(),
        ));
    }

    let bbox = boundary.bbox();
    let (lon_step, lat_step) = cell_steps(f64::from(cell_size_m), bbox.center().1);
    let columns = (bbox.width() / lon_step).ceil().max(1.0) as usize;
    let rows = (bbox.height() / lat_step).ceil().max(1.0) as usize;
    debug!("synthetic grid: {columns}x{rows} cells of {cell_size_m}m");

    let mut cells = Vec::new();
    for row in 0..rows {
        for column in 0..columns {
            let min_x = bbox.min_x + column as f64 * lon_step;
            let min_y = bbox.min_y + row as f64 * lat_step;
            let cell = BoundingBox {
                min_x,
                min_y,
                max_x: min_x + lon_step,
                max_y: min_y + lat_step,
            };
            if boundary.intersects_rect(&cell) {
                cells.push(PopulationCell {
                    block_id: format!("{:015}", cells.len()),
                    population,
                    bbox: cell,
                });
            }
        }
    }

    if cells.is_empty() {
        return Err(BnaError::Geometry(
            "the synthetic population grid does not overlap the boundary".to_string(),
        ));
    }
    Ok(cells)
}

/// Writes the cells as a GeoJSON feature collection of simulated census blocks.
pub fn write_census_blocks(cells: &[PopulationCell], path: &Path) -> Result<()> {
    let collection = json!({
        "type": "FeatureCollection",
        "features": cells.iter().map(PopulationCell::to_feature).collect::<Vec<_>>(),
    });
    let content = serde_json::to_string(&collection)?;
    fs::write(path, content).map_err(|e| BnaError::file(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn square(size: f64) -> Boundary {
        Boundary::from_geojson(&json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [size, 0.0], [size, size], [0.0, size], [0.0, 0.0]]]
        }))
        .unwrap()
    }

    #[test]
    fn test_cell_steps_at_equator() {
        let (lon, lat) = cell_steps(METERS_PER_DEGREE, 0.0);
        assert!((lon - 1.0).abs() < 1e-9);
        assert!((lat - 1.0).abs() < 1e-9);

        let (lon, lat) = cell_steps(1000.0, 60.0);
        assert!((lon - 2.0 * lat).abs() < 1e-9);
    }

    #[test]
    fn test_grid_covers_boundary() {
        // ~0.018 degree square is roughly 2km wide, which gives a 4x4 grid of 500m cells.
        let boundary = square(0.0179);
        let cells = synthetic_population(&boundary, 500, 100).unwrap();
        assert_eq!(cells.len(), 16);
        assert!(cells.iter().all(|c| c.population == 100));
        assert_eq!(cells[0].block_id, "000000000000000");
        assert_eq!(cells[15].block_id, "000000000000015");
    }

    #[test]
    fn test_grid_skips_cells_outside_boundary() {
        let triangle = Boundary::from_geojson(&json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [0.05, 0.0], [0.0, 0.05], [0.0, 0.0]]]
        }))
        .unwrap();
        let full = synthetic_population(&square(0.05), 1000, 10).unwrap();
        let partial = synthetic_population(&triangle, 1000, 10).unwrap();
        assert!(partial.len() < full.len());
        assert!(partial.len() > full.len() / 2);
    }

    #[test]
    fn test_zero_block_size_is_rejected() {
        assert!(synthetic_population(&square(0.01), 0, 10).is_err());
    }

    #[test]
    fn test_write_census_blocks() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("population.geojson");
        let cells = synthetic_population(&square(0.005), 500, 42).unwrap();
        write_census_blocks(&cells, &path).unwrap();

        let value: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let features = value["features"].as_array().unwrap();
        assert_eq!(features.len(), cells.len());
        assert_eq!(features[0]["properties"]["POP10"], 42);
        assert_eq!(features[0]["geometry"]["coordinates"][0].as_array().unwrap().len(), 5);
    }
}

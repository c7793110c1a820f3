// file: src/geo/srid.rs
// description: UTM projection (WGS 84 / UTM zone) selection from a lat/lng bounding box
// reference: https://epsg.io/32600

use crate::error::{BnaError, Result};
use crate::geo::boundary::{Boundary, BoundingBox};
use std::path::Path;
use tracing::debug;

/// Widest bbox, in degrees, that still fits a single UTM zone reasonably.
pub const MAX_UTM_WIDTH_DEGREES: f64 = 4.0;

pub fn check_bbox_latlng(bbox: &BoundingBox) -> Result<()> {
    let values = [bbox.min_x, bbox.min_y, bbox.max_x, bbox.max_y];
    if values.iter().all(|v| *v > -180.0 && *v < 180.0) {
        Ok(())
    } else {
        Err(BnaError::Geometry(
            "geometry appears to already be projected".to_string(),
        ))
    }
}

pub fn check_bbox_width(bbox: &BoundingBox) -> Result<()> {
    if bbox.width() > MAX_UTM_WIDTH_DEGREES {
        return Err(BnaError::Geometry(
            "geometry is too many degrees wide for UTM".to_string(),
        ));
    }
    Ok(())
}

pub fn utm_zone(longitude: f64) -> u8 {
    let zone = ((longitude + 180.0) / 6.0).ceil();
    zone.clamp(1.0, 60.0) as u8
}

/// EPSG code of the WGS 84 UTM zone: 326xx in the north, 327xx in the south.
pub fn compute_srid(latitude: f64, zone: u8) -> u32 {
    let hemisphere = if latitude < 0.0 { 7 } else { 6 };
    32000 + hemisphere * 100 + u32::from(zone)
}

pub fn srid_for_bbox(bbox: &BoundingBox) -> Result<u32> {
    check_bbox_latlng(bbox)?;
    check_bbox_width(bbox)?;
    let (lon, lat) = bbox.center();
    let srid = compute_srid(lat, utm_zone(lon));
    debug!("bbox={bbox:?} srid={srid}");
    Ok(srid)
}

pub fn srid_for_boundary(boundary: &Boundary) -> Result<u32> {
    srid_for_bbox(&boundary.bbox())
}

/// Reads the GeoJSON boundary written during preparation and derives its SRID.
pub fn srid_for_boundary_file(path: &Path) -> Result<u32> {
    srid_for_boundary(&Boundary::from_file(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn bbox(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> BoundingBox {
        BoundingBox { min_x, min_y, max_x, max_y }
    }

    #[test]
    fn test_utm_zone() {
        assert_eq!(utm_zone(-104.7), 13);
        assert_eq!(utm_zone(2.35), 31);
        assert_eq!(utm_zone(179.9), 60);
        assert_eq!(utm_zone(-180.0), 1);
    }

    #[test]
    fn test_compute_srid() {
        assert_eq!(compute_srid(34.9, 13), 32613);
        assert_eq!(compute_srid(-33.9, 34), 32734);
        assert_eq!(compute_srid(48.8, 1), 32601);
    }

    #[test]
    fn test_srid_for_santa_rosa() {
        let srid = srid_for_bbox(&bbox(-104.714757, 34.905372, -104.629528, 34.955892)).unwrap();
        assert_eq!(srid, 32613);
    }

    #[test]
    fn test_projected_bbox_is_rejected() {
        let projected = bbox(500000.0, 3860000.0, 510000.0, 3870000.0);
        assert!(check_bbox_latlng(&projected).is_err());
        assert!(srid_for_bbox(&projected).is_err());
    }

    #[test]
    fn test_wide_bbox_is_rejected() {
        assert!(check_bbox_width(&bbox(-10.0, 0.0, -5.9, 1.0)).is_err());
        assert!(check_bbox_width(&bbox(-10.0, 0.0, -6.0, 1.0)).is_ok());
    }
}

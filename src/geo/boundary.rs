// file: src/geo/boundary.rs
// description: city boundary polygons parsed from geojson, with bbox and containment tests
// reference: https://datatracker.ietf.org/doc/html/rfc7946

use crate::error::{BnaError, Result};
use serde_json::{Value, json};
use std::fs;
use std::path::Path;

/// (longitude, latitude)
pub type Point = (f64, f64);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> Point {
        (
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    pub fn contains(&self, (x, y): Point) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    pub fn corners(&self) -> [Point; 4] {
        [
            (self.min_x, self.min_y),
            (self.max_x, self.min_y),
            (self.max_x, self.max_y),
            (self.min_x, self.max_y),
        ]
    }

    /// Parses the text form of a PostGIS `box2d`, e.g. `BOX(-104.87 34.85,-104.50 35.05)`.
    pub fn from_postgis_box(text: &str) -> Result<Self> {
        let inner = text
            .trim()
            .strip_prefix("BOX(")
            .and_then(|s| s.strip_suffix(')'))
            .ok_or_else(|| BnaError::Geometry(format!("invalid box: {text:?}")))?;

        let values = inner
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<f64>()
                    .map_err(|e| BnaError::Geometry(format!("invalid box value {s:?}: {e}")))
            })
            .collect::<Result<Vec<f64>>>()?;

        match values.as_slice() {
            [min_x, min_y, max_x, max_y] => Ok(Self {
                min_x: *min_x,
                min_y: *min_y,
                max_x: *max_x,
                max_y: *max_y,
            }),
            _ => Err(BnaError::Geometry(format!(
                "a box needs 4 coordinates: {text:?}"
            ))),
        }
    }

    /// `min_x,min_y,max_x,max_y`, the format expected by osmconvert.
    pub fn to_osmconvert_arg(&self) -> String {
        format!("{},{},{},{}", self.min_x, self.min_y, self.max_x, self.max_y)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub exterior: Vec<Point>,
    pub holes: Vec<Vec<Point>>,
}

impl Polygon {
    pub fn contains(&self, point: Point) -> bool {
        ring_contains(&self.exterior, point) && !self.holes.iter().any(|h| ring_contains(h, point))
    }

    fn rings(&self) -> impl Iterator<Item = &Vec<Point>> {
        std::iter::once(&self.exterior).chain(self.holes.iter())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Boundary {
    pub polygons: Vec<Polygon>,
}

impl Boundary {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| BnaError::file(path, e))?;
        let value: Value = serde_json::from_str(&content)?;
        Self::from_geojson(&value)
    }

    pub fn from_geojson(value: &Value) -> Result<Self> {
        let mut polygons = Vec::new();
        collect_polygons(value, &mut polygons)?;
        if polygons.is_empty() {
            return Err(BnaError::Geometry(
                "no polygon found in the boundary".to_string(),
            ));
        }
        Ok(Self { polygons })
    }

    pub fn bbox(&self) -> BoundingBox {
        let mut bbox = BoundingBox {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        };
        for (x, y) in self.polygons.iter().flat_map(|p| p.exterior.iter()) {
            bbox.min_x = bbox.min_x.min(*x);
            bbox.min_y = bbox.min_y.min(*y);
            bbox.max_x = bbox.max_x.max(*x);
            bbox.max_y = bbox.max_y.max(*y);
        }
        bbox
    }

    pub fn contains(&self, point: Point) -> bool {
        self.polygons.iter().any(|p| p.contains(point))
    }

    /// True when the rectangle overlaps the boundary area.
    pub fn intersects_rect(&self, rect: &BoundingBox) -> bool {
        if rect.corners().iter().any(|c| self.contains(*c)) || self.contains(rect.center()) {
            return true;
        }

        let rect_ring = rect.corners();
        let rect_edges: Vec<(Point, Point)> = (0..4)
            .map(|i| (rect_ring[i], rect_ring[(i + 1) % 4]))
            .collect();

        for ring in self.polygons.iter().flat_map(|p| p.rings()) {
            if ring.iter().any(|v| rect.contains(*v)) {
                return true;
            }
            for edge in ring.windows(2) {
                if rect_edges
                    .iter()
                    .any(|(a, b)| segments_intersect(edge[0], edge[1], *a, *b))
                {
                    return true;
                }
            }
        }
        false
    }

    pub fn to_geojson(&self, properties: Value) -> Value {
        let geometry = if self.polygons.len() == 1 {
            json!({ "type": "Polygon", "coordinates": polygon_coordinates(&self.polygons[0]) })
        } else {
            json!({
                "type": "MultiPolygon",
                "coordinates": self.polygons.iter().map(polygon_coordinates).collect::<Vec<_>>(),
            })
        };
        json!({
            "type": "FeatureCollection",
            "features": [{ "type": "Feature", "properties": properties, "geometry": geometry }],
        })
    }

    pub fn write(&self, path: &Path, properties: Value) -> Result<()> {
        let content = serde_json::to_string(&self.to_geojson(properties))?;
        fs::write(path, content).map_err(|e| BnaError::file(path, e))
    }
}

fn polygon_coordinates(polygon: &Polygon) -> Vec<Vec<[f64; 2]>> {
    polygon
        .rings()
        .map(|ring| ring.iter().map(|(x, y)| [*x, *y]).collect())
        .collect()
}

fn collect_polygons(value: &Value, out: &mut Vec<Polygon>) -> Result<()> {
    match value.get("type").and_then(Value::as_str) {
        Some("FeatureCollection") => {
            for feature in value
                .get("features")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                collect_polygons(feature, out)?;
            }
        }
        Some("Feature") => {
            if let Some(geometry) = value.get("geometry").filter(|g| !g.is_null()) {
                collect_polygons(geometry, out)?;
            }
        }
        Some("GeometryCollection") => {
            for geometry in value
                .get("geometries")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                collect_polygons(geometry, out)?;
            }
        }
        Some("Polygon") => out.push(parse_polygon(coordinates(value)?)?),
        Some("MultiPolygon") => {
            for polygon in coordinates(value)?
                .as_array()
                .ok_or_else(|| BnaError::Geometry("invalid MultiPolygon".to_string()))?
            {
                out.push(parse_polygon(polygon)?);
            }
        }
        _ => {}
    }
    Ok(())
}

fn coordinates(value: &Value) -> Result<&Value> {
    value
        .get("coordinates")
        .ok_or_else(|| BnaError::Geometry("geometry without coordinates".to_string()))
}

fn parse_polygon(value: &Value) -> Result<Polygon> {
    let rings = value
        .as_array()
        .ok_or_else(|| BnaError::Geometry("invalid Polygon".to_string()))?
        .iter()
        .map(parse_ring)
        .collect::<Result<Vec<_>>>()?;

    let mut rings = rings.into_iter();
    let exterior = rings
        .next()
        .ok_or_else(|| BnaError::Geometry("polygon without exterior ring".to_string()))?;
    Ok(Polygon {
        exterior,
        holes: rings.collect(),
    })
}

fn parse_ring(value: &Value) -> Result<Vec<Point>> {
    value
        .as_array()
        .ok_or_else(|| BnaError::Geometry("invalid ring".to_string()))?
        .iter()
        .map(|position| match position.as_array().map(Vec::as_slice) {
            Some([x, y, ..]) => match (x.as_f64(), y.as_f64()) {
                (Some(x), Some(y)) => Ok((x, y)),
                _ => Err(BnaError::Geometry(format!("invalid position {position}"))),
            },
            _ => Err(BnaError::Geometry(format!("invalid position {position}"))),
        })
        .collect()
}

/// Even-odd ray casting.
fn ring_contains(ring: &[Point], (x, y): Point) -> bool {
    let mut inside = false;
    let n = ring.len();
    if n < 3 {
        return false;
    }
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = ring[i];
        let (xj, yj) = ring[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

fn orientation(a: Point, b: Point, c: Point) -> f64 {
    (b.0 - a.0) * (c.1 - a.1) - (b.1 - a.1) * (c.0 - a.0)
}

fn segments_intersect(p1: Point, p2: Point, q1: Point, q2: Point) -> bool {
    let d1 = orientation(q1, q2, p1);
    let d2 = orientation(q1, q2, p2);
    let d3 = orientation(p1, p2, q1);
    let d4 = orientation(p1, p2, q2);
    ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn square_with_hole() -> Value {
        json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": {},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [
                        [[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0], [0.0, 0.0]],
                        [[4.0, 4.0], [6.0, 4.0], [6.0, 6.0], [4.0, 6.0], [4.0, 4.0]]
                    ]
                }
            }]
        })
    }

    #[test]
    fn test_contains_respects_holes() {
        let boundary = Boundary::from_geojson(&square_with_hole()).unwrap();
        assert!(boundary.contains((1.0, 1.0)));
        assert!(!boundary.contains((5.0, 5.0)));
        assert!(!boundary.contains((11.0, 1.0)));
    }

    #[test]
    fn test_bbox_of_multipolygon() {
        let value = json!({
            "type": "MultiPolygon",
            "coordinates": [
                [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]],
                [[[5.0, -2.0], [6.0, -2.0], [6.0, 3.0], [5.0, -2.0]]]
            ]
        });
        let boundary = Boundary::from_geojson(&value).unwrap();
        assert_eq!(boundary.polygons.len(), 2);
        assert_eq!(
            boundary.bbox(),
            BoundingBox { min_x: 0.0, min_y: -2.0, max_x: 6.0, max_y: 3.0 }
        );
    }

    #[test]
    fn test_intersects_rect() {
        let boundary = Boundary::from_geojson(&square_with_hole()).unwrap();
        let overlapping = BoundingBox { min_x: 9.0, min_y: 9.0, max_x: 12.0, max_y: 12.0 };
        let outside = BoundingBox { min_x: 11.0, min_y: 11.0, max_x: 12.0, max_y: 12.0 };
        let crossing = BoundingBox { min_x: -1.0, min_y: 2.0, max_x: 11.0, max_y: 3.0 };
        let in_hole = BoundingBox { min_x: 4.5, min_y: 4.5, max_x: 5.5, max_y: 5.5 };
        assert!(boundary.intersects_rect(&overlapping));
        assert!(boundary.intersects_rect(&crossing));
        assert!(!boundary.intersects_rect(&outside));
        assert!(!boundary.intersects_rect(&in_hole));
    }

    #[test]
    fn test_rejects_geojson_without_polygons() {
        let value = json!({ "type": "Point", "coordinates": [1.0, 2.0] });
        assert!(matches!(
            Boundary::from_geojson(&value),
            Err(BnaError::Geometry(_))
        ));
    }

    #[test]
    fn test_parse_postgis_box() {
        let bbox = BoundingBox::from_postgis_box("BOX(-104.87012 34.851831,-104.506362 35.05182)")
            .unwrap();
        assert_eq!(bbox.min_x, -104.87012);
        assert_eq!(bbox.max_y, 35.05182);
        assert_eq!(bbox.to_osmconvert_arg(), "-104.87012,34.851831,-104.506362,35.05182");
        assert!(BoundingBox::from_postgis_box("POINT(1 2)").is_err());
    }

    #[test]
    fn test_write_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("city.geojson");
        let boundary = Boundary::from_geojson(&square_with_hole()).unwrap();
        boundary.write(&path, json!({ "name": "city" })).unwrap();

        let reloaded = Boundary::from_file(&path).unwrap();
        assert_eq!(reloaded, boundary);
    }
}

// file: src/download/nominatim.rs
// description: city boundary lookup through the nominatim search api
// reference: https://nominatim.org/release-docs/latest/api/Search/

use crate::download::client::HttpClient;
use crate::error::{BnaError, Result};
use crate::geo::Boundary;
use crate::models::Location;
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/search";

#[derive(Debug, Clone, Deserialize)]
pub struct Place {
    #[serde(default)]
    pub osm_type: Option<String>,
    #[serde(default)]
    pub osm_id: Option<u64>,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub geojson: Option<Value>,
}

impl Place {
    fn is_area(&self) -> bool {
        self.geojson
            .as_ref()
            .and_then(|g| g.get("type"))
            .and_then(Value::as_str)
            .is_some_and(|t| t == "Polygon" || t == "MultiPolygon")
    }
}

/// Keeps the first result with an areal geometry.
pub fn select_boundary(places: &[Place]) -> Option<(&Place, Boundary)> {
    places.iter().filter(|p| p.is_area()).find_map(|place| {
        place
            .geojson
            .as_ref()
            .and_then(|g| Boundary::from_geojson(g).ok())
            .map(|boundary| (place, boundary))
    })
}

fn structured_query(location: &Location) -> Vec<(&'static str, String)> {
    let mut params = vec![("city", location.city.clone())];
    if let Some(region) = &location.region {
        params.push(("state", region.clone()));
    }
    params.push(("country", location.country.clone()));
    params
}

fn free_form_query(location: &Location) -> String {
    let mut parts = vec![location.city.as_str()];
    if let Some(region) = &location.region {
        parts.push(region);
    }
    parts.push(&location.country);
    parts.join(", ")
}

async fn search(
    client: &HttpClient,
    base_url: &str,
    query: &[(&str, String)],
) -> Result<Vec<Place>> {
    let mut params: Vec<(&str, &str)> = query.iter().map(|(k, v)| (*k, v.as_str())).collect();
    params.extend([
        ("format", "json"),
        ("polygon_geojson", "1"),
        ("dedupe", "0"),
        ("limit", "50"),
    ]);
    client.fetch_json(base_url, &params).await
}

/// Retrieves the city limits and saves them as `{slug}.geojson` in `output_dir`.
pub async fn retrieve_city_boundary(
    client: &HttpClient,
    base_url: &str,
    location: &Location,
    output_dir: &Path,
) -> Result<PathBuf> {
    let slug = location.slug();
    let output = output_dir.join(format!("{slug}.geojson"));

    let mut places = search(client, base_url, &structured_query(location)).await?;
    if select_boundary(&places).is_none() {
        let q = free_form_query(location);
        debug!("structured query returned no polygon, trying {q:?}");
        places = search(client, base_url, &[("q", q)]).await?;
    }

    let (place, boundary) = select_boundary(&places).ok_or_else(|| {
        BnaError::NotFound(format!(
            "no boundary polygon found for {}",
            free_form_query(location)
        ))
    })?;
    info!("Boundary found: {}", place.display_name);

    boundary.write(
        &output,
        json!({
            "name": place.display_name,
            "osm_type": place.osm_type,
            "osm_id": place.osm_id,
        }),
    )?;
    Ok(output)
}

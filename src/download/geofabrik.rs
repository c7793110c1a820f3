// file: src/download/geofabrik.rs
// description: geofabrik extract index lookup and checksum-verified region downloads
// reference: https://download.geofabrik.de/technical.html

use crate::download::client::{HttpClient, with_retries};
use crate::error::{BnaError, Result};
use crate::models::Location;
use crate::utils::files::{file_checksum_ok, remove_or_warn};
use crate::utils::normalize_unicode_name;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const GEOFABRIK_INDEX_URL: &str = "https://download.geofabrik.de/index-v1-nogeom.json";

#[derive(Debug, Clone, Deserialize)]
pub struct Region {
    pub id: String,
    #[serde(default)]
    pub parent: Option<String>,
    pub name: String,
    #[serde(default)]
    pub urls: RegionUrls,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegionUrls {
    #[serde(default)]
    pub pbf: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IndexFeature {
    properties: Region,
}

#[derive(Debug, Deserialize)]
struct IndexDocument {
    features: Vec<IndexFeature>,
}

#[derive(Debug, Clone)]
pub struct GeofabrikIndex {
    regions: Vec<Region>,
}

fn name_variants(name: &str) -> Vec<String> {
    let base = normalize_unicode_name(name);
    let mut variants: Vec<String> = Vec::new();
    for variant in [
        base.clone(),
        base.replace(' ', "-"),
        base.replace(' ', ""),
        name.trim().to_lowercase().replace('_', "-"),
    ] {
        if !variants.contains(&variant) {
            variants.push(variant);
        }
    }
    variants
}

impl GeofabrikIndex {
    pub fn from_json(content: &str) -> Result<Self> {
        let document: IndexDocument = serde_json::from_str(content)?;
        Ok(Self {
            regions: document.features.into_iter().map(|f| f.properties).collect(),
        })
    }

    pub async fn fetch(client: &HttpClient, index_url: &str) -> Result<Self> {
        let content = with_retries(client.retries(), index_url, move || {
            client.fetch_text(index_url, &[])
        })
        .await?;
        Self::from_json(&content)
    }

    /// Finds a region by id or name. Entries under `parent_hint` win ties, e.g. Georgia in the US.
    pub fn find(&self, name: &str, parent_hint: Option<&str>) -> Option<&Region> {
        let variants = name_variants(name);
        let candidates: Vec<&Region> = self
            .regions
            .iter()
            .filter(|region| region.urls.pbf.is_some())
            .filter(|region| {
                let id = region.id.to_lowercase();
                let region_name = normalize_unicode_name(&region.name);
                variants.iter().any(|v| *v == id || *v == region_name)
            })
            .collect();

        candidates
            .iter()
            .find(|region| parent_hint.is_some() && region.parent.as_deref() == parent_hint)
            .or_else(|| candidates.first())
            .copied()
    }
}

/// Downloads the OSM extract covering the location and verifies its checksum.
pub async fn retrieve_region_file(
    client: &HttpClient,
    index: &GeofabrikIndex,
    location: &Location,
    output_dir: &Path,
) -> Result<PathBuf> {
    let parent_hint = location.is_usa().then_some("us");
    let region = location
        .region
        .as_deref()
        .and_then(|r| index.find(r, parent_hint))
        .or_else(|| {
            if location.region.is_some() {
                warn!(
                    "No extract for region {:?}, falling back to {}",
                    location.region, location.country
                );
            }
            index.find(&location.country, None)
        })
        .ok_or_else(|| {
            BnaError::NotFound(format!("no OSM extract for {}", location.osm_region()))
        })?;

    let url = region
        .urls
        .pbf
        .as_deref()
        .ok_or_else(|| BnaError::NotFound(format!("no pbf file for {}", region.id)))?;
    let file_name = url
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}-latest.osm.pbf", region.id.replace('/', "-")));
    let output = output_dir.join(&file_name);
    let md5_output = output_dir.join(format!("{file_name}.md5"));
    info!("Region file: {url}");

    let cached = output.exists();
    client.download_with_retries(url, &output, true).await?;
    client
        .download_with_retries(&format!("{url}.md5"), &md5_output, false)
        .await?;

    if file_checksum_ok(&output, &md5_output)? {
        return Ok(output);
    }
    if cached {
        warn!("{} does not match the published checksum, downloading it again", output.display());
        client.download_with_retries(url, &output, false).await?;
        if file_checksum_ok(&output, &md5_output)? {
            return Ok(output);
        }
    }

    debug!("checksum mismatch, removing {}", output.display());
    remove_or_warn(&output);
    Err(BnaError::Checksum { path: output })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const INDEX: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            { "type": "Feature", "geometry": null, "properties": {
                "id": "georgia", "parent": "europe", "name": "Georgia",
                "urls": { "pbf": "https://download.geofabrik.de/europe/georgia-latest.osm.pbf" } } },
            { "type": "Feature", "geometry": null, "properties": {
                "id": "us/georgia", "parent": "us", "name": "Georgia",
                "urls": { "pbf": "https://download.geofabrik.de/north-america/us/georgia-latest.osm.pbf" } } },
            { "type": "Feature", "geometry": null, "properties": {
                "id": "new-mexico", "parent": "us", "name": "New Mexico",
                "urls": { "pbf": "https://download.geofabrik.de/north-america/us/new-mexico-latest.osm.pbf" } } },
            { "type": "Feature", "geometry": null, "properties": {
                "id": "quebec", "parent": "canada", "name": "Quebec",
                "urls": { "pbf": "https://download.geofabrik.de/north-america/canada/quebec-latest.osm.pbf" } } },
            { "type": "Feature", "geometry": null, "properties": {
                "id": "north-america", "name": "North America", "urls": {} } }
        ]
    }"#;

    #[test]
    fn test_find_by_name_and_id() {
        let index = GeofabrikIndex::from_json(INDEX).unwrap();
        assert_eq!(index.find("New Mexico", None).unwrap().id, "new-mexico");
        assert_eq!(index.find("new_mexico", None).unwrap().id, "new-mexico");
        assert_eq!(index.find("Québec", None).unwrap().id, "quebec");
        assert!(index.find("Atlantis", None).is_none());
    }

    #[test]
    fn test_find_prefers_parent_hint() {
        let index = GeofabrikIndex::from_json(INDEX).unwrap();
        assert_eq!(index.find("Georgia", Some("us")).unwrap().parent.as_deref(), Some("us"));
        assert_eq!(index.find("Georgia", None).unwrap().id, "georgia");
    }

    #[test]
    fn test_regions_without_pbf_are_ignored() {
        let index = GeofabrikIndex::from_json(INDEX).unwrap();
        assert!(index.find("North America", None).is_none());
    }

    fn md5_of(content: &str) -> String {
        use md5::{Digest, Md5};
        format!("{:x}", Md5::digest(content.as_bytes()))
    }

    async fn serve_extract(server: &mut mockito::ServerGuard, content: &str) -> GeofabrikIndex {
        let url = format!("{}/europe/malta-latest.osm.pbf", server.url());
        server
            .mock("GET", "/europe/malta-latest.osm.pbf")
            .with_status(200)
            .with_body(content)
            .create_async()
            .await;
        server
            .mock("GET", "/europe/malta-latest.osm.pbf.md5")
            .with_status(200)
            .with_body(format!("{}  malta-latest.osm.pbf\n", md5_of(content)))
            .create_async()
            .await;
        let index = serde_json::json!({
            "features": [{ "properties": {
                "id": "malta", "parent": "europe", "name": "Malta", "urls": { "pbf": url }
            } }]
        });
        GeofabrikIndex::from_json(&index.to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_stale_cached_extract_is_downloaded_again() {
        let mut server = mockito::Server::new_async().await;
        let index = serve_extract(&mut server, "fresh extract").await;

        let temp = tempfile::TempDir::new().unwrap();
        let cached = temp.path().join("malta-latest.osm.pbf");
        std::fs::write(&cached, "previous extract").unwrap();

        let client = HttpClient::new(&crate::config::Config::default_config().download).unwrap();
        let location = Location::new("Malta", "Valletta", None, None);
        let output = retrieve_region_file(&client, &index, &location, temp.path())
            .await
            .unwrap();

        assert_eq!(output, cached);
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "fresh extract");
    }

    #[tokio::test]
    async fn test_matching_cached_extract_is_kept() {
        let mut server = mockito::Server::new_async().await;
        let index = serve_extract(&mut server, "fresh extract").await;

        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(temp.path().join("malta-latest.osm.pbf"), "fresh extract").unwrap();

        let client = HttpClient::new(&crate::config::Config::default_config().download).unwrap();
        let location = Location::new("Malta", "Valletta", None, None);
        let output = retrieve_region_file(&client, &index, &location, temp.path())
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "fresh extract");
    }

    #[tokio::test]
    async fn test_corrupted_download_is_removed() {
        let mut server = mockito::Server::new_async().await;
        let url = format!("{}/europe/malta-latest.osm.pbf", server.url());
        server
            .mock("GET", "/europe/malta-latest.osm.pbf")
            .with_status(200)
            .with_body("truncated")
            .create_async()
            .await;
        server
            .mock("GET", "/europe/malta-latest.osm.pbf.md5")
            .with_status(200)
            .with_body(md5_of("complete extract"))
            .create_async()
            .await;
        let index = GeofabrikIndex {
            regions: vec![Region {
                id: "malta".to_string(),
                parent: Some("europe".to_string()),
                name: "Malta".to_string(),
                urls: RegionUrls { pbf: Some(url) },
            }],
        };

        let temp = tempfile::TempDir::new().unwrap();
        let client = HttpClient::new(&crate::config::Config::default_config().download).unwrap();
        let location = Location::new("Malta", "Valletta", None, None);
        let result = retrieve_region_file(&client, &index, &location, temp.path()).await;

        assert!(matches!(result, Err(BnaError::Checksum { .. })));
        assert!(!temp.path().join("malta-latest.osm.pbf").exists());
    }

    #[test]
    fn test_name_variants() {
        assert_eq!(
            name_variants("New Mexico"),
            vec!["new mexico", "new-mexico", "newmexico"]
        );
    }
}

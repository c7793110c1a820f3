// file: src/download/census.rs
// description: US census inputs (speed limits, LODES employment, 2020 blocks, water blocks)
// reference: https://lehd.ces.census.gov/data/#lodes, https://www2.census.gov/geo/tiger/

use crate::config::DownloadConfig;
use crate::download::client::{HttpClient, with_retries};
use crate::download::datastore::DataStore;
use crate::error::{BnaError, Result};
use crate::models::LodesPart;
use crate::utils::files::{gunzip, prepare_census_blocks, unzip};
use regex::Regex;
use tracing::{debug, info};

pub const PFB_PUBLIC_DOCUMENTS_URL: &str = "https://s3.amazonaws.com/pfb-public-documents";
pub const TIGER_URL: &str = "https://www2.census.gov/geo/tiger";
pub const LODES_URL: &str = "https://lehd.ces.census.gov/data/lodes/LODES8";

pub const STATE_SPEED_CSV: &str = "state_fips_speed.csv";
pub const CITY_SPEED_CSV: &str = "city_fips_speed.csv";
pub const WATER_BLOCKS_ZIP: &str = "censuswaterblocks.zip";
pub const WATER_BLOCKS_CSV: &str = "censuswaterblocks.csv";
pub const POPULATION_SHP: &str = "population.shp";

/// Latest year advertised by a LODES directory listing for `[st]_od_[part]_[type]_[year].csv.gz`.
pub fn parse_latest_lodes_year(html: &str, state: &str, part: &str, job_type: &str) -> Result<u16> {
    let prefix = format!("{}_od_{}_{}_", state.to_lowercase(), part.to_lowercase(), job_type);
    let pattern = Regex::new(&format!(r"{}(\d{{4}})\.csv\.gz", regex::escape(&prefix)))
        .map_err(|e| BnaError::Validation(e.to_string()))?;

    pattern
        .captures_iter(html)
        .filter_map(|c| c.get(1).and_then(|m| m.as_str().parse::<u16>().ok()))
        .max()
        .ok_or_else(|| {
            BnaError::NotFound(format!("cannot identify the latest LODES year for `{prefix}`"))
        })
}

/// Resolves census URLs, either from the official hosts or from a flat mirror.
#[derive(Debug, Clone)]
pub struct CensusSource {
    mirror: Option<String>,
    lodes_url: String,
}

impl CensusSource {
    pub fn new(mirror: Option<String>) -> Self {
        Self {
            mirror: mirror.map(|m| m.trim_end_matches('/').to_string()),
            lodes_url: LODES_URL.to_string(),
        }
    }

    pub fn from_config(config: &DownloadConfig) -> Self {
        Self::new(config.mirror.clone()).with_lodes_url(&config.lodes_url)
    }

    pub fn with_lodes_url(mut self, url: &str) -> Self {
        self.lodes_url = url.trim_end_matches('/').to_string();
        self
    }

    fn resolve(&self, official: String, file_name: &str) -> String {
        match &self.mirror {
            Some(mirror) => format!("{mirror}/{file_name}"),
            None => official,
        }
    }

    pub fn public_document_url(&self, file_name: &str) -> String {
        self.resolve(format!("{PFB_PUBLIC_DOCUMENTS_URL}/{file_name}"), file_name)
    }

    pub fn lodes_directory_url(&self, state: &str) -> String {
        format!("{}/{}/od", self.lodes_url, state.to_lowercase())
    }

    pub fn lodes_url(&self, state: &str, file_name: &str) -> String {
        self.resolve(
            format!("{}/{file_name}", self.lodes_directory_url(state)),
            file_name,
        )
    }

    pub fn census_blocks_file_name(state_fips: &str) -> String {
        format!("tl_2020_{state_fips}_tabblock20.zip")
    }

    pub fn census_blocks_url(&self, state_fips: &str) -> String {
        let file_name = Self::census_blocks_file_name(state_fips);
        self.resolve(
            format!("{TIGER_URL}/TIGER2020/TABBLOCK20/{file_name}"),
            &file_name,
        )
    }
}

/// Reads the LODES directory listing of `state` and returns its latest aux JT00 year.
pub async fn autodetect_latest_lodes_year(
    client: &HttpClient,
    source: &CensusSource,
    state: &str,
) -> Result<u16> {
    let url = source.lodes_directory_url(state);
    debug!("Looking up latest LODES year for {state} aux JT00");
    let listing_url = url.as_str();
    let html = with_retries(client.retries(), listing_url, move || {
        client.fetch_text(listing_url, &[])
    })
    .await?;
    let year = parse_latest_lodes_year(&html, state, LodesPart::Aux.as_str(), "JT00")?;
    debug!("Found year: {year}");
    Ok(year)
}

pub struct CensusDownloader<'a> {
    client: &'a HttpClient,
    store: &'a DataStore,
    source: CensusSource,
}

impl<'a> CensusDownloader<'a> {
    pub fn new(client: &'a HttpClient, store: &'a DataStore, source: CensusSource) -> Self {
        Self {
            client,
            store,
            source,
        }
    }

    pub async fn download_state_speed_limits(&self) -> Result<()> {
        let url = self.source.public_document_url(STATE_SPEED_CSV);
        self.store.fetch(self.client, &url, STATE_SPEED_CSV).await?;
        Ok(())
    }

    pub async fn download_city_speed_limits(&self) -> Result<()> {
        let url = self.source.public_document_url(CITY_SPEED_CSV);
        self.store.fetch(self.client, &url, CITY_SPEED_CSV).await?;
        Ok(())
    }

    pub async fn download_census_waterblocks(&self) -> Result<()> {
        if self.store.is_stored(WATER_BLOCKS_CSV) {
            return Ok(());
        }
        let url = self.source.public_document_url(WATER_BLOCKS_ZIP);
        let archive = self.store.fetch(self.client, &url, WATER_BLOCKS_ZIP).await?;
        unzip(&archive, self.store.store_dir(), true)
    }

    /// Downloads and decompresses the main and aux origin-destination files.
    pub async fn download_lodes_data(&self, state: &str, year: u16) -> Result<()> {
        for part in LodesPart::ALL {
            let stem = part.file_stem(state, year);
            let csv_name = format!("{stem}.csv");
            if self.store.is_stored(&csv_name) {
                debug!("{csv_name} is already stored");
                continue;
            }
            let gz_name = format!("{stem}.csv.gz");
            let url = self.source.lodes_url(state, &gz_name);
            let archive = self.store.fetch(self.client, &url, &gz_name).await?;
            gunzip(&archive, &self.store.stored_path(&csv_name), true)?;
        }
        Ok(())
    }

    /// Downloads the 2020 tabulation blocks and exposes them as `population.*`.
    pub async fn download_2020_census_blocks(&self, state_fips: &str) -> Result<()> {
        if self.store.is_stored(POPULATION_SHP) {
            info!("Census blocks already prepared");
            return Ok(());
        }
        let file_name = CensusSource::census_blocks_file_name(state_fips);
        let url = self.source.census_blocks_url(state_fips);
        let archive = self.store.fetch(self.client, &url, &file_name).await?;
        prepare_census_blocks(&archive, self.store.store_dir())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const LISTING: &str = r#"
        <table>
          <tr><th><a href="?C=N;O=D">Name</a></th></tr>
          <tr><td><a href="tx_od_aux_JT00_2002.csv.gz">tx_od_aux_JT00_2002.csv.gz</a></td></tr>
          <tr><td><a href="tx_od_aux_JT00_2021.csv.gz">tx_od_aux_JT00_2021.csv.gz</a></td></tr>
          <tr><td><a href="tx_od_main_JT00_2022.csv.gz">tx_od_main_JT00_2022.csv.gz</a></td></tr>
          <tr><td><a href="tx_od_aux_JT01_2023.csv.gz">tx_od_aux_JT01_2023.csv.gz</a></td></tr>
        </table>
    "#;

    #[test]
    fn test_parse_latest_lodes_year() {
        assert_eq!(parse_latest_lodes_year(LISTING, "TX", "aux", "JT00").unwrap(), 2021);
        assert_eq!(parse_latest_lodes_year(LISTING, "tx", "main", "JT00").unwrap(), 2022);
        assert!(parse_latest_lodes_year(LISTING, "nm", "aux", "JT00").is_err());
    }

    #[test]
    fn test_official_urls() {
        let source = CensusSource::new(None);
        assert_eq!(
            source.census_blocks_url("35"),
            "https://www2.census.gov/geo/tiger/TIGER2020/TABBLOCK20/tl_2020_35_tabblock20.zip"
        );
        assert_eq!(
            source.lodes_url("NM", "nm_od_main_JT00_2022.csv.gz"),
            "https://lehd.ces.census.gov/data/lodes/LODES8/nm/od/nm_od_main_JT00_2022.csv.gz"
        );
        assert_eq!(
            source.public_document_url(STATE_SPEED_CSV),
            "https://s3.amazonaws.com/pfb-public-documents/state_fips_speed.csv"
        );
    }

    #[test]
    fn test_mirror_urls() {
        let source = CensusSource::new(Some("https://mirror.example.org/bna/".to_string()));
        assert_eq!(
            source.census_blocks_url("35"),
            "https://mirror.example.org/bna/tl_2020_35_tabblock20.zip"
        );
        assert_eq!(
            source.public_document_url(WATER_BLOCKS_ZIP),
            "https://mirror.example.org/bna/censuswaterblocks.zip"
        );
    }

    #[tokio::test]
    async fn test_autodetect_reads_directory_listing() {
        let mut server = mockito::Server::new_async().await;
        let listing = server
            .mock("GET", "/tx/od")
            .with_status(200)
            .with_body(LISTING)
            .create_async()
            .await;

        let client = HttpClient::new(&crate::config::Config::default_config().download).unwrap();
        let source = CensusSource::new(None).with_lodes_url(&server.url());
        let year = autodetect_latest_lodes_year(&client, &source, "TX").await.unwrap();
        assert_eq!(year, 2021);
        listing.assert_async().await;
    }

    #[tokio::test]
    async fn test_lodes_download_skips_existing_csv() {
        let temp = tempfile::TempDir::new().unwrap();
        for part in LodesPart::ALL {
            std::fs::write(temp.path().join(format!("{}.csv", part.file_stem("nm", 2022))), "x")
                .unwrap();
        }
        let store = DataStore::new(temp.path(), None);
        let client = HttpClient::new(&crate::config::Config::default_config().download).unwrap();
        let downloader = CensusDownloader::new(&client, &store, CensusSource::new(None));
        downloader.download_lodes_data("NM", 2022).await.unwrap();
    }
}

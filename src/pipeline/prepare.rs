// file: src/pipeline/prepare.rs
// description: downloads and derives every input file needed to analyze a city
// reference: nominatim, geofabrik and us census downloads followed by osmium reduction

use crate::config::{Config, DownloadConfig};
use crate::database::CityFiles;
use crate::download::census::{CensusDownloader, CensusSource, autodetect_latest_lodes_year};
use crate::download::{CacheStrategy, DataStore, GeofabrikIndex, HttpClient, with_retries};
use crate::download::{geofabrik, nominatim};
use crate::error::{BnaError, Result};
use crate::geo::{Boundary, synthetic_population, write_census_blocks};
use crate::models::{Location, StateInfo};
use crate::pipeline::progress::StatusSpinner;
use crate::tools::{osm, postgis};
use crate::utils::logging::format_step;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const POPULATION_GEOJSON: &str = "population.geojson";

#[derive(Debug, Clone)]
pub struct PrepareOptions {
    pub data_dir: PathBuf,
    pub block_size: u32,
    pub block_population: u32,
    pub city_speed_limit: u32,
    /// `None` looks the latest published year up.
    pub lodes_year: Option<u16>,
    pub cache_strategy: CacheStrategy,
    pub cache_dir: Option<PathBuf>,
    pub no_cache: bool,
    pub download: DownloadConfig,
}

impl PrepareOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            data_dir: config.paths.data_dir.clone(),
            block_size: config.analysis.block_size,
            block_population: config.analysis.block_population,
            city_speed_limit: config.analysis.city_speed_limit,
            lodes_year: config.analysis.lodes_year,
            cache_strategy: config.cache.strategy,
            cache_dir: config.cache.dir.clone(),
            no_cache: false,
            download: config.download.clone(),
        }
    }
}

/// Result of a prepare run.
#[derive(Debug, Clone)]
pub struct PreparedCity {
    pub location: Location,
    pub files: CityFiles,
    pub lodes_year: Option<u16>,
}

fn step(message: &str) {
    info!("{message}");
    println!("{}", format_step(message));
}

/// `city,state,fips_code_city,speed` file overriding the residential speed limit.
pub fn write_city_speed_limit(path: &Path, city: &str, state: &str, speed: u32) -> Result<()> {
    let city = city.replace(',', " ");
    let content = format!("city,state,fips_code_city,speed\n{city},{state},0,{speed}\n");
    fs::write(path, content).map_err(|e| BnaError::file(path, e))
}

/// Simulates census blocks over the boundary and converts them into `population.shp`.
pub async fn prepare_synthetic_population(
    files: &CityFiles,
    block_size: u32,
    block_population: u32,
) -> Result<()> {
    let boundary = Boundary::from_file(&files.boundary_geojson())?;
    let cells = synthetic_population(&boundary, block_size, block_population)?;
    debug!("synthetic population: {} cells", cells.len());

    let geojson = files.dir.join(POPULATION_GEOJSON);
    write_census_blocks(&cells, &geojson)?;
    postgis::geojson_to_shapefile(&geojson, &files.population()).await
}

/// Configured LODES year, or the latest one published for `state`.
pub async fn resolve_lodes_year(
    client: &HttpClient,
    options: &PrepareOptions,
    state: &str,
) -> Result<u16> {
    match options.lodes_year {
        Some(year) => Ok(year),
        None => {
            let source = CensusSource::from_config(&options.download);
            let year = autodetect_latest_lodes_year(client, &source, state).await?;
            info!("Latest LODES year for {state}: {year}");
            Ok(year)
        }
    }
}

async fn prepare_us_inputs(
    client: &HttpClient,
    store: &DataStore,
    options: &PrepareOptions,
    state: &StateInfo,
) -> Result<u16> {
    let year = resolve_lodes_year(client, options, &state.abbrev).await?;
    let downloader =
        CensusDownloader::new(client, store, CensusSource::from_config(&options.download));

    step("Fetching US state speed limits...");
    let spinner = StatusSpinner::new("Downloading...");
    downloader.download_state_speed_limits().await?;

    step("Fetching US city speed limits...");
    spinner.set_message("Downloading...");
    downloader.download_city_speed_limits().await?;

    step(&format!("Fetching US employment data ({year})..."));
    downloader.download_lodes_data(&state.abbrev, year).await?;

    step("Fetching US census blocks (2020)...");
    downloader.download_2020_census_blocks(&state.fips).await?;

    step("Fetching US census water blocks...");
    downloader.download_census_waterblocks().await?;
    spinner.finish();

    Ok(year)
}

/// Collects the boundary, the reduced OSM file, census blocks and speed limits of a city
/// into `data_dir/<slug>`.
pub async fn prepare(location: &Location, options: &PrepareOptions) -> Result<PreparedCity> {
    let location = location.clone().validate_for_analysis()?;
    let files = CityFiles::for_location(&options.data_dir, &location);
    fs::create_dir_all(&files.dir).map_err(|e| BnaError::file(&files.dir, e))?;
    info!("output_dir={}", files.dir.display());

    let http = HttpClient::new(&options.download)?;
    let client = &http;
    let city = &location;
    let city_dir = files.dir.as_path();

    step(&format!("Querying OSM to retrieve {} boundaries...", location.city));
    let nominatim_url = options.download.nominatim_url.as_str();
    let geojson = with_retries(client.retries(), "city boundary", move || {
        nominatim::retrieve_city_boundary(client, nominatim_url, city, city_dir)
    })
    .await?;
    postgis::geojson_to_shapefile(&geojson, &files.boundary_shp()).await?;

    step(&format!(
        "Fetching the OSM region file for {}...",
        location.osm_region()
    ));
    let spinner = StatusSpinner::new("Downloading...");
    let index = GeofabrikIndex::fetch(client, &options.download.geofabrik_index_url).await?;
    let region_file = geofabrik::retrieve_region_file(client, &index, city, city_dir).await?;
    spinner.finish();

    step(&format!(
        "Reducing the OSM file for {} with osmium...",
        location.city
    ));
    let osm_file = files.osm();
    if osm_file.exists() {
        debug!("{} already exists", osm_file.display());
    } else {
        osm::osmium_extract(&geojson, &region_file, &osm_file).await?;
    }

    let state = location.state_info();
    let lodes_year = if state.is_us_state() {
        let store = DataStore::from_strategy(
            &files.dir,
            options.cache_strategy,
            options.cache_dir.clone(),
            options.no_cache,
        )?;
        Some(prepare_us_inputs(client, &store, options, &state).await?)
    } else {
        step("Preparing synthetic population...");
        prepare_synthetic_population(&files, options.block_size, options.block_population)
            .await?;

        step(&format!(
            "Adjusting default city speed limit to {} km/h...",
            options.city_speed_limit
        ));
        write_city_speed_limit(
            &files.city_speed(),
            &location.city,
            &state.abbrev,
            options.city_speed_limit,
        )?;
        None
    };

    info!("City files ready in {}", files.dir.display());
    Ok(PreparedCity {
        location,
        files,
        lodes_year,
    })
}

// file: src/database/ingest.rs
// description: loads boundaries, census blocks, jobs and OSM data into PostGIS
// reference: https://postgis.net/docs/using_postgis_dbmanagement.html

use crate::database::client::PostgresClient;
use crate::download::census::{
    CITY_SPEED_CSV, POPULATION_SHP, STATE_SPEED_CSV, WATER_BLOCKS_CSV,
};
use crate::error::{BnaError, Result};
use crate::geo::BoundingBox;
use crate::geo::srid_for_boundary_file;
use crate::models::state::NON_US_STATE_FIPS;
use crate::models::{LodesPart, Location};
use crate::tools::{osm, postgis};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const BOUNDARY_TABLE: &str = "neighborhood_boundary";
pub const CENSUS_BLOCKS_TABLE: &str = "neighborhood_census_blocks";
pub const CITY_SPEED_TABLE: &str = "city_speed";
pub const STATE_SPEED_TABLE: &str = "state_speed";
pub const WATER_BLOCKS_TABLE: &str = "water_blocks";
pub const RESIDENTIAL_SPEED_LIMIT_TABLE: &str = "residential_speed_limit";

/// 2020 census column names and the names the scoring scripts expect.
const CENSUS_2020_COLUMNS: [(&str, &str); 2] = [("geoid20", "blockid10"), ("pop20", "pop10")];

const OSM_FULL_TABLES: [&str; 4] = ["line", "point", "polygon", "roads"];

/// Input files of a prepared city, all living in the city directory.
#[derive(Debug, Clone)]
pub struct CityFiles {
    pub dir: PathBuf,
    pub slug: String,
}

impl CityFiles {
    pub fn new(dir: impl Into<PathBuf>, slug: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            slug: slug.into(),
        }
    }

    pub fn for_location(data_dir: &Path, location: &Location) -> Self {
        let slug = location.slug();
        Self::new(data_dir.join(&slug), slug)
    }

    pub fn boundary_geojson(&self) -> PathBuf {
        self.dir.join(format!("{}.geojson", self.slug))
    }

    pub fn boundary_shp(&self) -> PathBuf {
        self.dir.join(format!("{}.shp", self.slug))
    }

    pub fn osm(&self) -> PathBuf {
        self.dir.join(format!("{}.osm", self.slug))
    }

    pub fn population(&self) -> PathBuf {
        self.dir.join(POPULATION_SHP)
    }

    pub fn water_blocks(&self) -> PathBuf {
        self.dir.join(WATER_BLOCKS_CSV)
    }

    pub fn state_speed(&self) -> PathBuf {
        self.dir.join(STATE_SPEED_CSV)
    }

    pub fn city_speed(&self) -> PathBuf {
        self.dir.join(CITY_SPEED_CSV)
    }

    pub fn lodes(&self, part: LodesPart, state: &str, year: u16) -> PathBuf {
        self.dir.join(format!("{}.csv", part.file_stem(state, year)))
    }

    /// Latest year for which every LODES part of `state` is in the city directory.
    pub fn prepared_lodes_year(&self, state: &str) -> Option<u16> {
        let prefix = format!("{}_od_{}_JT00_", state.to_lowercase(), LodesPart::Aux.as_str());
        let entries = std::fs::read_dir(&self.dir).ok()?;
        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                name.strip_prefix(&prefix)?
                    .strip_suffix(".csv")?
                    .parse::<u16>()
                    .ok()
            })
            .filter(|year| {
                LodesPart::ALL
                    .iter()
                    .all(|part| self.lodes(*part, state, *year).is_file())
            })
            .max()
    }

    /// Projected SRID derived from the city boundary.
    pub fn output_srid(&self) -> Result<u32> {
        srid_for_boundary_file(&self.boundary_geojson())
    }
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub buffer: u32,
    pub lodes_year: Option<u16>,
    pub city_speed_limit: Option<u32>,
    pub processes: usize,
}

pub fn transform_query(table: &str, output_srid: u32) -> String {
    format!(
        "ALTER TABLE {table} ALTER COLUMN geom TYPE geometry(MultiPolygon,{output_srid}) \
         USING ST_Force2d(ST_Transform(geom,{output_srid}))"
    )
}

pub fn jobs_table_ddl(table: &str) -> String {
    format!(
        "DROP TABLE IF EXISTS {table};\
         CREATE TABLE {table} (\
         w_geocode varchar(15),\
         h_geocode varchar(15),\
         S000 integer,\
         SA01 integer,\
         SA02 integer,\
         SA03 integer,\
         SE01 integer,\
         SE02 integer,\
         SE03 integer,\
         SI01 integer,\
         SI02 integer,\
         SI03 integer,\
         createdate varchar(32));"
    )
}

fn sql_value(value: Option<u32>) -> String {
    value.map_or_else(|| "NULL".to_string(), |v| v.to_string())
}

pub fn residential_speed_insert(
    state_fips: &str,
    city_fips: &str,
    state_speed: Option<u32>,
    city_speed: Option<u32>,
) -> String {
    format!(
        "INSERT INTO {RESIDENTIAL_SPEED_LIMIT_TABLE} \
         (state_fips_code, city_fips_code, state_speed, city_speed) \
         VALUES ('{}', '{}', {}, {});",
        state_fips.replace('\'', ""),
        city_fips.replace('\'', ""),
        sql_value(state_speed),
        sql_value(city_speed)
    )
}

pub struct Ingestor<'a> {
    client: &'a PostgresClient,
    scripts_dir: &'a Path,
}

impl<'a> Ingestor<'a> {
    pub fn new(client: &'a PostgresClient, scripts_dir: &'a Path) -> Self {
        Self {
            client,
            scripts_dir,
        }
    }

    fn sql_script(&self, name: &str) -> PathBuf {
        self.scripts_dir.join("sql").join(name)
    }

    pub async fn import_and_transform_shapefile(
        &self,
        shapefile: &Path,
        table: &str,
        output_srid: u32,
        input_srid: u32,
    ) -> Result<()> {
        info!(
            "Importing {} into {table} with SRID {input_srid}",
            shapefile.display()
        );
        postgis::shp2pgsql(self.client.url(), shapefile, table, input_srid).await?;
        self.client
            .execute(&transform_query(table, output_srid))
            .await
    }

    /// Renames the 2020 census columns so every block table looks the same.
    pub async fn normalize_census_columns(&self) -> Result<()> {
        for (from, to) in CENSUS_2020_COLUMNS {
            if self.client.column_exists(CENSUS_BLOCKS_TABLE, from).await? {
                debug!("Renaming {CENSUS_BLOCKS_TABLE}.{from} to {to}");
                self.client
                    .execute(&format!(
                        "ALTER TABLE {CENSUS_BLOCKS_TABLE} RENAME COLUMN {from} TO {to};"
                    ))
                    .await?;
            }
        }
        Ok(())
    }

    pub async fn delete_block_outside_buffer(&self, buffer: u32) -> Result<()> {
        self.client
            .execute(&format!(
                "DELETE FROM {CENSUS_BLOCKS_TABLE} AS blocks \
                 USING {BOUNDARY_TABLE} AS boundary \
                 WHERE NOT ST_DWithin(blocks.geom, boundary.geom, {buffer})"
            ))
            .await
    }

    pub async fn load_water_blocks(&self, csv: &Path) -> Result<()> {
        self.client
            .load_csv_file(
                &self.sql_script("create_us_water_blocks_table.sql"),
                csv,
                WATER_BLOCKS_TABLE,
            )
            .await
    }

    pub async fn delete_water_blocks(&self) -> Result<()> {
        self.client
            .execute(&format!(
                "DELETE FROM {CENSUS_BLOCKS_TABLE} AS blocks \
                 USING {WATER_BLOCKS_TABLE} AS water \
                 WHERE blocks.BLOCKID10 = water.geoid;"
            ))
            .await
    }

    pub async fn retrieve_population(&self) -> Result<i64> {
        self.client
            .query_i64(&format!(
                "SELECT COALESCE(SUM(pop10), 0)::bigint FROM {CENSUS_BLOCKS_TABLE}"
            ))
            .await
    }

    /// Recreates the boundary and census block tables. Fails when no one lives in the area.
    pub async fn import_neighborhood(
        &self,
        location: &Location,
        files: &CityFiles,
        output_srid: u32,
        buffer: u32,
    ) -> Result<()> {
        debug!("country={} output_srid={output_srid} buffer={buffer}", location.country);

        info!("Importing neighborhood boundary...");
        self.import_and_transform_shapefile(
            &files.boundary_shp(),
            BOUNDARY_TABLE,
            output_srid,
            postgis::WGS84_SRID,
        )
        .await?;

        info!("Importing census blocks...");
        self.import_and_transform_shapefile(
            &files.population(),
            CENSUS_BLOCKS_TABLE,
            output_srid,
            postgis::WGS84_SRID,
        )
        .await?;
        self.normalize_census_columns().await?;

        info!("Removing blocks outside buffer with size {buffer}m...");
        self.delete_block_outside_buffer(buffer).await?;

        if location.is_usa() {
            info!("Removing water blocks...");
            self.load_water_blocks(&files.water_blocks()).await?;
            self.delete_water_blocks().await?;
        }

        info!("Retrieving the population...");
        let population = self.retrieve_population().await?;
        debug!("population={population}");
        if population == 0 {
            return Err(BnaError::Validation(
                "the population cannot be equal to zero".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn load_jobs(&self, part: LodesPart, csv: &Path) -> Result<()> {
        let table = part.table_name();
        self.client.execute(&jobs_table_ddl(&table)).await?;
        self.client.import_csv_with_header(csv, &table).await
    }

    pub async fn import_jobs(&self, state: &str, year: u16, files: &CityFiles) -> Result<()> {
        let state = state.to_lowercase();
        for part in LodesPart::ALL {
            let csv = files.lodes(part, &state, year);
            if !csv.is_file() {
                return Err(BnaError::Validation(format!(
                    "the job data file {} was not found",
                    csv.display()
                )));
            }
            debug!("Importing job file: {}", csv.display());
            self.load_jobs(part, &csv).await?;
        }
        Ok(())
    }

    pub async fn retrieve_boundary_box(&self) -> Result<BoundingBox> {
        let text = self
            .client
            .query_optional_text(&format!(
                "SELECT ST_Extent(ST_Transform(geom, {}))::text FROM {CENSUS_BLOCKS_TABLE};",
                postgis::WGS84_SRID
            ))
            .await?
            .ok_or_else(|| {
                BnaError::Geometry(format!("{CENSUS_BLOCKS_TABLE} has no geometry"))
            })?;
        BoundingBox::from_postgis_box(&text)
    }

    pub async fn rename_neighborhood_tables(&self) -> Result<()> {
        self.client
            .execute(
                "ALTER TABLE received.neighborhood_ways_vertices_pgr \
                 RENAME TO neighborhood_ways_intersections;\
                 ALTER TABLE received.neighborhood_ways_intersections \
                 RENAME CONSTRAINT neighborhood_ways_vertices_pgr_osm_id_key \
                 TO neighborhood_vertex_id;\
                 ALTER TABLE scratch.neighborhood_cycwys_ways_vertices_pgr \
                 RENAME CONSTRAINT neighborhood_cycwys_ways_vertices_pgr_osm_id_key \
                 TO neighborhood_vertex_id;",
            )
            .await
    }

    pub async fn move_tables(&self) -> Result<()> {
        let sql: String = OSM_FULL_TABLES
            .iter()
            .map(|kind| {
                format!(
                    "ALTER TABLE generated.{}_{kind} SET SCHEMA received;",
                    osm::OSM_FULL_PREFIX
                )
            })
            .collect();
        self.client.execute(&sql).await
    }

    async fn retrieve_speed(&self, sql: &str, fips: &str) -> Result<Option<u32>> {
        let row = self.client.inner().query_opt(sql, &[&fips]).await?;
        Ok(row
            .and_then(|r| r.get::<_, Option<i32>>(0))
            .and_then(|speed| u32::try_from(speed).ok()))
    }

    pub async fn manage_speed_limits(
        &self,
        state_fips: &str,
        city_fips: &str,
        files: &CityFiles,
        city_speed_limit_override: Option<u32>,
    ) -> Result<()> {
        self.client
            .execute_file(&self.sql_script("speed_tables.sql"))
            .await?;

        info!("Importing state speed limits...");
        let mut state_speed = None;
        if state_fips != NON_US_STATE_FIPS {
            self.client
                .import_csv_with_header(&files.state_speed(), STATE_SPEED_TABLE)
                .await?;
            state_speed = self
                .retrieve_speed(
                    "SELECT speed::integer FROM state_speed WHERE fips_code_state = $1",
                    state_fips,
                )
                .await?;
        }
        debug!("The speed limit for the state {state_fips:?} is {state_speed:?}.");

        info!("Importing city speed limits...");
        let city_speed = match city_speed_limit_override {
            Some(speed) => Some(speed),
            None => {
                self.client
                    .import_csv_with_header(&files.city_speed(), CITY_SPEED_TABLE)
                    .await?;
                self.retrieve_speed(
                    "SELECT speed::integer FROM city_speed WHERE fips_code_city = $1",
                    city_fips,
                )
                .await?
            }
        };
        debug!("The speed limit for the city {city_fips:?} is {city_speed:?}.");

        info!("Saving speed limits into the database...");
        self.client
            .execute(&residential_speed_insert(
                state_fips,
                city_fips,
                state_speed,
                city_speed,
            ))
            .await?;

        info!("Validating the speed data...");
        self.retrieve_default_speed_limits().await?;
        Ok(())
    }

    /// Returns `(state_speed, city_speed)`.
    pub async fn retrieve_default_speed_limits(&self) -> Result<(Option<u32>, Option<u32>)> {
        let row = self
            .client
            .inner()
            .query_opt(
                &format!(
                    "SELECT state_speed::integer, city_speed::integer \
                     FROM {RESIDENTIAL_SPEED_LIMIT_TABLE} LIMIT 1"
                ),
                &[],
            )
            .await?
            .ok_or_else(|| {
                BnaError::NotFound(format!(
                    "no value found in the {RESIDENTIAL_SPEED_LIMIT_TABLE} table"
                ))
            })?;
        let speed = |index: usize| {
            row.get::<_, Option<i32>>(index)
                .and_then(|v| u32::try_from(v).ok())
        };
        let limits = (speed(0), speed(1));
        debug!("state_speed={:?} | city_speed={:?}", limits.0, limits.1);
        Ok(limits)
    }

    /// Requires the census blocks, which define the clipping box.
    pub async fn import_osm_data(
        &self,
        files: &CityFiles,
        output_srid: u32,
        state_fips: &str,
        city_fips: &str,
        options: &ImportOptions,
    ) -> Result<()> {
        let url = self.client.url();

        debug!("Clipping the OSM data...");
        let bbox = self.retrieve_boundary_box().await?;
        debug!("bbox={bbox:?}");
        let clipped = osm::osmconvert(&files.osm(), &bbox).await?;

        info!("Importing OSM data with highways...");
        osm::osm2pgrouting(
            url,
            "received",
            "neighborhood_",
            &self.scripts_dir.join("mapconfig_highway.xml"),
            &clipped,
        )
        .await?;

        info!("Importing OSM data with cycleways...");
        osm::osm2pgrouting(
            url,
            "scratch",
            "neighborhood_cycwys_",
            &self.scripts_dir.join("mapconfig_cycleway.xml"),
            &clipped,
        )
        .await?;

        info!("Renaming tables...");
        self.rename_neighborhood_tables().await?;

        info!("Importing all OSM data...");
        osm::osm2pgsql(
            url,
            output_srid,
            &self.scripts_dir.join("pfb.style"),
            &clipped,
            options.processes,
        )
        .await?;

        info!("Importing speed limits...");
        self.manage_speed_limits(state_fips, city_fips, files, options.city_speed_limit)
            .await?;

        debug!("Moving tables to received schema...");
        self.move_tables().await
    }

    pub async fn import_all(
        &self,
        location: &Location,
        files: &CityFiles,
        options: &ImportOptions,
    ) -> Result<()> {
        location.require_region_for_usa()?;
        let output_srid = files.output_srid()?;
        debug!("output_srid={output_srid}");

        self.import_neighborhood(location, files, output_srid, options.buffer)
            .await?;

        let state = location.state_info();
        debug!("run_import_jobs={}", state.run_import_jobs);
        if state.run_import_jobs {
            let year = options
                .lodes_year
                .or_else(|| files.prepared_lodes_year(&state.abbrev))
                .ok_or_else(|| {
                    BnaError::Validation(
                        "'lodes_year' is required when importing job data".to_string(),
                    )
                })?;
            debug!("lodes_year={year}");
            self.import_jobs(&state.abbrev, year, files).await?;
        }

        self.import_osm_data(
            files,
            output_srid,
            &state.fips,
            &location.city_fips(),
            options,
        )
        .await
    }
}

// file: src/tools/postgis.rs
// description: shp2pgsql, psql, pgsql2shp and ogr2ogr invocations
// reference: https://postgis.net/docs/using_postgis_dbmanagement.html,
//            https://gdal.org/programs/ogr2ogr.html

use crate::database::DatabaseUrl;
use crate::error::{BnaError, Result};
use crate::tools::process::{ToolCommand, run_piped};
use std::path::Path;

pub const WGS84_SRID: u32 = 4326;

/// `shp2pgsql` in prepare mode (`-p`) only emits the table definition, `-d` drops and reloads.
pub fn shp2pgsql_command(
    shapefile: &Path,
    table: &str,
    input_srid: u32,
    prepare_only: bool,
) -> ToolCommand {
    ToolCommand::new("shp2pgsql")
        .arg(if prepare_only { "-p" } else { "-d" })
        .args(["-I", "-D", "-s"])
        .arg(input_srid.to_string())
        .arg(shapefile)
        .arg(table)
}

/// Loads a shapefile into `table` through `shp2pgsql | psql`.
pub async fn shp2pgsql(
    url: &DatabaseUrl,
    shapefile: &Path,
    table: &str,
    input_srid: u32,
) -> Result<()> {
    if !shapefile.is_file() {
        return Err(BnaError::NotFound(format!(
            "shapefile {} does not exist",
            shapefile.display()
        )));
    }
    let psql = ToolCommand::new("psql").arg(url.as_str());
    for prepare_only in [true, false] {
        let producer = shp2pgsql_command(shapefile, table, input_srid, prepare_only);
        run_piped(&producer, &psql).await?;
    }
    Ok(())
}

/// Executes a single command string, e.g. a `\copy` meta-command.
pub async fn psql_command(url: &DatabaseUrl, command: &str) -> Result<()> {
    ToolCommand::new("psql")
        .arg("-c")
        .arg(command)
        .arg(url.as_str())
        .run()
        .await
}

pub fn pgsql2shp_command(url: &DatabaseUrl, output: &Path, table: &str) -> ToolCommand {
    ToolCommand::new("pgsql2shp")
        .arg("-u")
        .arg(url.user().unwrap_or("postgres"))
        .arg("-P")
        .arg(url.password().unwrap_or_default())
        .arg("-h")
        .arg(url.host())
        .arg("-p")
        .arg(url.port().to_string())
        .arg("-f")
        .arg(output)
        .arg(url.dbname())
        .arg(table)
}

pub async fn pgsql2shp(url: &DatabaseUrl, output: &Path, table: &str) -> Result<()> {
    pgsql2shp_command(url, output, table).run().await
}

pub fn ogr2ogr_geojson_export_command(
    url: &DatabaseUrl,
    output: &Path,
    table: &str,
) -> ToolCommand {
    ToolCommand::new("ogr2ogr")
        .arg("-skipfailures")
        .arg("-t_srs")
        .arg(format!("EPSG:{WGS84_SRID}"))
        .args(["-f", "GeoJSON"])
        .arg(output)
        .arg(url.ogr_connection())
        .arg("-sql")
        .arg(format!("select * from {table}"))
}

pub async fn ogr2ogr_geojson_export(url: &DatabaseUrl, output: &Path, table: &str) -> Result<()> {
    ogr2ogr_geojson_export_command(url, output, table).run().await
}

/// Converts a GeoJSON file into an ESRI Shapefile next to it.
pub async fn geojson_to_shapefile(geojson: &Path, shapefile: &Path) -> Result<()> {
    ToolCommand::new("ogr2ogr")
        .args(["-f", "ESRI Shapefile", "-overwrite"])
        .arg(shapefile)
        .arg(geojson)
        .run()
        .await
}

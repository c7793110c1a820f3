// file: src/exporter/local.rs
// description: exports the analysis tables to shapefile, geojson and csv files on disk
// reference: https://docs.rs/zip

use crate::database::PostgresClient;
use crate::error::{BnaError, Result};
use crate::tools::postgis;
use chrono::Utc;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

pub const BUNDLE_FILE: &str = "bundle.zip";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Shp,
    GeoJson,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Shp => "shp",
            ExportFormat::GeoJson => "geojson",
            ExportFormat::Csv => "csv",
        }
    }
}

/// Tables exported per format, in export order.
pub const TABLE_CATALOG: &[(ExportFormat, &[&str])] = &[
    (
        ExportFormat::Shp,
        &["neighborhood_census_blocks", "neighborhood_ways"],
    ),
    (
        ExportFormat::GeoJson,
        &[
            "neighborhood_census_blocks",
            "neighborhood_colleges",
            "neighborhood_community_centers",
            "neighborhood_dentists",
            "neighborhood_doctors",
            "neighborhood_hospitals",
            "neighborhood_parks",
            "neighborhood_pharmacies",
            "neighborhood_retail",
            "neighborhood_schools",
            "neighborhood_social_services",
            "neighborhood_supermarkets",
            "neighborhood_transit",
            "neighborhood_universities",
            "neighborhood_ways",
            "neighborhood_ways_intersections",
        ],
    ),
    (
        ExportFormat::Csv,
        &[
            "neighborhood_connected_census_blocks",
            "neighborhood_overall_scores",
            "neighborhood_score_inputs",
            "residential_speed_limit",
            "mileage",
        ],
    ),
];

#[derive(Debug, Serialize)]
pub struct ExportManifest {
    pub exported_at: String,
    pub export_dir: PathBuf,
    pub files: Vec<PathBuf>,
    pub skipped: Vec<String>,
    pub bundle: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct LocalExporter {
    export_dir: PathBuf,
}

impl LocalExporter {
    pub fn new(export_dir: impl Into<PathBuf>) -> Result<Self> {
        let export_dir = export_dir.into();
        fs::create_dir_all(&export_dir).map_err(|e| BnaError::file(&export_dir, e))?;
        Ok(Self { export_dir })
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    pub fn target(&self, table: &str, format: ExportFormat) -> PathBuf {
        self.export_dir
            .join(format!("{table}.{}", format.extension()))
    }

    async fn export_table(
        &self,
        client: &PostgresClient,
        table: &str,
        format: ExportFormat,
    ) -> Result<PathBuf> {
        let target = self.target(table, format);
        debug!("Exporting {table} to {}", target.display());
        match format {
            ExportFormat::Shp => postgis::pgsql2shp(client.url(), &target, table).await?,
            ExportFormat::GeoJson => {
                postgis::ogr2ogr_geojson_export(client.url(), &target, table).await?
            }
            ExportFormat::Csv => client.export_to_csv(&target, table).await?,
        }
        Ok(target)
    }

    /// Exports every catalogued table. Tables missing from the database are skipped.
    pub async fn export_all(
        &self,
        client: &PostgresClient,
        with_bundle: bool,
    ) -> Result<ExportManifest> {
        info!("Exporting results to {}", self.export_dir.display());
        let mut files = Vec::new();
        let mut skipped = Vec::new();

        for (format, tables) in TABLE_CATALOG {
            for table in tables.iter() {
                if !client.table_exists(table).await? {
                    debug!("Table {table} does not exist, skipping");
                    skipped.push(format!("{table}.{}", format.extension()));
                    continue;
                }
                files.push(self.export_table(client, table, *format).await?);
            }
        }

        let bundle = if with_bundle {
            Some(bundle(&self.export_dir)?)
        } else {
            None
        };

        let manifest = ExportManifest {
            exported_at: Utc::now().to_rfc3339(),
            export_dir: self.export_dir.clone(),
            files,
            skipped,
            bundle,
        };
        info!(
            "Export complete: {} files written, {} tables skipped",
            manifest.files.len(),
            manifest.skipped.len()
        );
        Ok(manifest)
    }
}

/// Zips the content of `dir` into `dir/bundle.zip`.
pub fn bundle(dir: &Path) -> Result<PathBuf> {
    let destination = dir.join(BUNDLE_FILE);
    let staging = dir.join(format!("{BUNDLE_FILE}.part"));
    let file = File::create(&staging).map_err(|e| BnaError::file(&staging, e))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut entries: Vec<_> = WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path() != destination && entry.path() != staging)
        .collect();
    entries.sort_by(|a, b| a.path().cmp(b.path()));

    for entry in entries {
        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| BnaError::Validation(e.to_string()))?
            .to_string_lossy()
            .replace('\\', "/");
        if entry.file_type().is_dir() {
            zip.add_directory(relative, options)?;
            continue;
        }
        zip.start_file(relative, options)?;
        let source = File::open(entry.path()).map_err(|e| BnaError::file(entry.path(), e))?;
        io::copy(&mut BufReader::new(source), &mut zip)?;
    }
    zip.finish()?;

    fs::rename(&staging, &destination).map_err(|e| BnaError::file(&destination, e))?;
    info!("Bundle written to {}", destination.display());
    Ok(destination)
}

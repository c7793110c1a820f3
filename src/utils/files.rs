// file: src/utils/files.rs
// description: archive extraction, checksums, sizes and cache cleanup helpers
// reference: https://docs.rs/zip, https://docs.rs/flate2, https://docs.rs/walkdir

use crate::error::{BnaError, Result};
use flate2::read::MultiGzDecoder;
use md5::{Digest, Md5};
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

pub const APP_NAME: &str = "brokenspoke-analyzer";

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Per-user cache directory for downloaded artifacts.
pub fn user_cache_dir() -> Result<PathBuf> {
    dirs::cache_dir()
        .map(|dir| dir.join(APP_NAME))
        .ok_or_else(|| BnaError::Config("unable to locate the user cache directory".to_string()))
}

pub fn unzip(archive: &Path, output_dir: &Path, delete_after: bool) -> Result<()> {
    debug!("Unzipping {} into {}", archive.display(), output_dir.display());
    let file = File::open(archive).map_err(|e| BnaError::file(archive, e))?;
    let mut zip = zip::ZipArchive::new(BufReader::new(file))?;
    zip.extract(output_dir)?;

    if delete_after {
        fs::remove_file(archive).map_err(|e| BnaError::file(archive, e))?;
    }
    Ok(())
}

/// Decompresses a gzip file. A corrupt archive is removed so the next run downloads it again.
pub fn gunzip(archive: &Path, target: &Path, delete_after: bool) -> Result<()> {
    debug!("Gunzipping {} into {}", archive.display(), target.display());
    let file = File::open(archive).map_err(|e| BnaError::file(archive, e))?;
    let mut decoder = MultiGzDecoder::new(BufReader::new(file));
    let mut output = File::create(target).map_err(|e| BnaError::file(target, e))?;

    if let Err(e) = io::copy(&mut decoder, &mut output) {
        drop(output);
        remove_or_warn(target);
        remove_or_warn(archive);
        return Err(BnaError::Validation(format!(
            "the archive {} is corrupted and was deleted, please download it again: {e}",
            archive.display()
        )));
    }

    if delete_after {
        fs::remove_file(archive).map_err(|e| BnaError::file(archive, e))?;
    }
    Ok(())
}

/// Removes a leftover file, logging instead of failing when it cannot be removed.
pub fn remove_or_warn(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("unable to remove {}: {e}", path.display());
        }
    }
}

pub fn md5_hex(path: &Path) -> Result<String> {
    let mut file = BufReader::new(File::open(path).map_err(|e| BnaError::file(path, e))?);
    let mut hasher = Md5::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer).map_err(|e| BnaError::file(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Compares the MD5 digest of `file` with the sum published in `md5_file`.
pub fn file_checksum_ok(file: &Path, md5_file: &Path) -> Result<bool> {
    let expected = fs::read_to_string(md5_file).map_err(|e| BnaError::file(md5_file, e))?;
    let expected = expected.trim();
    let expected = expected.get(..32).unwrap_or(expected);
    let actual = md5_hex(file)?;
    debug!("md5 expected={expected} actual={actual}");
    Ok(actual.eq_ignore_ascii_case(expected))
}

/// Unzips a census block archive and renames its members to `population.*`.
pub fn prepare_census_blocks(archive: &Path, output_dir: &Path) -> Result<()> {
    let stem = archive
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| BnaError::Validation(format!("invalid archive name {}", archive.display())))?
        .to_string();

    unzip(archive, output_dir, true)?;

    for entry in fs::read_dir(output_dir).map_err(|e| BnaError::file(output_dir, e))? {
        let path = entry?.path();
        let matches = path.file_stem().and_then(|s| s.to_str()) == Some(stem.as_str());
        if !matches {
            continue;
        }
        // `.shp.xml` has a stem of `<name>.shp`, so it is not renamed.
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            let target = output_dir.join(format!("population.{ext}"));
            fs::rename(&path, &target).map_err(|e| BnaError::file(&path, e))?;
        }
    }
    Ok(())
}

pub fn get_size(path: &Path) -> u64 {
    if path.is_file() {
        return path.metadata().map(|m| m.len()).unwrap_or(0);
    }
    WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|m| m.len())
        .sum()
}

pub fn bytes_to_gb(bytes: u64) -> f64 {
    (bytes as f64 / BYTES_PER_GB * 1000.0).round() / 1000.0
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct CleanupReport {
    pub file_count: usize,
    pub directory_count: usize,
    pub space_bytes: u64,
    pub files: Vec<PathBuf>,
    pub directories: Vec<PathBuf>,
    pub errors: Vec<String>,
    pub dry_run: bool,
}

impl CleanupReport {
    pub fn total_item_count(&self) -> usize {
        self.file_count + self.directory_count
    }

    pub fn space_gb(&self) -> f64 {
        bytes_to_gb(self.space_bytes)
    }
}

/// Removes the direct children of `dir`. Hidden entries are kept unless `include_hidden`.
pub fn delete_folder_contents(
    dir: &Path,
    include_hidden: bool,
    dry_run: bool,
) -> Result<CleanupReport> {
    if !dir.exists() {
        return Err(BnaError::NotFound(format!(
            "directory {} does not exist",
            dir.display()
        )));
    }
    if !dir.is_dir() {
        return Err(BnaError::Validation(format!(
            "{} is not a directory",
            dir.display()
        )));
    }

    let mut report = CleanupReport {
        dry_run,
        ..Default::default()
    };

    for entry in fs::read_dir(dir).map_err(|e| BnaError::file(dir, e))? {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(e) => {
                report.errors.push(e.to_string());
                continue;
            }
        };
        if !include_hidden && is_hidden(&path) {
            continue;
        }

        let size = get_size(&path);
        let is_dir = path.is_dir() && !path.is_symlink();

        if !dry_run {
            let removed = if is_dir {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            if let Err(e) = removed {
                warn!("Unable to delete {}: {}", path.display(), e);
                report.errors.push(format!("{}: {}", path.display(), e));
                continue;
            }
        }

        report.space_bytes += size;
        if is_dir {
            report.directory_count += 1;
            report.directories.push(path);
        } else {
            report.file_count += 1;
            report.files.push(path);
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_zip(path: &Path, members: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, content) in members {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_bytes_to_gb() {
        assert_eq!(bytes_to_gb(0), 0.0);
        assert_eq!(bytes_to_gb(1024 * 1024 * 1024), 1.0);
        assert_eq!(bytes_to_gb(1_500_000_000), 1.397);
    }

    #[test]
    fn test_gunzip() {
        let temp = TempDir::new().unwrap();
        let gz = temp.path().join("nm_od_main_JT00_2022.csv.gz");
        let csv = temp.path().join("nm_od_main_JT00_2022.csv");

        let mut encoder = GzEncoder::new(File::create(&gz).unwrap(), Compression::default());
        encoder.write_all(b"w_geocode,h_geocode\n1,2\n").unwrap();
        encoder.finish().unwrap();

        gunzip(&gz, &csv, true).unwrap();
        assert_eq!(fs::read_to_string(&csv).unwrap(), "w_geocode,h_geocode\n1,2\n");
        assert!(!gz.exists());
    }

    #[test]
    fn test_gunzip_reads_every_member() {
        let temp = TempDir::new().unwrap();
        let gz = temp.path().join("multi.csv.gz");
        let csv = temp.path().join("multi.csv");

        let mut bytes = Vec::new();
        for chunk in [&b"w_geocode,h_geocode\n"[..], &b"1,2\n"[..]] {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(chunk).unwrap();
            bytes.extend(encoder.finish().unwrap());
        }
        fs::write(&gz, bytes).unwrap();

        gunzip(&gz, &csv, false).unwrap();
        assert_eq!(fs::read_to_string(&csv).unwrap(), "w_geocode,h_geocode\n1,2\n");
    }

    #[test]
    fn test_remove_or_warn_ignores_missing_files() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("leftover.part");
        fs::write(&path, "x").unwrap();
        remove_or_warn(&path);
        assert!(!path.exists());
        remove_or_warn(&path);
    }

    #[test]
    fn test_gunzip_corrupted_archive_is_deleted() {
        let temp = TempDir::new().unwrap();
        let gz = temp.path().join("broken.csv.gz");
        fs::write(&gz, b"definitely not gzip").unwrap();

        let result = gunzip(&gz, &temp.path().join("broken.csv"), false);
        assert!(matches!(result, Err(BnaError::Validation(_))));
        assert!(!gz.exists());
    }

    #[test]
    fn test_file_checksum_ok() {
        let temp = TempDir::new().unwrap();
        let data = temp.path().join("region.osm.pbf");
        let md5 = temp.path().join("region.osm.pbf.md5");
        fs::write(&data, b"hello world").unwrap();

        fs::write(&md5, "5eb63bbbe01eeed093cb22bb8f5acdc3  region.osm.pbf\n").unwrap();
        assert!(file_checksum_ok(&data, &md5).unwrap());

        fs::write(&md5, "00000000000000000000000000000000  region.osm.pbf\n").unwrap();
        assert!(!file_checksum_ok(&data, &md5).unwrap());
    }

    #[test]
    fn test_prepare_census_blocks_renames_members() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("tl_2020_35_tabblock20.zip");
        write_zip(
            &archive,
            &[
                ("tl_2020_35_tabblock20.shp", b"shp"),
                ("tl_2020_35_tabblock20.dbf", b"dbf"),
                ("tl_2020_35_tabblock20.shx", b"shx"),
            ],
        );

        prepare_census_blocks(&archive, temp.path()).unwrap();

        assert!(temp.path().join("population.shp").exists());
        assert!(temp.path().join("population.dbf").exists());
        assert!(temp.path().join("population.shx").exists());
        assert!(!archive.exists());
    }

    #[test]
    fn test_delete_folder_contents_dry_run_and_delete() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.zip"), vec![0u8; 10]).unwrap();
        fs::create_dir(temp.path().join("city")).unwrap();
        fs::write(temp.path().join("city/b.osm"), vec![0u8; 20]).unwrap();
        fs::write(temp.path().join(".keep"), b"x").unwrap();

        let report = delete_folder_contents(temp.path(), false, true).unwrap();
        assert!(report.dry_run);
        assert_eq!(report.file_count, 1);
        assert_eq!(report.directory_count, 1);
        assert_eq!(report.space_bytes, 30);
        assert!(temp.path().join("a.zip").exists());

        let report = delete_folder_contents(temp.path(), false, false).unwrap();
        assert_eq!(report.total_item_count(), 2);
        assert!(report.errors.is_empty());
        assert!(!temp.path().join("a.zip").exists());
        assert!(!temp.path().join("city").exists());
        assert!(temp.path().join(".keep").exists());
    }

    #[test]
    fn test_delete_folder_contents_rejects_missing_or_file() {
        let temp = TempDir::new().unwrap();
        assert!(delete_folder_contents(&temp.path().join("nope"), false, true).is_err());

        let file = temp.path().join("file.txt");
        fs::write(&file, b"x").unwrap();
        assert!(delete_folder_contents(&file, false, true).is_err());
    }
}

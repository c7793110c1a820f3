// file: src/exporter/calver.rs
// description: calendar versioned export directories (<country>/<region>/<city>/YY.MM[.micro])
// reference: https://calver.org/#scheme

use crate::error::{BnaError, Result};
use chrono::{Local, NaiveDate};
use std::fs;
use std::path::{Path, PathBuf};

pub fn calver_for(date: NaiveDate) -> String {
    date.format("%y.%m").to_string()
}

/// `base/country/region/city/YY.MM`, lowercased. The region falls back to the country.
pub fn calver_base(
    base_dir: &Path,
    country: &str,
    city: &str,
    region: Option<&str>,
    date_override: Option<&str>,
) -> PathBuf {
    let country = country.to_lowercase();
    let region = region
        .filter(|r| !r.is_empty())
        .map(str::to_lowercase)
        .unwrap_or_else(|| country.clone());
    let version = date_override
        .map(str::to_string)
        .unwrap_or_else(|| calver_for(Local::now().date_naive()));

    base_dir
        .join(country)
        .join(region)
        .join(city.to_lowercase())
        .join(version)
}

/// Next micro revision: `1` when only `YY.MM` exists, otherwise the highest micro plus one.
pub fn calver_revision(dirs: &[PathBuf]) -> u32 {
    dirs.iter()
        .filter_map(|dir| dir.file_name().and_then(|name| name.to_str()))
        .filter_map(|name| {
            let parts: Vec<&str> = name.split('.').collect();
            match parts.as_slice() {
                [_, _, micro] => micro.parse::<u32>().ok(),
                _ => None,
            }
        })
        .max()
        .map_or(1, |micro| micro + 1)
}

fn siblings_with_stem(base: &Path) -> Result<Vec<PathBuf>> {
    let (Some(parent), Some(stem)) = (base.parent(), base.file_name().and_then(|n| n.to_str()))
    else {
        return Err(BnaError::Validation(format!(
            "invalid calver directory {}",
            base.display()
        )));
    };
    if !parent.is_dir() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(parent).map_err(|e| BnaError::file(parent, e))?;
    Ok(entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| name.starts_with(stem))
        })
        .collect())
}

/// Picks the first free calver directory for the city and creates it.
pub fn create_calver_directories(
    base_dir: &Path,
    country: &str,
    city: &str,
    region: Option<&str>,
    date_override: Option<&str>,
) -> Result<PathBuf> {
    let base = calver_base(base_dir, country, city, region, date_override);
    let existing = siblings_with_stem(&base)?;

    let dir = if existing.is_empty() {
        base
    } else {
        let revision = calver_revision(&existing);
        PathBuf::from(format!("{}.{revision}", base.display()))
    };
    fs::create_dir_all(&dir).map_err(|e| BnaError::file(&dir, e))?;
    Ok(dir)
}

// file: src/utils/validation.rs
// description: input validation for paths, urls and identifiers handed to external tools
// reference: input validation patterns

use crate::error::{BnaError, Result};
use std::fs;
use std::path::Path;

pub struct Validator;

impl Validator {
    pub fn validate_file_path(path: &Path) -> Result<()> {
        let canonical = fs::canonicalize(path).map_err(|e| {
            BnaError::Validation(format!(
                "Cannot canonicalize path {}: {}",
                path.display(),
                e
            ))
        })?;

        if !canonical.is_file() {
            return Err(BnaError::Validation(format!(
                "Path is not a file: {}",
                canonical.display()
            )));
        }

        Ok(())
    }

    pub fn validate_directory(path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(BnaError::Validation(format!(
                "Directory does not exist: {}",
                path.display()
            )));
        }

        if !path.is_dir() {
            return Err(BnaError::Validation(format!(
                "Path is not a directory: {}",
                path.display()
            )));
        }

        Ok(())
    }

    pub fn validate_url(url: &str) -> Result<()> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(BnaError::Validation(format!(
                "Invalid URL format: {}",
                url
            )));
        }
        Ok(())
    }

    pub fn validate_state_abbreviation(abbrev: &str) -> Result<()> {
        if abbrev.len() != 2 || !abbrev.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(BnaError::Validation(format!(
                "a state abbreviation must be 2 letter long: {abbrev:?}"
            )));
        }
        Ok(())
    }

    /// Table and schema names are interpolated into SQL, so only plain identifiers pass.
    pub fn validate_sql_identifier(name: &str) -> Result<()> {
        let mut chars = name.chars();
        let valid_start = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(BnaError::Validation(format!(
                "Invalid SQL identifier: {name:?}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_validate_file_path() {
        let temp = TempDir::new().unwrap();
        let file_path = temp.path().join("population.shp");
        fs::write(&file_path, "test").unwrap();

        assert!(Validator::validate_file_path(&file_path).is_ok());
        assert!(Validator::validate_file_path(temp.path()).is_err());
        assert!(Validator::validate_file_path(Path::new("/nonexistent")).is_err());
    }

    #[test]
    fn test_validate_directory() {
        let temp = TempDir::new().unwrap();
        assert!(Validator::validate_directory(temp.path()).is_ok());
        assert!(Validator::validate_directory(Path::new("/nonexistent")).is_err());
    }

    #[test]
    fn test_validate_url() {
        assert!(Validator::validate_url("https://download.geofabrik.de").is_ok());
        assert!(Validator::validate_url("http://example.com").is_ok());
        assert!(Validator::validate_url("example.com").is_err());
        assert!(Validator::validate_url("ftp://example.com").is_err());
    }

    #[test]
    fn test_validate_state_abbreviation() {
        assert!(Validator::validate_state_abbreviation("nm").is_ok());
        assert!(Validator::validate_state_abbreviation("TX").is_ok());
        assert!(Validator::validate_state_abbreviation("tex").is_err());
        assert!(Validator::validate_state_abbreviation("4x").is_err());
    }

    #[test]
    fn test_validate_sql_identifier() {
        assert!(Validator::validate_sql_identifier("neighborhood_ways").is_ok());
        assert!(Validator::validate_sql_identifier("_scratch").is_ok());
        assert!(Validator::validate_sql_identifier("1table").is_err());
        assert!(Validator::validate_sql_identifier("ways; DROP TABLE x").is_err());
        assert!(Validator::validate_sql_identifier("").is_err());
    }
}

// file: src/error.rs
// description: Custom error types and result type aliases
// reference: https://docs.rs/thiserror

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BnaError>;

#[derive(Error, Debug)]
pub enum BnaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("File operation failed for {path}: {source}")]
    FileOperation {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download of {url} failed with status {status}")]
    Download { url: String, status: u16 },

    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Command `{program}` failed (exit code {code:?}): {output}")]
    Command {
        program: String,
        code: Option<i32>,
        output: String,
    },

    #[error("Unable to start `{program}`: {source}")]
    CommandSpawn {
        program: String,
        source: std::io::Error,
    },

    #[error("Geometry error: {0}")]
    Geometry(String),

    #[error("Checksum mismatch for {path}")]
    Checksum { path: PathBuf },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("SQL script not found: {path}")]
    MissingScript { path: PathBuf },

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BnaError {
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileOperation {
            path: path.into(),
            source,
        }
    }
}

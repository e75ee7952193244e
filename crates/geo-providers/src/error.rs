//! Error types for the provider crate.

use std::path::PathBuf;

use geo_cutout::CutoutError;
use thiserror::Error;

/// Errors that can occur while fetching provider data.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("Failed to parse GeoJSON: {0}")]
    GeoJson(#[from] geojson::Error),

    #[error("Failed to read table {path}: {reason}")]
    Table { path: PathBuf, reason: String },

    #[error("Failed to parse table row: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Registry(#[from] CutoutError),
}

impl ProviderError {
    pub fn table(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Table {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

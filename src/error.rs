use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Browser session error: {0}")]
    Session(String),

    #[error("Navigation to {url} timed out after {secs}s")]
    NavigationTimeout { url: String, secs: u64 },

    #[error("Feed script failed: {0}")]
    Script(String),

    #[error("Failed to read catalog {path}: {source}")]
    CatalogRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed catalog {path}: {source}")]
    CatalogParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write catalog {path}: {message}")]
    CatalogWrite { path: PathBuf, message: String },
}

impl From<chromiumoxide::error::CdpError> for SyncError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        SyncError::Session(err.to_string())
    }
}

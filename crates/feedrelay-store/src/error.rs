use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by the flat-file state helpers.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("run lock {path} unavailable: {source}")]
    Lock {
        path: PathBuf,
        source: std::io::Error,
    },
}

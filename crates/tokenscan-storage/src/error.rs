//! Storage errors.

use std::path::PathBuf;

use thiserror::Error;
use tokenscan_index::TokenScanError;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encode(#[from] bincode::Error),

    #[error("store file {} is corrupt: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("store file {} is open read-only", .path.display())]
    ReadOnly { path: PathBuf },
}

impl From<StorageError> for TokenScanError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Io(io) => TokenScanError::Io(io),
            other => TokenScanError::Map(other.to_string()),
        }
    }
}

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

/// Error type for file system operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FileSystemError {
    /// Error when encountering an IO issue
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error when path is invalid
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

/// Result type for file system operations
pub type FileSystemResult<T> = Result<T, FileSystemError>;

/// MarkerReader defines the port for reading small state marker files
#[async_trait]
pub trait MarkerReader: Send + Sync + 'static {
    /// Read the full content of a marker file
    ///
    /// # Returns
    /// `Ok(None)` when the file does not exist, the raw content otherwise
    async fn read_marker(&self, path: &Path) -> FileSystemResult<Option<String>>;
}

use std::{io::ErrorKind, path::Path};

use async_trait::async_trait;

use crate::ports::file_system::{FileSystemError, FileSystemResult, MarkerReader};

/// Marker reader backed by `tokio::fs`
#[derive(Debug, Default, Clone)]
pub struct FileSystemAdapter;

impl FileSystemAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MarkerReader for FileSystemAdapter {
    async fn read_marker(&self, path: &Path) -> FileSystemResult<Option<String>> {
        if path.as_os_str().is_empty() {
            return Err(FileSystemError::InvalidPath(
                "marker path is empty".to_string(),
            ));
        }

        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FileSystemError::IoError(e)),
        }
    }
}

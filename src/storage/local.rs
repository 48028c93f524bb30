//! Blob store backed by a local directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use uuid::Uuid;

use super::Storage;
use crate::error::StorageError;

/// One file per blob, named by its handle.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Open (creating if needed) a blob directory.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Handles are UUIDs; anything else could escape the root directory.
    fn path_for(&self, handle: &str) -> Result<PathBuf, StorageError> {
        let id = Uuid::parse_str(handle).map_err(|_| StorageError::InvalidHandle {
            handle: handle.to_string(),
        })?;
        Ok(self.root.join(id.to_string()))
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn store(&self, bytes: Vec<u8>) -> Result<String, StorageError> {
        let handle = Uuid::new_v4().to_string();
        tokio::fs::write(self.path_for(&handle)?, bytes).await?;
        Ok(handle)
    }

    async fn retrieve(&self, handle: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(handle)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound {
                handle: handle.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}

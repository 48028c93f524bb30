//! In-process blob store.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::Storage;
use crate::error::StorageError;

#[derive(Debug, Default)]
struct Blobs {
    by_handle: HashMap<String, Vec<u8>>,
    /// Handles in insertion order, oldest first.
    order: VecDeque<String>,
}

/// Blobs kept in a map. With a limit, the oldest blobs are evicted first.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    blobs: RwLock<Blobs>,
    max_blobs: Option<usize>,
}

impl MemoryStorage {
    /// Unbounded store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `max_blobs` blobs.
    pub fn bounded(max_blobs: usize) -> Self {
        Self {
            blobs: RwLock::default(),
            max_blobs: Some(max_blobs.max(1)),
        }
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.by_handle.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.by_handle.is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn store(&self, bytes: Vec<u8>) -> Result<String, StorageError> {
        let handle = Uuid::new_v4().to_string();
        let mut blobs = self.blobs.write().await;

        if let Some(max) = self.max_blobs {
            while blobs.order.len() >= max {
                let Some(oldest) = blobs.order.pop_front() else {
                    break;
                };
                blobs.by_handle.remove(&oldest);
                debug!(handle = %oldest, "Evicted blob from memory storage");
            }
        }

        blobs.order.push_back(handle.clone());
        blobs.by_handle.insert(handle.clone(), bytes);
        Ok(handle)
    }

    async fn retrieve(&self, handle: &str) -> Result<Vec<u8>, StorageError> {
        self.blobs
            .read()
            .await
            .by_handle
            .get(handle)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                handle: handle.to_string(),
            })
    }
}

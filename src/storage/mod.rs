//! Blob storage for task inputs and outputs.
//!
//! The executor treats storage as opaque: bytes in, handle out, and back.

pub mod local;
pub mod memory;

pub use local::LocalStorage;
pub use memory::MemoryStorage;

use async_trait::async_trait;

use crate::error::StorageError;

/// Durable blob storage.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store a blob and return its handle.
    async fn store(&self, bytes: Vec<u8>) -> Result<String, StorageError>;

    /// Fetch a blob by handle.
    async fn retrieve(&self, handle: &str) -> Result<Vec<u8>, StorageError>;
}

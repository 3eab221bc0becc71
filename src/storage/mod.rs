// Storage layer (S3-compatible)

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::StorageConfig;

pub mod memory;
pub mod s3_client;

pub use memory::MemoryStore;
pub use s3_client::S3Client;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("unsupported storage provider: {0}")]
    UnsupportedProvider(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> StorageResult<()>;

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>>;

    fn backend(&self) -> &'static str;
}

/// Build the object store named by `STORAGE_PROVIDER`.
pub fn connect(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    match config.provider.as_str() {
        "s3" => Ok(Arc::new(S3Client::new(config)?)),
        "memory" => Ok(Arc::new(MemoryStore::new())),
        other => Err(StorageError::UnsupportedProvider(other.to_string())),
    }
}

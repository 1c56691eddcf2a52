use std::collections::HashMap;
use std::io::Cursor;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::sync::RwLock;

use super::error::StorageError;
use super::id::BlobId;
use super::limit::LimitedReader;
use super::traits::{BlobStore, BoxReader};

/// Process-local blob store.
///
/// Nothing survives a restart; intended for tests and throwaway deployments.
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<BlobId, Vec<u8>>>,
    max_size: u64,
}

impl MemoryBlobStore {
    pub fn new(max_size: u64) -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            max_size,
        }
    }

    /// Number of stored blobs.
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn store(&self, reader: BoxReader) -> Result<BlobId, StorageError> {
        let mut reader = LimitedReader::new(reader, self.max_size);
        let mut data = Vec::new();
        if let Err(e) = reader.read_to_end(&mut data).await {
            return Err(reader.classify(e));
        }

        let id = BlobId::generate();
        self.blobs.write().await.insert(id, data);
        Ok(id)
    }

    async fn retrieve(&self, id: &BlobId) -> Result<BoxReader, StorageError> {
        let blobs = self.blobs.read().await;
        let data = blobs
            .get(id)
            .ok_or_else(|| StorageError::NotFound(id.to_hex()))?;
        Ok(Box::new(Cursor::new(data.clone())))
    }

    async fn copy(&self, id: &BlobId) -> Result<BlobId, StorageError> {
        let mut blobs = self.blobs.write().await;
        let data = blobs
            .get(id)
            .ok_or_else(|| StorageError::NotFound(id.to_hex()))?
            .clone();
        let new_id = BlobId::generate();
        blobs.insert(new_id, data);
        Ok(new_id)
    }

    async fn exists(&self, id: &BlobId) -> Result<bool, StorageError> {
        Ok(self.blobs.read().await.contains_key(id))
    }

    async fn delete(&self, id: &BlobId) -> Result<bool, StorageError> {
        Ok(self.blobs.write().await.remove(id).is_some())
    }

    async fn size(&self, id: &BlobId) -> Result<u64, StorageError> {
        self.blobs
            .read()
            .await
            .get(id)
            .map(|data| data.len() as u64)
            .ok_or_else(|| StorageError::NotFound(id.to_hex()))
    }

    async fn list(&self) -> Result<Vec<BlobId>, StorageError> {
        let mut ids: Vec<BlobId> = self.blobs.read().await.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}

use std::io::Cursor;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::error::StorageError;
use super::id::BlobId;

/// Type alias for a boxed async reader.
pub type BoxReader = Box<dyn AsyncRead + Unpin + Send>;

/// Opaque blob storage addressed by generated identifiers.
///
/// Implementations must never expose a partially written object: a failed or
/// abandoned `store` leaves nothing behind that `retrieve` or `list` can see.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes and return the new blob id.
    async fn put(&self, data: &[u8]) -> Result<BlobId, StorageError> {
        let reader: BoxReader = Box::new(Cursor::new(data.to_vec()));
        self.store(reader).await
    }

    /// Consume `reader` to completion and store its bytes under a new id.
    async fn store(&self, reader: BoxReader) -> Result<BlobId, StorageError>;

    /// Retrieve all bytes for a blob.
    async fn get(&self, id: &BlobId) -> Result<Vec<u8>, StorageError> {
        let mut reader = self.retrieve(id).await?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    /// Retrieve a blob as a single-pass streaming reader.
    async fn retrieve(&self, id: &BlobId) -> Result<BoxReader, StorageError>;

    /// Duplicate a blob under a new id.
    ///
    /// The default streams the source back into `store`; backends with a
    /// native copy override it.
    async fn copy(&self, id: &BlobId) -> Result<BlobId, StorageError> {
        let reader = self.retrieve(id).await?;
        self.store(reader).await
    }

    /// Check whether a blob exists.
    async fn exists(&self, id: &BlobId) -> Result<bool, StorageError>;

    /// Delete a blob.
    ///
    /// Returns `true` if the blob was deleted, `false` if it did not exist.
    async fn delete(&self, id: &BlobId) -> Result<bool, StorageError>;

    /// Get the size of a blob in bytes.
    async fn size(&self, id: &BlobId) -> Result<u64, StorageError>;

    /// Enumerate every stored blob id.
    async fn list(&self) -> Result<Vec<BlobId>, StorageError>;
}

mod error;
mod id;
mod limit;
mod traits;

pub mod chunked;
pub mod memory;
#[cfg(feature = "object-storage")]
pub mod s3;

use std::sync::Arc;

pub use error::StorageError;
pub use id::BlobId;
pub use limit::LimitedReader;
pub use traits::{BlobStore, BoxReader};

use crate::config::{StorageBackend, StorageConfig};

/// Construct the configured blob backend.
///
/// Called once at process start; the returned handle is shared by every
/// component that needs blob access.
pub async fn open_blob_store(config: &StorageConfig) -> Result<Arc<dyn BlobStore>, StorageError> {
    match config.backend {
        StorageBackend::Chunked => {
            let store = chunked::ChunkedBlobStore::new(
                &config.chunked.root,
                &config.chunked.bucket,
                config.chunked.chunk_size,
                config.max_blob_size,
            )
            .await?;
            tracing::info!(
                root = %config.chunked.root.display(),
                bucket = %config.chunked.bucket,
                "Using chunked blob store"
            );
            Ok(Arc::new(store))
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory blob store; content is lost on restart");
            Ok(Arc::new(memory::MemoryBlobStore::new(config.max_blob_size)))
        }
        StorageBackend::S3 => open_s3(config),
    }
}

#[cfg(feature = "object-storage")]
fn open_s3(config: &StorageConfig) -> Result<Arc<dyn BlobStore>, StorageError> {
    let s3_config = config
        .s3
        .as_ref()
        .ok_or_else(|| StorageError::Backend("storage.s3 section is required".into()))?;
    let store = s3::S3BlobStore::new(s3_config, config.max_blob_size)?;
    tracing::info!(bucket = %s3_config.bucket, endpoint = %s3_config.endpoint_url(), "Using S3 blob store");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "object-storage"))]
fn open_s3(_config: &StorageConfig) -> Result<Arc<dyn BlobStore>, StorageError> {
    Err(StorageError::Backend(
        "S3 backend requires the `object-storage` feature".into(),
    ))
}

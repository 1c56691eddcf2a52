use async_trait::async_trait;
use futures::TryStreamExt;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, BucketConfiguration, Region};
use tokio::sync::OnceCell;
use tokio_util::io::StreamReader;

use super::error::StorageError;
use super::id::BlobId;
use super::limit::LimitedReader;
use super::traits::{BlobStore, BoxReader};
use crate::config::S3StoreConfig;

/// S3-compatible object store.
///
/// Objects are keyed by `{key_prefix}{blob id hex}`. The bucket is created
/// the first time any operation touches it.
pub struct S3BlobStore {
    bucket: Box<Bucket>,
    region: Region,
    credentials: Credentials,
    key_prefix: String,
    max_size: u64,
    bucket_ready: OnceCell<()>,
}

impl S3BlobStore {
    pub fn new(config: &S3StoreConfig, max_size: u64) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: config.region.clone(),
            endpoint: config.endpoint_url(),
        };
        let credentials = Credentials::new(
            config.access_key.as_deref(),
            config.secret_key.as_deref(),
            None,
            None,
            None,
        )
        .map_err(|e| StorageError::Backend(format!("invalid S3 credentials: {e}")))?;

        let bucket =
            Bucket::new(&config.bucket, region.clone(), credentials.clone())?.with_path_style();

        Ok(Self {
            bucket,
            region,
            credentials,
            key_prefix: config.key_prefix.clone(),
            max_size,
            bucket_ready: OnceCell::new(),
        })
    }

    fn key(&self, id: &BlobId) -> String {
        format!("{}{}", self.key_prefix, id.to_hex())
    }

    async fn ensure_bucket(&self) -> Result<(), StorageError> {
        self.bucket_ready
            .get_or_try_init(|| async {
                if self.bucket.exists().await? {
                    return Ok(());
                }

                let name = self.bucket.name();
                tracing::info!(bucket = %name, "Creating missing S3 bucket");
                let response = Bucket::create_with_path_style(
                    &name,
                    self.region.clone(),
                    self.credentials.clone(),
                    BucketConfiguration::default(),
                )
                .await?;

                if !response.success() {
                    return Err(StorageError::Backend(format!(
                        "creating bucket {name} failed with status {}: {}",
                        response.response_code, response.response_text
                    )));
                }
                Ok::<(), StorageError>(())
            })
            .await?;
        Ok(())
    }

    /// HEAD the object; `None` when it does not exist.
    async fn head(&self, id: &BlobId) -> Result<Option<u64>, StorageError> {
        self.ensure_bucket().await?;
        match self.bucket.head_object(self.key(id)).await {
            Ok((head, status)) if is_success(status) => {
                Ok(Some(head.content_length.unwrap_or(0).max(0) as u64))
            }
            Ok((_, 404)) => Ok(None),
            Ok((_, status)) => Err(StorageError::Backend(format!(
                "HEAD {} returned status {status}",
                id.to_hex()
            ))),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove an object after a failed upload, logging instead of failing.
    async fn discard(&self, key: &str) {
        if let Err(e) = self.bucket.delete_object(key).await {
            tracing::warn!(key, "Failed to remove partially uploaded object: {e}");
        }
    }
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

fn is_not_found(err: &S3Error) -> bool {
    matches!(err, S3Error::HttpFailWithBody(404, _))
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn store(&self, reader: BoxReader) -> Result<BlobId, StorageError> {
        self.ensure_bucket().await?;

        let id = BlobId::generate();
        let key = self.key(&id);
        let mut reader = LimitedReader::new(reader, self.max_size);

        match self.bucket.put_object_stream(&mut reader, &key).await {
            Ok(response) if is_success(response.status_code()) => Ok(id),
            Ok(response) => {
                self.discard(&key).await;
                Err(StorageError::Backend(format!(
                    "upload of {key} returned status {}",
                    response.status_code()
                )))
            }
            Err(e) => {
                self.discard(&key).await;
                Err(reader.classify(e))
            }
        }
    }

    async fn retrieve(&self, id: &BlobId) -> Result<BoxReader, StorageError> {
        self.ensure_bucket().await?;

        let response = match self.bucket.get_object_stream(self.key(id)).await {
            Ok(response) => response,
            Err(e) if is_not_found(&e) => return Err(StorageError::NotFound(id.to_hex())),
            Err(e) => return Err(e.into()),
        };

        match response.status_code {
            status if is_success(status) => {}
            404 => return Err(StorageError::NotFound(id.to_hex())),
            status => {
                return Err(StorageError::Backend(format!(
                    "GET {} returned status {status}",
                    id.to_hex()
                )));
            }
        }

        let stream = response.bytes.map_err(std::io::Error::other);
        Ok(Box::new(StreamReader::new(stream)))
    }

    async fn copy(&self, id: &BlobId) -> Result<BlobId, StorageError> {
        self.ensure_bucket().await?;

        let new_id = BlobId::generate();
        let status = match self
            .bucket
            .copy_object_internal(self.key(id), self.key(&new_id))
            .await
        {
            Ok(status) => status,
            Err(e) if is_not_found(&e) => return Err(StorageError::NotFound(id.to_hex())),
            Err(e) => return Err(e.into()),
        };

        match status {
            status if is_success(status) => Ok(new_id),
            404 => Err(StorageError::NotFound(id.to_hex())),
            status => Err(StorageError::Backend(format!(
                "copy of {} returned status {status}",
                id.to_hex()
            ))),
        }
    }

    async fn exists(&self, id: &BlobId) -> Result<bool, StorageError> {
        Ok(self.head(id).await?.is_some())
    }

    async fn delete(&self, id: &BlobId) -> Result<bool, StorageError> {
        // S3 answers 204 for absent keys too, so probe first to report absence.
        if self.head(id).await?.is_none() {
            return Ok(false);
        }

        let response = self.bucket.delete_object(self.key(id)).await?;
        match response.status_code() {
            status if is_success(status) => Ok(true),
            404 => Ok(false),
            status => Err(StorageError::Backend(format!(
                "DELETE {} returned status {status}",
                id.to_hex()
            ))),
        }
    }

    async fn size(&self, id: &BlobId) -> Result<u64, StorageError> {
        self.head(id)
            .await?
            .ok_or_else(|| StorageError::NotFound(id.to_hex()))
    }

    async fn list(&self) -> Result<Vec<BlobId>, StorageError> {
        self.ensure_bucket().await?;

        let pages = self.bucket.list(self.key_prefix.clone(), None).await?;
        let mut ids: Vec<BlobId> = pages
            .into_iter()
            .flat_map(|page| page.contents)
            .filter_map(|object| {
                let hex = object.key.strip_prefix(&self.key_prefix)?;
                BlobId::from_hex(hex).ok()
            })
            .collect();
        ids.sort();
        Ok(ids)
    }
}

use std::path::PathBuf;

use serde::Deserialize;

use crate::storage::chunked::DEFAULT_CHUNK_SIZE;

/// Which blob backend to construct at startup.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Chunked files under a local bucket directory.
    #[default]
    Chunked,
    /// S3-compatible object storage (requires the `object-storage` feature).
    S3,
    /// Process-local, lost on restart.
    Memory,
}

/// Blob storage configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Largest blob accepted by any backend, in bytes. Default: 1 GiB.
    #[serde(default = "default_max_blob_size")]
    pub max_blob_size: u64,
    #[serde(default)]
    pub chunked: ChunkedStoreConfig,
    /// Required when `backend = "s3"`.
    #[serde(default)]
    pub s3: Option<S3StoreConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkedStoreConfig {
    /// Directory holding bucket directories. Default: "./data/blobs".
    #[serde(default = "default_chunked_root")]
    pub root: PathBuf,
    /// Bucket name. Default: "fs".
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Chunk size in bytes. Default: 255 KiB.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3StoreConfig {
    /// Target bucket, created on first use if missing.
    pub bucket: String,
    /// Default: "us-east-1".
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, Ceph, ...).
    /// Default: AWS endpoint for `region`.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    /// Prepended to every object key. Default: "".
    #[serde(default)]
    pub key_prefix: String,
}

fn default_max_blob_size() -> u64 {
    1024 * 1024 * 1024
}
fn default_chunked_root() -> PathBuf {
    PathBuf::from("./data/blobs")
}
fn default_bucket() -> String {
    "fs".into()
}
fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_region() -> String {
    "us-east-1".into()
}

impl Default for ChunkedStoreConfig {
    fn default() -> Self {
        Self {
            root: default_chunked_root(),
            bucket: default_bucket(),
            chunk_size: default_chunk_size(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            max_blob_size: default_max_blob_size(),
            chunked: ChunkedStoreConfig::default(),
            s3: None,
        }
    }
}

impl S3StoreConfig {
    /// Endpoint URL, falling back to the AWS regional endpoint.
    pub fn endpoint_url(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| format!("https://s3.{}.amazonaws.com", self.region))
    }
}

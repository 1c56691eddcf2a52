//! Persistence seam for users, directories, and file records.
//!
//! Tree and index logic only ever talk to [`MetadataStore`]; whether the
//! records live in PostgreSQL or in process memory is decided once at
//! startup.

mod memory;
mod sql;

use async_trait::async_trait;
use common::storage::BlobId;
use uuid::Uuid;

use crate::error::DriveError;
use crate::models::{DirectoryNode, FileRecord, User};

pub use memory::MemoryMetadataStore;
pub use sql::SqlMetadataStore;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Create a user together with its root directory.
    ///
    /// Fails with `BadRequest` when the username is taken.
    async fn create_user(&self, username: &str) -> Result<User, DriveError>;

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, DriveError>;

    async fn get_dir(&self, id: Uuid) -> Result<Option<DirectoryNode>, DriveError>;

    /// Directories whose parent is `parent_id`.
    async fn child_dirs(&self, parent_id: Uuid) -> Result<Vec<DirectoryNode>, DriveError>;

    async fn find_child_dir(
        &self,
        parent_id: Uuid,
        name: &str,
    ) -> Result<Option<DirectoryNode>, DriveError>;

    /// Persist a new directory and register it with its parent.
    async fn insert_dir(&self, node: &DirectoryNode) -> Result<(), DriveError>;

    /// Persist `name`, `parent_id`, and `updated_at`, re-registering the node
    /// with its new parent when `parent_id` changed.
    async fn update_dir(&self, node: &DirectoryNode) -> Result<(), DriveError>;

    /// Remove an empty directory and detach it from its parent.
    ///
    /// Returns `false` when it was already gone. Removing a directory that
    /// still holds children or files is an internal error.
    async fn remove_dir(&self, id: Uuid) -> Result<bool, DriveError>;

    async fn get_file(&self, id: Uuid) -> Result<Option<FileRecord>, DriveError>;

    /// Files whose parent is `parent_id`.
    async fn files_in(&self, parent_id: Uuid) -> Result<Vec<FileRecord>, DriveError>;

    async fn find_file(
        &self,
        parent_id: Uuid,
        name: &str,
    ) -> Result<Option<FileRecord>, DriveError>;

    /// Persist a new file record and register it with its directory.
    async fn insert_file(&self, file: &FileRecord) -> Result<(), DriveError>;

    /// Persist `name`, `parent_id`, and `updated_at` of a file record.
    async fn update_file(&self, file: &FileRecord) -> Result<(), DriveError>;

    /// Remove a file record. Returns `false` when it was already gone.
    async fn remove_file(&self, id: Uuid) -> Result<bool, DriveError>;

    /// Every blob id referenced by any file record.
    async fn referenced_blobs(&self) -> Result<Vec<BlobId>, DriveError>;

    /// Whether a directory or a file called `name` already sits in
    /// `parent_id`. Both kinds share one namespace per directory.
    async fn name_taken(&self, parent_id: Uuid, name: &str) -> Result<bool, DriveError> {
        if self.find_child_dir(parent_id, name).await?.is_some() {
            return Ok(true);
        }
        Ok(self.find_file(parent_id, name).await?.is_some())
    }
}

/// Open the metadata store named by `url`.
///
/// `memory` keeps everything in process; anything else is a PostgreSQL
/// connection string.
pub async fn open_metadata_store(
    url: &str,
) -> Result<std::sync::Arc<dyn MetadataStore>, DriveError> {
    if url == "memory" {
        tracing::warn!("Using the in-memory metadata store; nothing will be persisted");
        return Ok(std::sync::Arc::new(MemoryMetadataStore::new()));
    }

    let db = crate::database::init_db(url).await?;
    Ok(std::sync::Arc::new(SqlMetadataStore::new(db)))
}

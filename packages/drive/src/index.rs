use std::sync::Arc;

use chrono::Utc;
use common::storage::{BlobId, BlobStore};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::DriveError;
use crate::models::{DirectoryNode, FileRecord};
use crate::repo::MetadataStore;
use crate::utils::path::validate_name;

/// What happened to a file's blob after its record was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobCleanup {
    Deleted,
    /// The blob was already gone.
    Missing,
    /// The blob delete failed; the blob is left for the reconcile sweep.
    Orphaned,
}

/// Binds file names inside directories to blobs.
///
/// Callers hold the owner's [`crate::lock::UserLocks`] guard across every
/// mutating call.
#[derive(Clone)]
pub struct FileIndex {
    metadata: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
}

impl FileIndex {
    pub fn new(metadata: Arc<dyn MetadataStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { metadata, blobs }
    }

    async fn ensure_free(&self, parent_id: Uuid, name: &str) -> Result<(), DriveError> {
        if self.metadata.name_taken(parent_id, name).await? {
            return Err(DriveError::BadRequest(format!(
                "An entry named '{name}' already exists in this directory"
            )));
        }
        Ok(())
    }

    /// Record an already stored blob as `name` inside `parent`.
    pub async fn attach(
        &self,
        parent: &DirectoryNode,
        name: &str,
        blob_id: BlobId,
        size: u64,
        content_type: &str,
    ) -> Result<FileRecord, DriveError> {
        validate_name(name)?;
        self.ensure_free(parent.id, name).await?;

        let now = Utc::now();
        let file = FileRecord {
            id: Uuid::now_v7(),
            name: name.to_string(),
            owner_id: parent.owner_id,
            parent_id: parent.id,
            blob_id,
            size,
            content_type: content_type.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.metadata.insert_file(&file).await?;

        info!(file_id = %file.id, blob_id = %blob_id, "Attached file {}", name);
        Ok(file)
    }

    pub async fn rename(&self, file: &FileRecord, new_name: &str) -> Result<FileRecord, DriveError> {
        validate_name(new_name)?;
        if file.name == new_name {
            return Ok(file.clone());
        }
        self.ensure_free(file.parent_id, new_name).await?;

        let mut renamed = file.clone();
        renamed.name = new_name.to_string();
        renamed.updated_at = Utc::now();
        self.metadata.update_file(&renamed).await?;
        Ok(renamed)
    }

    /// Reparent `file` under `dest_parent`, keeping its name.
    pub async fn move_file(
        &self,
        file: &FileRecord,
        dest_parent: &DirectoryNode,
    ) -> Result<FileRecord, DriveError> {
        self.relocate(file, dest_parent, &file.name).await
    }

    /// Place `file` at `name` inside `dest_parent`.
    ///
    /// Staying in the same directory is a plain rename.
    pub async fn relocate(
        &self,
        file: &FileRecord,
        dest_parent: &DirectoryNode,
        name: &str,
    ) -> Result<FileRecord, DriveError> {
        if dest_parent.id == file.parent_id {
            return self.rename(file, name).await;
        }
        if dest_parent.owner_id != file.owner_id {
            return Err(DriveError::BadRequest(
                "Files cannot be moved between users".into(),
            ));
        }

        validate_name(name)?;
        self.ensure_free(dest_parent.id, name).await?;

        let mut moved = file.clone();
        moved.name = name.to_string();
        moved.parent_id = dest_parent.id;
        moved.updated_at = Utc::now();
        self.metadata.update_file(&moved).await?;
        Ok(moved)
    }

    /// Remove the record, then its blob.
    ///
    /// A failed metadata removal aborts before the blob is touched. A failed
    /// blob removal leaves an unreferenced blob, which the reconcile sweep
    /// collects; the file is gone either way.
    pub async fn detach_and_delete_blob(&self, file: &FileRecord) -> Result<BlobCleanup, DriveError> {
        self.metadata.remove_file(file.id).await?;

        match self.blobs.delete(&file.blob_id).await {
            Ok(true) => Ok(BlobCleanup::Deleted),
            Ok(false) => {
                warn!(file_id = %file.id, blob_id = %file.blob_id, "Blob of removed file was already gone");
                Ok(BlobCleanup::Missing)
            }
            Err(e) => {
                warn!(
                    file_id = %file.id,
                    blob_id = %file.blob_id,
                    "Blob delete failed, leaving orphan for reconciliation: {e}"
                );
                Ok(BlobCleanup::Orphaned)
            }
        }
    }
}

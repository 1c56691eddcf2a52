use chrono::{DateTime, Utc};
use common::storage::{BlobId, BoxReader};
use serde::Serialize;
use uuid::Uuid;

use super::records::{DirectoryNode, FileRecord, User};

/// Owner summary embedded in a listing.
#[derive(Debug, Clone, Serialize)]
pub struct OwnerInfo {
    pub id: Uuid,
    pub name: String,
}

/// Child directory entry in a listing.
#[derive(Debug, Clone, Serialize)]
pub struct DirEntry {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// File entry in a listing.
#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub id: Uuid,
    pub name: String,
    pub size: u64,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Contents of one directory.
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryListing {
    pub id: Uuid,
    pub name: String,
    pub owner: OwnerInfo,
    pub dirs: Vec<DirEntry>,
    pub files: Vec<FileEntry>,
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedFile {
    pub file_id: Uuid,
    pub blob_id: BlobId,
    pub size: u64,
}

/// A file being streamed back to the caller.
pub struct Download {
    pub reader: BoxReader,
    pub filename: String,
    pub content_type: String,
    pub size: u64,
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl From<&DirectoryNode> for DirEntry {
    fn from(node: &DirectoryNode) -> Self {
        Self {
            id: node.id,
            name: node.name.clone(),
            created_at: node.created_at,
            updated_at: node.updated_at,
        }
    }
}

impl From<&FileRecord> for FileEntry {
    fn from(file: &FileRecord) -> Self {
        Self {
            id: file.id,
            name: file.name.clone(),
            size: file.size,
            content_type: file.content_type.clone(),
            created_at: file.created_at,
            updated_at: file.updated_at,
        }
    }
}

impl From<&User> for OwnerInfo {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.username.clone(),
        }
    }
}

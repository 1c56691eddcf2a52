use chrono::{DateTime, Utc};
use common::storage::BlobId;
use serde::Serialize;
use uuid::Uuid;

/// An account owning exactly one directory tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    /// The user's root directory (empty name, no parent).
    pub root_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// One directory in a user's tree.
///
/// `child_ids` and `file_ids` mirror the `parent_id` of the referenced
/// records; the metadata store keeps both sides in step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryNode {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    /// `None` only for the root.
    pub parent_id: Option<Uuid>,
    pub child_ids: Vec<Uuid>,
    pub file_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DirectoryNode {
    /// A fresh root for `owner_id`.
    pub fn new_root(owner_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            name: String::new(),
            owner_id,
            parent_id: None,
            child_ids: Vec::new(),
            file_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// A fresh, empty directory named `name` under `parent`.
    pub fn new_child(parent: &DirectoryNode, name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            name: name.to_string(),
            owner_id: parent.owner_id,
            parent_id: Some(parent.id),
            child_ids: Vec::new(),
            file_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Metadata binding a file name in a directory to its blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    pub parent_id: Uuid,
    pub blob_id: BlobId,
    pub size: u64,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

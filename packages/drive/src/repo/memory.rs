use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use common::storage::BlobId;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::MetadataStore;
use crate::error::DriveError;
use crate::models::{DirectoryNode, FileRecord, User};

#[derive(Default)]
struct Arena {
    users: HashMap<Uuid, User>,
    usernames: HashMap<String, Uuid>,
    dirs: HashMap<Uuid, DirectoryNode>,
    files: HashMap<Uuid, FileRecord>,
}

impl Arena {
    fn dir_mut(&mut self, id: Uuid) -> Result<&mut DirectoryNode, DriveError> {
        self.dirs
            .get_mut(&id)
            .ok_or_else(|| DriveError::NotFound(format!("Directory {id} does not exist")))
    }
}

/// Arena-backed metadata store.
///
/// Records live in id-keyed maps; each directory carries explicit child and
/// file id lists that are updated in the same critical section as the
/// referenced record's `parent_id`.
#[derive(Default)]
pub struct MemoryMetadataStore {
    arena: RwLock<Arena>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check every structural invariant of the stored trees.
    ///
    /// Returns a description of the first violation found.
    pub async fn verify_integrity(&self) -> Result<(), String> {
        let arena = self.arena.read().await;

        for (id, node) in &arena.dirs {
            match node.parent_id {
                None => {
                    let owner = arena
                        .users
                        .get(&node.owner_id)
                        .ok_or_else(|| format!("root {id} has no owner"))?;
                    if owner.root_id != *id {
                        return Err(format!("user {} has a second root {id}", owner.id));
                    }
                }
                Some(parent_id) => {
                    let parent = arena
                        .dirs
                        .get(&parent_id)
                        .ok_or_else(|| format!("directory {id} has missing parent {parent_id}"))?;
                    if !parent.child_ids.contains(id) {
                        return Err(format!("parent {parent_id} does not list child {id}"));
                    }
                }
            }

            for child_id in &node.child_ids {
                let child = arena
                    .dirs
                    .get(child_id)
                    .ok_or_else(|| format!("directory {id} lists missing child {child_id}"))?;
                if child.parent_id != Some(*id) {
                    return Err(format!("child {child_id} does not point back at {id}"));
                }
            }

            for file_id in &node.file_ids {
                let file = arena
                    .files
                    .get(file_id)
                    .ok_or_else(|| format!("directory {id} lists missing file {file_id}"))?;
                if file.parent_id != *id {
                    return Err(format!("file {file_id} does not point back at {id}"));
                }
            }

            let mut names: Vec<&str> = node
                .child_ids
                .iter()
                .filter_map(|c| arena.dirs.get(c).map(|d| d.name.as_str()))
                .chain(
                    node.file_ids
                        .iter()
                        .filter_map(|f| arena.files.get(f).map(|r| r.name.as_str())),
                )
                .collect();
            let total = names.len();
            names.sort_unstable();
            names.dedup();
            if names.len() != total {
                return Err(format!("directory {id} has duplicate entry names"));
            }

            // Walking up must reach a root within the number of nodes.
            let mut cursor = node.parent_id;
            let mut steps = 0;
            while let Some(parent_id) = cursor {
                steps += 1;
                if steps > arena.dirs.len() {
                    return Err(format!("cycle above directory {id}"));
                }
                cursor = arena.dirs.get(&parent_id).and_then(|p| p.parent_id);
            }
        }

        for (id, file) in &arena.files {
            let parent = arena
                .dirs
                .get(&file.parent_id)
                .ok_or_else(|| format!("file {id} has missing parent"))?;
            if !parent.file_ids.contains(id) {
                return Err(format!("parent does not list file {id}"));
            }
        }

        Ok(())
    }

    pub async fn dir_count(&self) -> usize {
        self.arena.read().await.dirs.len()
    }

    pub async fn file_count(&self) -> usize {
        self.arena.read().await.files.len()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn create_user(&self, username: &str) -> Result<User, DriveError> {
        let mut arena = self.arena.write().await;
        if arena.usernames.contains_key(username) {
            return Err(DriveError::BadRequest(format!(
                "Username '{username}' is already taken"
            )));
        }

        let user_id = Uuid::now_v7();
        let root = DirectoryNode::new_root(user_id);
        let user = User {
            id: user_id,
            username: username.to_string(),
            root_id: root.id,
            created_at: Utc::now(),
        };

        arena.usernames.insert(username.to_string(), user_id);
        arena.users.insert(user_id, user.clone());
        arena.dirs.insert(root.id, root);
        Ok(user)
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, DriveError> {
        Ok(self.arena.read().await.users.get(&id).cloned())
    }

    async fn get_dir(&self, id: Uuid) -> Result<Option<DirectoryNode>, DriveError> {
        Ok(self.arena.read().await.dirs.get(&id).cloned())
    }

    async fn child_dirs(&self, parent_id: Uuid) -> Result<Vec<DirectoryNode>, DriveError> {
        let arena = self.arena.read().await;
        let Some(parent) = arena.dirs.get(&parent_id) else {
            return Ok(Vec::new());
        };
        let mut children: Vec<DirectoryNode> = parent
            .child_ids
            .iter()
            .filter_map(|id| arena.dirs.get(id).cloned())
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(children)
    }

    async fn find_child_dir(
        &self,
        parent_id: Uuid,
        name: &str,
    ) -> Result<Option<DirectoryNode>, DriveError> {
        let arena = self.arena.read().await;
        let Some(parent) = arena.dirs.get(&parent_id) else {
            return Ok(None);
        };
        Ok(parent
            .child_ids
            .iter()
            .filter_map(|id| arena.dirs.get(id))
            .find(|child| child.name == name)
            .cloned())
    }

    async fn insert_dir(&self, node: &DirectoryNode) -> Result<(), DriveError> {
        let parent_id = node
            .parent_id
            .ok_or_else(|| DriveError::Internal("roots are created with their user".into()))?;

        let mut arena = self.arena.write().await;
        if arena.dirs.contains_key(&node.id) {
            return Err(DriveError::Internal(format!(
                "directory {} already stored",
                node.id
            )));
        }

        arena.dir_mut(parent_id)?.child_ids.push(node.id);
        let mut stored = node.clone();
        stored.child_ids.clear();
        stored.file_ids.clear();
        arena.dirs.insert(node.id, stored);
        Ok(())
    }

    async fn update_dir(&self, node: &DirectoryNode) -> Result<(), DriveError> {
        let mut arena = self.arena.write().await;
        let old_parent = arena.dir_mut(node.id)?.parent_id;

        if old_parent != node.parent_id {
            let (Some(old_parent), Some(new_parent)) = (old_parent, node.parent_id) else {
                return Err(DriveError::Internal(
                    "the root cannot gain or lose a parent".into(),
                ));
            };
            arena.dir_mut(new_parent)?.child_ids.push(node.id);
            if let Ok(old) = arena.dir_mut(old_parent) {
                old.child_ids.retain(|id| *id != node.id);
            }
        }

        let stored = arena.dir_mut(node.id)?;
        stored.name = node.name.clone();
        stored.parent_id = node.parent_id;
        stored.updated_at = node.updated_at;
        Ok(())
    }

    async fn remove_dir(&self, id: Uuid) -> Result<bool, DriveError> {
        let mut arena = self.arena.write().await;
        let Some(node) = arena.dirs.get(&id) else {
            return Ok(false);
        };

        if !node.child_ids.is_empty() || !node.file_ids.is_empty() {
            return Err(DriveError::Internal(format!(
                "directory {id} still has entries"
            )));
        }
        let parent_id = node.parent_id;

        arena.dirs.remove(&id);
        if let Some(parent_id) = parent_id
            && let Ok(parent) = arena.dir_mut(parent_id)
        {
            parent.child_ids.retain(|child| *child != id);
        }
        Ok(true)
    }

    async fn get_file(&self, id: Uuid) -> Result<Option<FileRecord>, DriveError> {
        Ok(self.arena.read().await.files.get(&id).cloned())
    }

    async fn files_in(&self, parent_id: Uuid) -> Result<Vec<FileRecord>, DriveError> {
        let arena = self.arena.read().await;
        let Some(parent) = arena.dirs.get(&parent_id) else {
            return Ok(Vec::new());
        };
        let mut files: Vec<FileRecord> = parent
            .file_ids
            .iter()
            .filter_map(|id| arena.files.get(id).cloned())
            .collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    async fn find_file(
        &self,
        parent_id: Uuid,
        name: &str,
    ) -> Result<Option<FileRecord>, DriveError> {
        let arena = self.arena.read().await;
        let Some(parent) = arena.dirs.get(&parent_id) else {
            return Ok(None);
        };
        Ok(parent
            .file_ids
            .iter()
            .filter_map(|id| arena.files.get(id))
            .find(|file| file.name == name)
            .cloned())
    }

    async fn insert_file(&self, file: &FileRecord) -> Result<(), DriveError> {
        let mut arena = self.arena.write().await;
        if arena.files.contains_key(&file.id) {
            return Err(DriveError::Internal(format!(
                "file {} already stored",
                file.id
            )));
        }

        arena.dir_mut(file.parent_id)?.file_ids.push(file.id);
        arena.files.insert(file.id, file.clone());
        Ok(())
    }

    async fn update_file(&self, file: &FileRecord) -> Result<(), DriveError> {
        let mut arena = self.arena.write().await;
        let old_parent = arena
            .files
            .get(&file.id)
            .map(|stored| stored.parent_id)
            .ok_or_else(|| DriveError::NotFound(format!("File {} does not exist", file.id)))?;

        if old_parent != file.parent_id {
            arena.dir_mut(file.parent_id)?.file_ids.push(file.id);
            if let Ok(old) = arena.dir_mut(old_parent) {
                old.file_ids.retain(|id| *id != file.id);
            }
        }

        if let Some(stored) = arena.files.get_mut(&file.id) {
            stored.name = file.name.clone();
            stored.parent_id = file.parent_id;
            stored.updated_at = file.updated_at;
        }
        Ok(())
    }

    async fn remove_file(&self, id: Uuid) -> Result<bool, DriveError> {
        let mut arena = self.arena.write().await;
        let Some(file) = arena.files.remove(&id) else {
            return Ok(false);
        };

        if let Ok(parent) = arena.dir_mut(file.parent_id) {
            parent.file_ids.retain(|f| *f != id);
        }
        Ok(true)
    }

    async fn referenced_blobs(&self) -> Result<Vec<BlobId>, DriveError> {
        Ok(self
            .arena
            .read()
            .await
            .files
            .values()
            .map(|file| file.blob_id)
            .collect())
    }
}

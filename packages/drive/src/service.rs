//! Path-addressed file system operations for authenticated users.
//!
//! Every operation takes the caller's user id and absolute paths inside that
//! user's tree. Mutations hold the user's lock while they read and write
//! metadata; blob bytes are streamed outside the lock where the operation
//! allows it.

use std::collections::VecDeque;
use std::sync::Arc;

use common::storage::{BlobId, BlobStore, BoxReader, LimitedReader, StorageError};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::DriveConfig;
use crate::error::DriveError;
use crate::index::{BlobCleanup, FileIndex};
use crate::lock::UserLocks;
use crate::models::{
    DirEntry, DirectoryListing, DirectoryNode, Download, FileEntry, FileRecord, OwnerInfo,
    UploadedFile, User,
};
use crate::repo::MetadataStore;
use crate::tree::{DeleteReport, PathTree};
use crate::utils::path::{DrivePath, validate_name};

/// A stored blob that no file record references yet.
///
/// Dropped while still pending (the request future was cancelled), it
/// deletes the blob on a background task.
struct PendingBlob {
    blobs: Arc<dyn BlobStore>,
    id: BlobId,
    armed: bool,
}

impl PendingBlob {
    fn new(blobs: Arc<dyn BlobStore>, id: BlobId) -> Self {
        Self {
            blobs,
            id,
            armed: true,
        }
    }

    /// A record now references the blob.
    fn commit(mut self) {
        self.armed = false;
    }

    /// Delete the blob after a failed attach.
    async fn discard(mut self) {
        self.armed = false;
        match self.blobs.delete(&self.id).await {
            Ok(_) => debug!(blob_id = %self.id, "Removed unattached blob"),
            Err(e) => warn!(
                blob_id = %self.id,
                "Failed to remove unattached blob, leaving it for reconciliation: {e}"
            ),
        }
    }
}

impl Drop for PendingBlob {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let blobs = self.blobs.clone();
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match blobs.delete(&id).await {
                        Ok(_) => debug!(blob_id = %id, "Removed blob of abandoned request"),
                        Err(e) => warn!(
                            blob_id = %id,
                            "Failed to remove blob of abandoned request, leaving it for reconciliation: {e}"
                        ),
                    }
                });
            }
            Err(_) => warn!(
                blob_id = %id,
                "No runtime to remove blob of abandoned request, leaving it for reconciliation"
            ),
        }
    }
}

/// One directory of a planned copy. `parent` indexes an earlier entry.
struct CopyDir {
    parent: Option<usize>,
    name: String,
    files: Vec<CopiedFile>,
}

struct CopiedFile {
    name: String,
    blob_id: BlobId,
    size: u64,
    content_type: String,
}

/// A directory copy being written under the user's lock.
///
/// Dropped before [`PartialCopy::finish`], it removes the partial copy and
/// its blobs on a background task that keeps holding the lock.
struct PartialCopy {
    tree: PathTree,
    guard: Option<OwnedMutexGuard<()>>,
    top: Option<DirectoryNode>,
    blobs: Vec<PendingBlob>,
}

impl PartialCopy {
    fn new(tree: PathTree, guard: OwnedMutexGuard<()>, blobs: Vec<PendingBlob>) -> Self {
        Self {
            tree,
            guard: Some(guard),
            top: None,
            blobs,
        }
    }

    fn track(&mut self, top: DirectoryNode) {
        self.top = Some(top);
    }

    fn finish(mut self) {
        self.top = None;
        for blob in self.blobs.drain(..) {
            blob.commit();
        }
    }

    async fn rollback(mut self) {
        let top = self.top.take();
        let blobs = std::mem::take(&mut self.blobs);
        undo_copy(&self.tree, top, blobs).await;
    }
}

impl Drop for PartialCopy {
    fn drop(&mut self) {
        if self.top.is_none() && self.blobs.is_empty() {
            return;
        }

        let tree = self.tree.clone();
        let top = self.top.take();
        let blobs = std::mem::take(&mut self.blobs);
        let guard = self.guard.take();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _guard = guard;
                    undo_copy(&tree, top, blobs).await;
                });
            }
            Err(_) => warn!("No runtime to remove abandoned directory copy"),
        }
    }
}

/// Records before blobs, so no listed file points at a deleted blob.
async fn undo_copy(tree: &PathTree, top: Option<DirectoryNode>, blobs: Vec<PendingBlob>) {
    if let Some(top) = top {
        if let Err(e) = tree.delete(&top).await {
            error!(dir_id = %top.id, "Failed to remove partial copy: {e}");
        }
    }
    for blob in blobs {
        blob.discard().await;
    }
}

fn guess_content_type(name: &str, given: Option<&str>) -> String {
    match given.map(str::trim).filter(|s| !s.is_empty()) {
        Some(content_type) => content_type.to_string(),
        None => mime_guess::from_path(name)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    }
}

fn file_parts(path: &DrivePath) -> Result<(DrivePath, &str), DriveError> {
    path.split_last()
        .ok_or_else(|| DriveError::BadRequest("Path must name a file, not the root".into()))
}

pub struct FileSystemService {
    metadata: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    tree: PathTree,
    files: FileIndex,
    locks: UserLocks,
    config: DriveConfig,
}

impl FileSystemService {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        config: DriveConfig,
    ) -> Self {
        let files = FileIndex::new(metadata.clone(), blobs.clone());
        let tree = PathTree::new(metadata.clone(), files.clone());
        Self {
            metadata,
            blobs,
            tree,
            files,
            locks: UserLocks::new(),
            config,
        }
    }

    /// Drop lock entries of users with no operation in flight.
    pub fn prune_locks(&self) {
        self.locks.prune();
    }

    #[instrument(skip(self))]
    pub async fn register_user(&self, username: &str) -> Result<User, DriveError> {
        validate_name(username)?;
        let user = self.metadata.create_user(username).await?;
        info!(user_id = %user.id, "Registered user {}", username);
        Ok(user)
    }

    async fn locate_file(
        &self,
        root: &DirectoryNode,
        path: &DrivePath,
    ) -> Result<(DirectoryNode, FileRecord), DriveError> {
        let (dir_path, name) = file_parts(path)?;
        let dir = self.tree.resolve(root, &dir_path).await?;
        let file = self
            .metadata
            .find_file(dir.id, name)
            .await?
            .ok_or_else(|| DriveError::NotFound(format!("File does not exist: {path}")))?;
        Ok((dir, file))
    }

    /// Run `attach` with a freshly stored blob, deleting the blob if the
    /// attach fails or never finishes.
    async fn attach_pending<F>(&self, blob_id: BlobId, attach: F) -> Result<FileRecord, DriveError>
    where
        F: Future<Output = Result<FileRecord, DriveError>>,
    {
        let pending = PendingBlob::new(self.blobs.clone(), blob_id);
        match attach.await {
            Ok(file) => {
                pending.commit();
                Ok(file)
            }
            Err(e) => {
                pending.discard().await;
                Err(e)
            }
        }
    }

    // ---- directories ----

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn list_directory(
        &self,
        user_id: Uuid,
        path: &str,
    ) -> Result<DirectoryListing, DriveError> {
        let path = DrivePath::parse(path)?;
        let root = self.tree.root_of(user_id).await?;
        let node = self.tree.resolve(&root, &path).await?;

        let owner = self
            .metadata
            .find_user(node.owner_id)
            .await?
            .ok_or_else(|| DriveError::Internal(format!("owner of {} is missing", node.id)))?;
        let dirs = self.metadata.child_dirs(node.id).await?;
        let files = self.metadata.files_in(node.id).await?;

        Ok(DirectoryListing {
            id: node.id,
            name: node.name,
            owner: OwnerInfo::from(&owner),
            dirs: dirs.iter().map(DirEntry::from).collect(),
            files: files.iter().map(FileEntry::from).collect(),
        })
    }

    /// Create `path` and any missing parents. Returns the created names.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn create_directory(
        &self,
        user_id: Uuid,
        path: &str,
    ) -> Result<Vec<String>, DriveError> {
        let path = DrivePath::parse(path)?;
        let _guard = self.locks.lock(user_id).await;

        let root = self.tree.root_of(user_id).await?;
        let created = self.tree.create(&root, &path).await?;
        info!("Created directory {}", path);
        Ok(created)
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn rename_directory(
        &self,
        user_id: Uuid,
        path: &str,
        new_name: &str,
    ) -> Result<DirectoryNode, DriveError> {
        let path = DrivePath::parse(path)?;
        let _guard = self.locks.lock(user_id).await;

        let root = self.tree.root_of(user_id).await?;
        let node = self.tree.resolve(&root, &path).await?;
        self.tree.rename(&node, new_name).await
    }

    /// Move the directory at `src` so that it lives at `dest`.
    ///
    /// When both paths share a parent this is a rename to the final segment
    /// of `dest`.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn move_directory(
        &self,
        user_id: Uuid,
        src: &str,
        dest: &str,
    ) -> Result<DirectoryNode, DriveError> {
        let src = DrivePath::parse(src)?;
        let dest = DrivePath::parse(dest)?;
        let (src_parent, _) = src
            .split_last()
            .ok_or_else(|| DriveError::BadRequest("The root directory cannot be moved".into()))?;
        let (dest_parent, dest_name) = dest
            .split_last()
            .ok_or_else(|| DriveError::BadRequest("Destination cannot be the root".into()))?;

        let _guard = self.locks.lock(user_id).await;
        let root = self.tree.root_of(user_id).await?;
        let node = self.tree.resolve(&root, &src).await?;

        if src_parent == dest_parent {
            return self.tree.rename(&node, dest_name).await;
        }
        if dest.starts_with(&src) {
            return Err(DriveError::BadRequest(
                "A directory cannot be moved into itself or its own subdirectory".into(),
            ));
        }
        let target = self.tree.resolve(&root, &dest_parent).await?;
        let moved = self.tree.relocate(&node, &target, dest_name).await?;
        info!("Moved directory {} to {}", src, dest);
        Ok(moved)
    }

    /// Deep-copy the directory at `src` to the new path `dest`.
    ///
    /// Every file in the copy gets its own blob. Blobs are copied before the
    /// user's lock is taken; the lock only covers writing the new nodes and
    /// records. If any step fails, or the future is dropped, the partial copy
    /// is removed again.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn copy_directory(
        &self,
        user_id: Uuid,
        src: &str,
        dest: &str,
    ) -> Result<DirectoryNode, DriveError> {
        let src = DrivePath::parse(src)?;
        let dest = DrivePath::parse(dest)?;
        let (dest_parent, dest_name) = dest
            .split_last()
            .ok_or_else(|| DriveError::BadRequest("Destination cannot be the root".into()))?;

        let root = self.tree.root_of(user_id).await?;
        let node = self.tree.resolve(&root, &src).await?;
        let target = self.tree.resolve(&root, &dest_parent).await?;
        self.check_copy_target(&target, &node, dest_name).await?;

        let mut pending = Vec::new();
        let plan = match self.copy_blobs(&node, &mut pending).await {
            Ok(plan) => plan,
            Err(e) => {
                for blob in pending {
                    blob.discard().await;
                }
                return Err(e);
            }
        };

        let guard = self.locks.lock(user_id).await;
        let mut partial = PartialCopy::new(self.tree.clone(), guard, pending);
        let written = async {
            let target = self.tree.resolve(&root, &dest_parent).await?;
            self.check_copy_target(&target, &node, dest_name).await?;
            self.write_copy(&target, dest_name, &plan, &mut partial).await
        }
        .await;

        match written {
            Ok(copy) => {
                partial.finish();
                info!("Copied directory {} to {}", src, dest);
                Ok(copy)
            }
            Err(e) => {
                partial.rollback().await;
                Err(e)
            }
        }
    }

    async fn check_copy_target(
        &self,
        target: &DirectoryNode,
        node: &DirectoryNode,
        name: &str,
    ) -> Result<(), DriveError> {
        if self.tree.is_within(target, node.id).await? {
            return Err(DriveError::BadRequest(
                "A directory cannot be copied into itself or its own subdirectory".into(),
            ));
        }
        if self.metadata.name_taken(target.id, name).await? {
            return Err(DriveError::BadRequest(format!(
                "An entry named '{name}' already exists in this directory"
            )));
        }
        Ok(())
    }

    /// Copy every blob under `src`, breadth first.
    ///
    /// The first entry of the plan is the copy's top directory. Each blob is
    /// pushed onto `pending` as soon as it exists.
    async fn copy_blobs(
        &self,
        src: &DirectoryNode,
        pending: &mut Vec<PendingBlob>,
    ) -> Result<Vec<CopyDir>, DriveError> {
        let mut plan = vec![CopyDir {
            parent: None,
            name: String::new(),
            files: Vec::new(),
        }];
        let mut queue = VecDeque::from([(src.id, 0)]);

        while let Some((src_id, index)) = queue.pop_front() {
            for file in self.metadata.files_in(src_id).await? {
                let blob_id = self.blobs.copy(&file.blob_id).await?;
                pending.push(PendingBlob::new(self.blobs.clone(), blob_id));
                plan[index].files.push(CopiedFile {
                    name: file.name,
                    blob_id,
                    size: file.size,
                    content_type: file.content_type,
                });
            }
            for child in self.metadata.child_dirs(src_id).await? {
                queue.push_back((child.id, plan.len()));
                plan.push(CopyDir {
                    parent: Some(index),
                    name: child.name,
                    files: Vec::new(),
                });
            }
        }
        debug!(dirs = plan.len(), blobs = pending.len(), "Copied directory blobs");
        Ok(plan)
    }

    async fn write_copy(
        &self,
        target: &DirectoryNode,
        name: &str,
        plan: &[CopyDir],
        partial: &mut PartialCopy,
    ) -> Result<DirectoryNode, DriveError> {
        let top = self.tree.add_child(target, name).await?;
        partial.track(top.clone());

        let mut created = vec![top.clone()];
        for (index, dir) in plan.iter().enumerate() {
            if let Some(parent) = dir.parent {
                let child = self.tree.add_child(&created[parent], &dir.name).await?;
                created.push(child);
            }
            for file in &dir.files {
                self.files
                    .attach(
                        &created[index],
                        &file.name,
                        file.blob_id,
                        file.size,
                        &file.content_type,
                    )
                    .await?;
            }
        }
        Ok(top)
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn delete_directory(
        &self,
        user_id: Uuid,
        path: &str,
    ) -> Result<DeleteReport, DriveError> {
        let path = DrivePath::parse(path)?;
        let _guard = self.locks.lock(user_id).await;

        let root = self.tree.root_of(user_id).await?;
        let node = self.tree.resolve(&root, &path).await?;
        self.tree.delete(&node).await
    }

    // ---- files ----

    /// Stream `reader` into a new file `name` inside `dir_path`.
    ///
    /// The blob is written before the user's lock is taken. If the record
    /// cannot be attached, the blob is deleted again.
    #[instrument(skip(self, reader), fields(user_id = %user_id))]
    pub async fn upload_file(
        &self,
        user_id: Uuid,
        dir_path: &str,
        name: &str,
        content_type: Option<&str>,
        reader: BoxReader,
    ) -> Result<UploadedFile, DriveError> {
        let dir_path = DrivePath::parse(dir_path)?;
        validate_name(name)?;
        let content_type = guess_content_type(name, content_type);

        let root = self.tree.root_of(user_id).await?;
        self.tree.resolve(&root, &dir_path).await?;

        let limited: BoxReader = Box::new(LimitedReader::new(reader, self.config.max_upload_size));
        let blob_id = self.blobs.store(limited).await?;

        let file = self
            .attach_pending(blob_id, async {
                let size = self.blobs.size(&blob_id).await?;
                let _guard = self.locks.lock(user_id).await;
                let dir = self.tree.resolve(&root, &dir_path).await?;
                self.files
                    .attach(&dir, name, blob_id, size, &content_type)
                    .await
            })
            .await?;

        info!(file_id = %file.id, size = file.size, "Uploaded {}", name);
        Ok(UploadedFile {
            file_id: file.id,
            blob_id: file.blob_id,
            size: file.size,
        })
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn download_file(&self, user_id: Uuid, path: &str) -> Result<Download, DriveError> {
        let path = DrivePath::parse(path)?;
        let root = self.tree.root_of(user_id).await?;
        let (_, file) = self.locate_file(&root, &path).await?;

        let reader = match self.blobs.retrieve(&file.blob_id).await {
            Ok(reader) => reader,
            Err(StorageError::NotFound(_)) => {
                error!(file_id = %file.id, blob_id = %file.blob_id, "File record points at a missing blob");
                return Err(DriveError::NotFound(format!("File content is missing: {path}")));
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Download {
            reader,
            filename: file.name,
            content_type: file.content_type,
            size: file.size,
        })
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn rename_file(
        &self,
        user_id: Uuid,
        path: &str,
        new_name: &str,
    ) -> Result<FileRecord, DriveError> {
        let path = DrivePath::parse(path)?;
        let _guard = self.locks.lock(user_id).await;

        let root = self.tree.root_of(user_id).await?;
        let (_, file) = self.locate_file(&root, &path).await?;
        self.files.rename(&file, new_name).await
    }

    /// Move the file at `src` so that it lives at `dest`.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn move_file(
        &self,
        user_id: Uuid,
        src: &str,
        dest: &str,
    ) -> Result<FileRecord, DriveError> {
        let src = DrivePath::parse(src)?;
        let dest = DrivePath::parse(dest)?;
        let (dest_parent, dest_name) = file_parts(&dest)?;

        let _guard = self.locks.lock(user_id).await;
        let root = self.tree.root_of(user_id).await?;
        let (dir, file) = self.locate_file(&root, &src).await?;

        if src.parent().as_ref() == Some(&dest_parent) {
            return self.files.rename(&file, dest_name).await;
        }
        let target = self.tree.resolve(&root, &dest_parent).await?;
        debug!(from = %dir.id, to = %target.id, "Moving file {}", file.name);
        self.files.relocate(&file, &target, dest_name).await
    }

    /// Copy the file at `src` to the new path `dest` with its own blob.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn copy_file(
        &self,
        user_id: Uuid,
        src: &str,
        dest: &str,
    ) -> Result<FileRecord, DriveError> {
        let src = DrivePath::parse(src)?;
        let dest = DrivePath::parse(dest)?;
        let (dest_parent, dest_name) = file_parts(&dest)?;

        let root = self.tree.root_of(user_id).await?;
        let (_, file) = self.locate_file(&root, &src).await?;
        let target = self.tree.resolve(&root, &dest_parent).await?;
        if self.metadata.name_taken(target.id, dest_name).await? {
            return Err(DriveError::BadRequest(format!(
                "An entry named '{dest_name}' already exists in this directory"
            )));
        }

        let blob_id = self.blobs.copy(&file.blob_id).await?;
        self.attach_pending(blob_id, async {
            let _guard = self.locks.lock(user_id).await;
            let target = self.tree.resolve(&root, &dest_parent).await?;
            self.files
                .attach(&target, dest_name, blob_id, file.size, &file.content_type)
                .await
        })
        .await
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn delete_file(&self, user_id: Uuid, path: &str) -> Result<(), DriveError> {
        let path = DrivePath::parse(path)?;
        let _guard = self.locks.lock(user_id).await;

        let root = self.tree.root_of(user_id).await?;
        let (_, file) = self.locate_file(&root, &path).await?;
        if self.files.detach_and_delete_blob(&file).await? == BlobCleanup::Orphaned {
            warn!(file_id = %file.id, "Deleted file left an orphaned blob");
        }
        info!("Deleted file {}", path);
        Ok(())
    }
}

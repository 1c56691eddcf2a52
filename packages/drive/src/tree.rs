use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DriveError;
use crate::index::{BlobCleanup, FileIndex};
use crate::models::DirectoryNode;
use crate::repo::MetadataStore;
use crate::utils::path::{DrivePath, validate_name};

/// Totals of a recursive directory delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteReport {
    pub dirs_removed: usize,
    pub files_removed: usize,
    /// Blobs whose delete failed and were left for the reconcile sweep.
    pub orphaned_blobs: usize,
}

/// The directory hierarchy of each user, addressed by [`DrivePath`].
///
/// Mutating calls expect the owner's [`crate::lock::UserLocks`] guard to be
/// held by the caller.
#[derive(Clone)]
pub struct PathTree {
    metadata: Arc<dyn MetadataStore>,
    files: FileIndex,
}

impl PathTree {
    pub fn new(metadata: Arc<dyn MetadataStore>, files: FileIndex) -> Self {
        Self { metadata, files }
    }

    async fn load(&self, id: Uuid) -> Result<DirectoryNode, DriveError> {
        self.metadata
            .get_dir(id)
            .await?
            .ok_or_else(|| DriveError::NotFound(format!("Directory {id} does not exist")))
    }

    /// The root directory of `user_id`.
    pub async fn root_of(&self, user_id: Uuid) -> Result<DirectoryNode, DriveError> {
        let user = self
            .metadata
            .find_user(user_id)
            .await?
            .ok_or_else(|| DriveError::Unauthorised("Cannot load current user".into()))?;
        self.load(user.root_id).await
    }

    /// Walk `path` from `root` one segment at a time.
    pub async fn resolve(
        &self,
        root: &DirectoryNode,
        path: &DrivePath,
    ) -> Result<DirectoryNode, DriveError> {
        let mut current = root.clone();
        for segment in path.segments() {
            current = self
                .metadata
                .find_child_dir(current.id, segment)
                .await?
                .ok_or_else(|| DriveError::NotFound(format!("Directory does not exist: {path}")))?;
        }
        Ok(current)
    }

    /// Create every missing directory along `path`.
    ///
    /// Returns the names of the directories that were created, outermost
    /// first. Fails with `AlreadyExists` when nothing needed creating.
    pub async fn create(
        &self,
        root: &DirectoryNode,
        path: &DrivePath,
    ) -> Result<Vec<String>, DriveError> {
        let mut current = root.clone();
        let mut created = Vec::new();

        for segment in path.segments() {
            if let Some(child) = self.metadata.find_child_dir(current.id, segment).await? {
                current = child;
                continue;
            }
            if self.metadata.find_file(current.id, segment).await?.is_some() {
                return Err(DriveError::BadRequest(format!(
                    "A file named '{segment}' already exists in this directory"
                )));
            }

            let child = DirectoryNode::new_child(&current, segment);
            self.metadata.insert_dir(&child).await?;
            debug!(dir_id = %child.id, "Created directory {}", segment);
            created.push(segment.clone());
            current = child;
        }

        if created.is_empty() {
            return Err(DriveError::AlreadyExists(format!(
                "Directory already exists: {path}"
            )));
        }
        Ok(created)
    }

    /// Create one empty directory `name` inside `parent`.
    pub async fn add_child(
        &self,
        parent: &DirectoryNode,
        name: &str,
    ) -> Result<DirectoryNode, DriveError> {
        validate_name(name)?;
        self.ensure_free(parent.id, name).await?;

        let child = DirectoryNode::new_child(parent, name);
        self.metadata.insert_dir(&child).await?;
        Ok(child)
    }

    pub async fn rename(
        &self,
        node: &DirectoryNode,
        new_name: &str,
    ) -> Result<DirectoryNode, DriveError> {
        let parent_id = node
            .parent_id
            .ok_or_else(|| DriveError::BadRequest("The root directory cannot be renamed".into()))?;
        validate_name(new_name)?;
        if node.name == new_name {
            return Ok(node.clone());
        }
        self.ensure_free(parent_id, new_name).await?;

        let mut renamed = node.clone();
        renamed.name = new_name.to_string();
        renamed.updated_at = Utc::now();
        self.metadata.update_dir(&renamed).await?;
        Ok(renamed)
    }

    /// Reparent `node` under `dest_parent`, keeping its name.
    pub async fn move_node(
        &self,
        node: &DirectoryNode,
        dest_parent: &DirectoryNode,
    ) -> Result<DirectoryNode, DriveError> {
        self.relocate(node, dest_parent, &node.name).await
    }

    /// Place `node` at `name` inside `dest_parent`.
    ///
    /// Rejects the root, moves onto itself, and moves into its own subtree.
    pub async fn relocate(
        &self,
        node: &DirectoryNode,
        dest_parent: &DirectoryNode,
        name: &str,
    ) -> Result<DirectoryNode, DriveError> {
        let parent_id = node
            .parent_id
            .ok_or_else(|| DriveError::BadRequest("The root directory cannot be moved".into()))?;
        if dest_parent.id == parent_id {
            return self.rename(node, name).await;
        }
        if dest_parent.owner_id != node.owner_id {
            return Err(DriveError::BadRequest(
                "Directories cannot be moved between users".into(),
            ));
        }
        if self.is_within(dest_parent, node.id).await? {
            return Err(DriveError::BadRequest(
                "A directory cannot be moved into itself or its own subdirectory".into(),
            ));
        }

        validate_name(name)?;
        self.ensure_free(dest_parent.id, name).await?;

        let mut moved = node.clone();
        moved.name = name.to_string();
        moved.parent_id = Some(dest_parent.id);
        moved.updated_at = Utc::now();
        self.metadata.update_dir(&moved).await?;
        Ok(moved)
    }

    /// Whether `candidate` is `ancestor_id` or lies beneath it.
    pub async fn is_within(
        &self,
        candidate: &DirectoryNode,
        ancestor_id: Uuid,
    ) -> Result<bool, DriveError> {
        let mut current = candidate.clone();
        loop {
            if current.id == ancestor_id {
                return Ok(true);
            }
            match current.parent_id {
                Some(parent_id) => current = self.load(parent_id).await?,
                None => return Ok(false),
            }
        }
    }

    /// Delete `node` and everything beneath it, children before parents.
    ///
    /// Stops at the first failure. What was already removed stays removed,
    /// so calling again on the remainder finishes the job.
    pub async fn delete(&self, node: &DirectoryNode) -> Result<DeleteReport, DriveError> {
        if node.is_root() {
            return Err(DriveError::BadRequest(
                "The root directory cannot be deleted".into(),
            ));
        }

        let mut report = DeleteReport::default();
        // (directory, children already pushed)
        let mut stack = vec![(node.id, false)];

        while let Some((id, expanded)) = stack.pop() {
            if !expanded {
                stack.push((id, true));
                for child in self.metadata.child_dirs(id).await? {
                    stack.push((child.id, false));
                }
                continue;
            }

            for file in self.metadata.files_in(id).await? {
                if self.files.detach_and_delete_blob(&file).await? == BlobCleanup::Orphaned {
                    report.orphaned_blobs += 1;
                }
                report.files_removed += 1;
            }
            if self.metadata.remove_dir(id).await? {
                report.dirs_removed += 1;
            }
        }

        info!(
            dir_id = %node.id,
            dirs = report.dirs_removed,
            files = report.files_removed,
            "Deleted directory {}",
            node.name
        );
        Ok(report)
    }

    async fn ensure_free(&self, parent_id: Uuid, name: &str) -> Result<(), DriveError> {
        if self.metadata.name_taken(parent_id, name).await? {
            return Err(DriveError::BadRequest(format!(
                "An entry named '{name}' already exists in this directory"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use common::storage::BlobStore;
    use common::storage::memory::MemoryBlobStore;
    use proptest::prelude::*;

    use super::*;
    use crate::repo::MemoryMetadataStore;
    use crate::testing::{FlakyBlobStore, FlakyMetadataStore};

    struct Fixture {
        metadata: Arc<MemoryMetadataStore>,
        blobs: Arc<FlakyBlobStore>,
        files: FileIndex,
        tree: PathTree,
        root: DirectoryNode,
    }

    async fn fixture() -> Fixture {
        let metadata = Arc::new(MemoryMetadataStore::new());
        let blobs = Arc::new(FlakyBlobStore::new(MemoryBlobStore::new(1 << 20)));
        let files = FileIndex::new(metadata.clone(), blobs.clone());
        let tree = PathTree::new(metadata.clone(), files.clone());
        let user = metadata.create_user("alice").await.unwrap();
        let root = tree.root_of(user.id).await.unwrap();
        Fixture {
            metadata,
            blobs,
            files,
            tree,
            root,
        }
    }

    fn path(raw: &str) -> DrivePath {
        DrivePath::parse(raw).unwrap()
    }

    impl Fixture {
        async fn mkdir(&self, raw: &str) -> DirectoryNode {
            self.tree.create(&self.root, &path(raw)).await.unwrap();
            self.tree.resolve(&self.root, &path(raw)).await.unwrap()
        }

        async fn touch(&self, dir: &DirectoryNode, name: &str) {
            let id = self.blobs.put(name.as_bytes()).await.unwrap();
            self.files
                .attach(dir, name, id, name.len() as u64, "text/plain")
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn resolve_root_and_missing() {
        let f = fixture().await;
        let root = f.tree.resolve(&f.root, &DrivePath::root()).await.unwrap();
        assert_eq!(root.id, f.root.id);

        let err = f.tree.resolve(&f.root, &path("/nope")).await.unwrap_err();
        assert!(matches!(err, DriveError::NotFound(_)));
    }

    #[tokio::test]
    async fn unknown_user_is_unauthorised() {
        let f = fixture().await;
        let err = f.tree.root_of(Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, DriveError::Unauthorised(_)));
    }

    #[tokio::test]
    async fn create_makes_intermediates() {
        let f = fixture().await;
        let created = f.tree.create(&f.root, &path("/a/b/c")).await.unwrap();
        assert_eq!(created, ["a", "b", "c"]);

        let created = f.tree.create(&f.root, &path("/a/b/d")).await.unwrap();
        assert_eq!(created, ["d"]);

        let c = f.tree.resolve(&f.root, &path("/a/b/c")).await.unwrap();
        assert_eq!(c.name, "c");
        f.metadata.verify_integrity().await.unwrap();
    }

    #[tokio::test]
    async fn create_existing_fails() {
        let f = fixture().await;
        f.mkdir("/a/b").await;

        let err = f.tree.create(&f.root, &path("/a/b")).await.unwrap_err();
        assert!(matches!(err, DriveError::AlreadyExists(_)));
        let err = f.tree.create(&f.root, &DrivePath::root()).await.unwrap_err();
        assert!(matches!(err, DriveError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn create_through_file_fails() {
        let f = fixture().await;
        f.touch(&f.root, "notes").await;

        let err = f.tree.create(&f.root, &path("/notes/inner")).await.unwrap_err();
        assert!(matches!(err, DriveError::BadRequest(_)));
        assert_eq!(f.metadata.dir_count().await, 1);
    }

    #[tokio::test]
    async fn add_child_checks_siblings() {
        let f = fixture().await;
        f.touch(&f.root, "taken").await;

        let child = f.tree.add_child(&f.root, "fresh").await.unwrap();
        assert_eq!(child.parent_id, Some(f.root.id));
        assert!(f.tree.add_child(&f.root, "fresh").await.is_err());
        assert!(f.tree.add_child(&f.root, "taken").await.is_err());
    }

    #[tokio::test]
    async fn rename_rules() {
        let f = fixture().await;
        let a = f.mkdir("/a").await;
        f.mkdir("/b").await;
        f.touch(&f.root, "c").await;

        let err = f.tree.rename(&f.root, "x").await.unwrap_err();
        assert!(matches!(err, DriveError::BadRequest(_)));
        assert!(f.tree.rename(&a, "b").await.is_err());
        assert!(f.tree.rename(&a, "c").await.is_err());
        assert!(f.tree.rename(&a, "x/y").await.is_err());

        let renamed = f.tree.rename(&a, "z").await.unwrap();
        assert_eq!(renamed.id, a.id);
        assert!(f.tree.resolve(&f.root, &path("/z")).await.is_ok());
        assert!(f.tree.resolve(&f.root, &path("/a")).await.is_err());
    }

    #[tokio::test]
    async fn move_keeps_subtree() {
        let f = fixture().await;
        f.mkdir("/a/inner").await;
        let a = f.tree.resolve(&f.root, &path("/a")).await.unwrap();
        let b = f.mkdir("/b").await;
        f.touch(&a, "file").await;

        f.tree.move_node(&a, &b).await.unwrap();

        let inner = f.tree.resolve(&f.root, &path("/b/a/inner")).await.unwrap();
        assert_eq!(inner.name, "inner");
        let moved = f.tree.resolve(&f.root, &path("/b/a")).await.unwrap();
        assert!(f.metadata.find_file(moved.id, "file").await.unwrap().is_some());
        f.metadata.verify_integrity().await.unwrap();
    }

    #[tokio::test]
    async fn move_rejects_cycles() {
        let f = fixture().await;
        f.mkdir("/a/b/c").await;
        let a = f.tree.resolve(&f.root, &path("/a")).await.unwrap();
        let c = f.tree.resolve(&f.root, &path("/a/b/c")).await.unwrap();

        let err = f.tree.move_node(&a, &a).await.unwrap_err();
        assert!(matches!(err, DriveError::BadRequest(_)));
        let err = f.tree.move_node(&a, &c).await.unwrap_err();
        assert!(matches!(err, DriveError::BadRequest(_)));
        let err = f.tree.move_node(&f.root, &c).await.unwrap_err();
        assert!(matches!(err, DriveError::BadRequest(_)));
        f.metadata.verify_integrity().await.unwrap();
    }

    #[tokio::test]
    async fn move_rejects_taken_name() {
        let f = fixture().await;
        let a = f.mkdir("/a").await;
        let b = f.mkdir("/b").await;
        f.touch(&b, "a").await;

        assert!(f.tree.move_node(&a, &b).await.is_err());
        let placed = f.tree.relocate(&a, &b, "a2").await.unwrap();
        assert_eq!(placed.parent_id, Some(b.id));
        assert_eq!(placed.name, "a2");
    }

    #[tokio::test]
    async fn delete_removes_subtree_and_blobs() {
        let f = fixture().await;
        f.mkdir("/a/b/c").await;
        let a = f.tree.resolve(&f.root, &path("/a")).await.unwrap();
        let b = f.tree.resolve(&f.root, &path("/a/b")).await.unwrap();
        f.touch(&a, "one").await;
        f.touch(&b, "two").await;

        let report = f.tree.delete(&a).await.unwrap();

        assert_eq!(report.dirs_removed, 3);
        assert_eq!(report.files_removed, 2);
        assert_eq!(report.orphaned_blobs, 0);
        assert_eq!(f.metadata.dir_count().await, 1);
        assert_eq!(f.metadata.file_count().await, 0);
        assert_eq!(f.blobs.len().await, 0);
        f.metadata.verify_integrity().await.unwrap();
    }

    #[tokio::test]
    async fn delete_root_is_rejected() {
        let f = fixture().await;
        let err = f.tree.delete(&f.root).await.unwrap_err();
        assert!(matches!(err, DriveError::BadRequest(_)));
    }

    #[tokio::test]
    async fn delete_counts_orphans() {
        let f = fixture().await;
        let a = f.mkdir("/a").await;
        f.touch(&a, "one").await;
        f.blobs.fail_deletes(true);

        let report = f.tree.delete(&a).await.unwrap();

        assert_eq!(report.orphaned_blobs, 1);
        assert_eq!(f.metadata.file_count().await, 0);
        assert_eq!(f.blobs.len().await, 1);
    }

    #[tokio::test]
    async fn interrupted_delete_can_be_resumed() {
        let metadata = Arc::new(FlakyMetadataStore::new());
        let blobs = Arc::new(FlakyBlobStore::new(MemoryBlobStore::new(1 << 20)));
        let files = FileIndex::new(metadata.clone(), blobs.clone());
        let tree = PathTree::new(metadata.clone(), files.clone());
        let user = metadata.create_user("bob").await.unwrap();
        let root = tree.root_of(user.id).await.unwrap();

        tree.create(&root, &path("/a/b")).await.unwrap();
        let a = tree.resolve(&root, &path("/a")).await.unwrap();
        let b = tree.resolve(&root, &path("/a/b")).await.unwrap();
        let blob = blobs.put(b"x").await.unwrap();
        files.attach(&a, "f", blob, 1, "text/plain").await.unwrap();

        metadata.fail_file_removes(true);
        assert!(tree.delete(&a).await.is_err());
        // Post-order: the empty child went first, the parent survives.
        assert!(metadata.get_dir(b.id).await.unwrap().is_none());
        assert!(metadata.get_dir(a.id).await.unwrap().is_some());
        metadata.inner().verify_integrity().await.unwrap();

        metadata.fail_file_removes(false);
        let report = tree.delete(&a).await.unwrap();
        assert_eq!(report.dirs_removed, 1);
        assert_eq!(report.files_removed, 1);
        assert_eq!(metadata.inner().dir_count().await, 1);
        metadata.inner().verify_integrity().await.unwrap();
    }

    fn segment() -> impl Strategy<Value = String> {
        "[a-z]{1,6}"
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn created_paths_resolve(segments in prop::collection::vec(segment(), 1..6)) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async {
                let f = fixture().await;
                let raw = format!("/{}", segments.join("/"));
                let p = path(&raw);

                let created = f.tree.create(&f.root, &p).await.unwrap();
                prop_assert_eq!(created.len(), segments.len());

                let node = f.tree.resolve(&f.root, &p).await.unwrap();
                prop_assert_eq!(&node.name, segments.last().unwrap());

                let mut names = Vec::new();
                let mut current = node;
                while let Some(parent_id) = current.parent_id {
                    names.push(current.name.clone());
                    current = f.metadata.get_dir(parent_id).await.unwrap().unwrap();
                }
                prop_assert_eq!(current.id, f.root.id);
                names.reverse();
                prop_assert_eq!(format!("/{}", names.join("/")), raw);
                prop_assert_eq!(f.metadata.dir_count().await, segments.len() + 1);
                prop_assert!(f.metadata.verify_integrity().await.is_ok());
                Ok::<(), TestCaseError>(())
            })?;
        }
    }
}

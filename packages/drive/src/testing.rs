//! Fault-injecting store wrappers for unit tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::storage::memory::MemoryBlobStore;
use common::storage::{BlobId, BlobStore, BoxReader, StorageError};
use uuid::Uuid;

use crate::error::DriveError;
use crate::models::{DirectoryNode, FileRecord, User};
use crate::repo::{MemoryMetadataStore, MetadataStore};

fn injected() -> StorageError {
    StorageError::Backend("injected failure".into())
}

async fn pause(delay_ms: &AtomicU64) {
    let ms = delay_ms.load(Ordering::SeqCst);
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

/// In-memory blob store whose writes and deletes can be made to fail.
pub struct FlakyBlobStore {
    inner: MemoryBlobStore,
    fail_stores: AtomicBool,
    fail_deletes: AtomicBool,
    copy_delay_ms: AtomicU64,
}

impl FlakyBlobStore {
    pub fn new(inner: MemoryBlobStore) -> Self {
        Self {
            inner,
            fail_stores: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            copy_delay_ms: AtomicU64::new(0),
        }
    }

    pub fn fail_stores(&self, fail: bool) {
        self.fail_stores.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Make every `copy` take at least `delay`.
    pub fn slow_copies(&self, delay: Duration) {
        self.copy_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.inner.len().await
    }
}

#[async_trait]
impl BlobStore for FlakyBlobStore {
    async fn store(&self, reader: BoxReader) -> Result<BlobId, StorageError> {
        if self.fail_stores.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.store(reader).await
    }

    async fn retrieve(&self, id: &BlobId) -> Result<BoxReader, StorageError> {
        self.inner.retrieve(id).await
    }

    async fn copy(&self, id: &BlobId) -> Result<BlobId, StorageError> {
        pause(&self.copy_delay_ms).await;
        if self.fail_stores.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.copy(id).await
    }

    async fn exists(&self, id: &BlobId) -> Result<bool, StorageError> {
        self.inner.exists(id).await
    }

    async fn delete(&self, id: &BlobId) -> Result<bool, StorageError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.delete(id).await
    }

    async fn size(&self, id: &BlobId) -> Result<u64, StorageError> {
        self.inner.size(id).await
    }

    async fn list(&self) -> Result<Vec<BlobId>, StorageError> {
        self.inner.list().await
    }
}

/// In-memory metadata store whose file writes can be made to fail.
pub struct FlakyMetadataStore {
    inner: MemoryMetadataStore,
    fail_file_inserts: AtomicBool,
    fail_file_removes: AtomicBool,
    insert_delay_ms: AtomicU64,
}

impl FlakyMetadataStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryMetadataStore::new(),
            fail_file_inserts: AtomicBool::new(false),
            fail_file_removes: AtomicBool::new(false),
            insert_delay_ms: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &MemoryMetadataStore {
        &self.inner
    }

    pub fn fail_file_inserts(&self, fail: bool) {
        self.fail_file_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_file_removes(&self, fail: bool) {
        self.fail_file_removes.store(fail, Ordering::SeqCst);
    }

    /// Make every file insert wait `delay` before it is applied.
    pub fn slow_file_inserts(&self, delay: Duration) {
        self.insert_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl MetadataStore for FlakyMetadataStore {
    async fn create_user(&self, username: &str) -> Result<User, DriveError> {
        self.inner.create_user(username).await
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, DriveError> {
        self.inner.find_user(id).await
    }

    async fn get_dir(&self, id: Uuid) -> Result<Option<DirectoryNode>, DriveError> {
        self.inner.get_dir(id).await
    }

    async fn child_dirs(&self, parent_id: Uuid) -> Result<Vec<DirectoryNode>, DriveError> {
        self.inner.child_dirs(parent_id).await
    }

    async fn find_child_dir(
        &self,
        parent_id: Uuid,
        name: &str,
    ) -> Result<Option<DirectoryNode>, DriveError> {
        self.inner.find_child_dir(parent_id, name).await
    }

    async fn insert_dir(&self, node: &DirectoryNode) -> Result<(), DriveError> {
        self.inner.insert_dir(node).await
    }

    async fn update_dir(&self, node: &DirectoryNode) -> Result<(), DriveError> {
        self.inner.update_dir(node).await
    }

    async fn remove_dir(&self, id: Uuid) -> Result<bool, DriveError> {
        self.inner.remove_dir(id).await
    }

    async fn get_file(&self, id: Uuid) -> Result<Option<FileRecord>, DriveError> {
        self.inner.get_file(id).await
    }

    async fn files_in(&self, parent_id: Uuid) -> Result<Vec<FileRecord>, DriveError> {
        self.inner.files_in(parent_id).await
    }

    async fn find_file(
        &self,
        parent_id: Uuid,
        name: &str,
    ) -> Result<Option<FileRecord>, DriveError> {
        self.inner.find_file(parent_id, name).await
    }

    async fn insert_file(&self, file: &FileRecord) -> Result<(), DriveError> {
        pause(&self.insert_delay_ms).await;
        if self.fail_file_inserts.load(Ordering::SeqCst) {
            return Err(DriveError::Internal("injected failure".into()));
        }
        self.inner.insert_file(file).await
    }

    async fn update_file(&self, file: &FileRecord) -> Result<(), DriveError> {
        self.inner.update_file(file).await
    }

    async fn remove_file(&self, id: Uuid) -> Result<bool, DriveError> {
        if self.fail_file_removes.load(Ordering::SeqCst) {
            return Err(DriveError::Internal("injected failure".into()));
        }
        self.inner.remove_file(id).await
    }

    async fn referenced_blobs(&self) -> Result<Vec<BlobId>, DriveError> {
        self.inner.referenced_blobs().await
    }
}

use std::collections::BTreeSet;
use std::time::{Duration, SystemTime};

use common::storage::{BlobId, BlobStore};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::ReconcileConfig;
use crate::error::DriveError;
use crate::repo::MetadataStore;

/// Outcome of one pass over blobs and file records.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    /// Distinct blob ids referenced by file records.
    pub referenced: usize,
    /// Blob ids present in the blob store.
    pub stored: usize,
    /// Stored blobs that no record references.
    pub orphaned: Vec<BlobId>,
    /// Unreferenced blobs left alone because they are too young.
    pub skipped_recent: usize,
    /// Records whose blob is missing from the store.
    pub dangling: Vec<BlobId>,
    /// Orphans removed by this pass.
    pub deleted: usize,
}

fn is_recent(id: &BlobId, now: SystemTime, min_age: Duration) -> bool {
    match id.created_at() {
        Some(created) => now.duration_since(created).unwrap_or_default() < min_age,
        None => false,
    }
}

/// Compare the blob store with the records that reference it.
///
/// Orphans are deleted only when `config.apply` is set. Dangling records are
/// reported, never changed.
pub async fn sweep(
    metadata: &dyn MetadataStore,
    blobs: &dyn BlobStore,
    config: &ReconcileConfig,
) -> Result<ReconcileReport, DriveError> {
    // Records first: a blob written after this read is young enough to be skipped.
    let referenced: BTreeSet<BlobId> = metadata.referenced_blobs().await?.into_iter().collect();
    let stored: BTreeSet<BlobId> = blobs.list().await?.into_iter().collect();

    let now = SystemTime::now();
    let min_age = Duration::from_secs(config.min_age_secs);
    let mut report = ReconcileReport {
        referenced: referenced.len(),
        stored: stored.len(),
        dangling: referenced.difference(&stored).copied().collect(),
        ..Default::default()
    };

    for id in stored.difference(&referenced) {
        if is_recent(id, now, min_age) {
            report.skipped_recent += 1;
            continue;
        }
        report.orphaned.push(*id);
    }

    for id in &report.dangling {
        warn!(blob_id = %id, "File record references a missing blob");
    }

    if config.apply {
        for id in &report.orphaned {
            match blobs.delete(id).await {
                Ok(true) => report.deleted += 1,
                Ok(false) => {}
                Err(e) => warn!(blob_id = %id, "Failed to delete orphaned blob: {e}"),
            }
        }
    }

    info!(
        referenced = report.referenced,
        stored = report.stored,
        orphaned = report.orphaned.len(),
        dangling = report.dangling.len(),
        deleted = report.deleted,
        "Reconcile sweep finished"
    );
    Ok(report)
}

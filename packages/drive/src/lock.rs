use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Serializes mutations of one user's tree.
///
/// Every mutating drive operation holds its user's guard from the first
/// metadata read it bases a decision on until its last metadata write, so
/// check-then-insert sequences (sibling-name checks, cycle checks) cannot
/// interleave. Different users never contend.
#[derive(Default)]
pub struct UserLocks {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `user_id`'s tree.
    pub async fn lock(&self, user_id: Uuid) -> OwnedMutexGuard<()> {
        // Clone the Arc out so no DashMap shard guard is held across the await.
        let mutex = self
            .locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    /// Drop lock entries nobody is holding or waiting on.
    pub fn prune(&self) {
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

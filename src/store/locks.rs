use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::identity::ObjectId;

type LockTable = Arc<DashMap<ObjectId, Arc<Mutex<()>>>>;

/// Per-id exclusive locks.
///
/// A lock entry exists only while somebody holds or waits for it. Guards are
/// owned so they can be held across `.await` points.
#[derive(Default)]
pub struct KeyLocks {
    table: LockTable,
}

/// Holds the lock for one id until dropped.
pub struct KeyGuard {
    id: ObjectId,
    guard: Option<OwnedMutexGuard<()>>,
    table: LockTable,
}

impl std::fmt::Debug for KeyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyGuard").field("id", &self.id).finish()
    }
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn mutex_for(&self, id: ObjectId) -> Arc<Mutex<()>> {
        self.table
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Waits until the lock for `id` is free.
    pub async fn lock(&self, id: ObjectId) -> KeyGuard {
        let guard = self.mutex_for(id).lock_owned().await;
        KeyGuard {
            id,
            guard: Some(guard),
            table: self.table.clone(),
        }
    }

    pub fn try_lock(&self, id: ObjectId) -> Option<KeyGuard> {
        let guard = self.mutex_for(id).try_lock_owned().ok()?;
        Some(KeyGuard {
            id,
            guard: Some(guard),
            table: self.table.clone(),
        })
    }

    pub fn is_locked(&self, id: &ObjectId) -> bool {
        self.table
            .get(id)
            .is_some_and(|mutex| mutex.try_lock().is_err())
    }

    /// Ids with a live lock entry.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl KeyGuard {
    pub fn id(&self) -> ObjectId {
        self.id
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the table's own reference left: no holder and no waiter.
        self.table
            .remove_if(&self.id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

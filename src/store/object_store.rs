use async_trait::async_trait;
use std::sync::Arc;

use super::backend::BlobStore;
use super::locks::{KeyGuard, KeyLocks};
use crate::clock::now_secs;
use crate::error::{IdentityError, PoolError, StoreError};
use crate::identity::ObjectId;
use crate::object::PoolObject;
use crate::publish::protocol::{PublishResponse, UnpublishKind};

/// Advertises local storage state to the rest of the pool.
#[async_trait]
pub trait ObjectAdvertiser: Send + Sync {
    async fn publish(&self, object: &PoolObject) -> Result<PublishResponse, PoolError>;

    /// Best effort. `object_type` of `None` sends an untyped unpublish that
    /// only drops backpointers.
    async fn unpublish(
        &self,
        object_id: ObjectId,
        object_type: Option<String>,
        kind: UnpublishKind,
    );
}

/// What releasing an object lock advertised.
#[derive(Debug)]
pub enum ReleaseOutcome {
    Published(PublishResponse),
    Unpublished,
}

/// Per-node persistent object map.
///
/// Every mutation is bracketed by lock, mutate, [`ObjectStore::release`].
/// Release publishes the object if it is still stored and unpublishes it
/// otherwise, so the pool never advertises a copy this node does not hold.
pub struct ObjectStore {
    backend: Arc<dyn BlobStore>,
    locks: KeyLocks,
    advertiser: Arc<dyn ObjectAdvertiser>,
}

impl ObjectStore {
    pub fn new(backend: Arc<dyn BlobStore>, advertiser: Arc<dyn ObjectAdvertiser>) -> Self {
        Self {
            backend,
            locks: KeyLocks::new(),
            advertiser,
        }
    }

    pub async fn lock(&self, id: ObjectId) -> KeyGuard {
        self.locks.lock(id).await
    }

    pub fn try_lock(&self, id: ObjectId) -> Option<KeyGuard> {
        self.locks.try_lock(id)
    }

    pub fn is_locked(&self, id: &ObjectId) -> bool {
        self.locks.is_locked(id)
    }

    /// Stores a new object and returns its lock, still held.
    ///
    /// Fails with `AlreadyExists` when the id is locked by someone else or
    /// already stored.
    pub fn create(&self, object: &mut PoolObject) -> Result<KeyGuard, StoreError> {
        let id = object.object_id()?;
        let guard = self
            .locks
            .try_lock(id)
            .ok_or(StoreError::AlreadyExists(id))?;

        if self.backend.contains(&id) {
            return Err(StoreError::AlreadyExists(id));
        }

        self.put(&guard, object)?;
        Ok(guard)
    }

    /// Replaces an object that must already be stored.
    pub fn update(&self, guard: &KeyGuard, object: &mut PoolObject) -> Result<(), StoreError> {
        if !self.backend.contains(&guard.id()) {
            return Err(StoreError::NotFound(guard.id()));
        }
        self.put(guard, object)
    }

    /// Stores an object whether or not it exists.
    pub fn store(&self, guard: &KeyGuard, object: &mut PoolObject) -> Result<(), StoreError> {
        self.put(guard, object)
    }

    // Restarts the object's TTL clock.
    fn put(&self, guard: &KeyGuard, object: &mut PoolObject) -> Result<(), StoreError> {
        let id = object.object_id()?;
        if id != guard.id() {
            return Err(StoreError::NotLocked {
                object_id: id,
                locked: guard.id(),
            });
        }
        if object.is_tombstone() && !object.payload.is_empty() {
            return Err(StoreError::TombstoneWithPayload(id));
        }

        object.metadata.created_at = now_secs();
        object.metadata.data_hash = Some(object.data_hash());
        self.backend.put(&id, object.encode()?)
    }

    /// Reads and verifies an object.
    ///
    /// A copy that no longer verifies is reported as missing and the id is
    /// unpublished. A tombstone whose token does not match is removed.
    pub async fn get(&self, id: &ObjectId) -> Result<PoolObject, StoreError> {
        let Some(bytes) = self.backend.get(id)? else {
            return Err(StoreError::NotFound(*id));
        };
        let object = PoolObject::decode(&bytes)?;

        match object.object_id() {
            Ok(actual) if actual == *id => return Ok(object),
            Ok(actual) => {
                tracing::warn!("Object {} verifies as {}", id.short(), actual.short());
            }
            Err(e @ IdentityError::DeleteTokenMismatch { .. }) => {
                tracing::warn!("Removing object {}: {}", id.short(), e);
                self.backend.remove(id)?;
            }
            Err(e) => {
                tracing::warn!("Object {} failed verification: {}", id.short(), e);
            }
        }

        self.advertiser
            .unpublish(*id, None, UnpublishKind::Optional)
            .await;
        Err(StoreError::NotFound(*id))
    }

    pub async fn get_and_lock(&self, id: ObjectId) -> Result<(KeyGuard, PoolObject), StoreError> {
        let guard = self.locks.lock(id).await;
        let object = self.get(&id).await?;
        Ok((guard, object))
    }

    /// Like [`ObjectStore::get_and_lock`] but returns `None` instead of
    /// waiting for a held lock.
    pub async fn try_get_and_lock(
        &self,
        id: ObjectId,
    ) -> Result<Option<(KeyGuard, PoolObject)>, StoreError> {
        let Some(guard) = self.locks.try_lock(id) else {
            return Ok(None);
        };
        let object = self.get(&id).await?;
        Ok(Some((guard, object)))
    }

    pub fn remove(&self, guard: &KeyGuard) -> Result<bool, StoreError> {
        self.backend.remove(&guard.id())
    }

    /// Releases the lock, advertising the outcome of the critical section.
    ///
    /// If the root rejects the publication the local copy is removed and the
    /// rejection is returned.
    pub async fn release(
        &self,
        guard: KeyGuard,
        object: &PoolObject,
    ) -> Result<ReleaseOutcome, PoolError> {
        let id = guard.id();

        let outcome = if self.backend.contains(&id) {
            match self.advertiser.publish(object).await {
                Ok(response) => Ok(ReleaseOutcome::Published(response)),
                Err(e) => {
                    tracing::warn!(
                        "Publish of {} rejected, dropping local copy: {}",
                        id.short(),
                        e
                    );
                    if let Err(remove_err) = self.backend.remove(&id) {
                        tracing::error!("Failed to remove {}: {}", id.short(), remove_err);
                    }
                    Err(e)
                }
            }
        } else {
            let object_type = Some(object.object_type().to_string());
            self.advertiser
                .unpublish(id, object_type, UnpublishKind::Required)
                .await;
            Ok(ReleaseOutcome::Unpublished)
        };

        drop(guard);
        outcome
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.backend.contains(id)
    }

    pub fn ids(&self) -> Vec<ObjectId> {
        self.backend.keys()
    }

    pub fn len(&self) -> usize {
        self.backend.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity_used(&self) -> u64 {
        self.backend.capacity_used()
    }

    pub fn capacity(&self) -> u64 {
        self.backend.capacity()
    }
}

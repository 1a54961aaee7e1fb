//! Store Module Tests
//!
//! Validates the per-node store without a network: a recording advertiser
//! stands in for the node's publish path.
//!
//! ## Test Scopes
//! - **KeyLocks**: exclusivity, try-lock, table cleanup.
//! - **Backends**: capacity accounting for memory and filesystem stores.
//! - **ObjectStore**: create/update/store/get and the release side effect.

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::error::{PoolError, StoreError};
    use crate::identity::ObjectId;
    use crate::membership::types::{NodeAddress, NodeId};
    use crate::object::{BlockObjectHandler, ObjectMetadata, PoolObject};
    use crate::publish::protocol::{PublishResponse, UnpublishKind};
    use crate::store::*;

    #[derive(Default)]
    struct RecordingAdvertiser {
        published: Mutex<Vec<ObjectId>>,
        unpublished: Mutex<Vec<(ObjectId, Option<String>, UnpublishKind)>>,
        reject: bool,
    }

    #[async_trait]
    impl ObjectAdvertiser for RecordingAdvertiser {
        async fn publish(&self, object: &PoolObject) -> Result<PublishResponse, PoolError> {
            let id = object.object_id()?;
            if self.reject {
                return Err(PoolError::DisallowedDuplicate(id));
            }
            self.published.lock().push(id);
            Ok(PublishResponse {
                responder: NodeAddress {
                    id: NodeId(ObjectId::ZERO),
                    http_addr: "127.0.0.1:6000".parse().unwrap(),
                },
                object_ids: vec![id],
            })
        }

        async fn unpublish(
            &self,
            object_id: ObjectId,
            object_type: Option<String>,
            kind: UnpublishKind,
        ) {
            self.unpublished.lock().push((object_id, object_type, kind));
        }
    }

    fn store_with(advertiser: Arc<RecordingAdvertiser>, capacity: u64) -> ObjectStore {
        ObjectStore::new(Arc::new(MemoryBlobStore::new(capacity)), advertiser)
    }

    fn block(data: &[u8], token: &ObjectId) -> PoolObject {
        BlockObjectHandler::new()
            .create_block(0, data.to_vec(), Some(ObjectId::hash(token.as_bytes())), 3600, 1)
            .unwrap()
    }

    // ============================================================
    // KEY LOCK TESTS
    // ============================================================

    #[tokio::test]
    async fn test_lock_is_exclusive_per_id() {
        let locks = KeyLocks::new();
        let a = ObjectId::hash(b"a");
        let b = ObjectId::hash(b"b");

        let guard = locks.lock(a).await;

        assert!(locks.try_lock(a).is_none());
        assert!(locks.try_lock(b).is_some());
        assert!(locks.is_locked(&a));
        drop(guard);
        assert!(!locks.is_locked(&a));
    }

    #[tokio::test]
    async fn test_lock_table_is_cleaned_after_release() {
        let locks = KeyLocks::new();
        let id = ObjectId::hash(b"x");

        let guard = locks.lock(id).await;
        assert_eq!(locks.len(), 1);
        assert!(locks.try_lock(id).is_none());
        drop(guard);

        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_waiter_acquires_after_holder_drops() {
        let locks = Arc::new(KeyLocks::new());
        let id = ObjectId::hash(b"queued");
        let guard = locks.lock(id).await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let guard = locks.lock(id).await;
                guard.id()
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(guard);

        assert_eq!(waiter.await.unwrap(), id);
        assert!(locks.is_empty());
    }

    // ============================================================
    // BACKEND TESTS
    // ============================================================

    #[test]
    fn test_memory_backend_refuses_writes_beyond_capacity() {
        let backend = MemoryBlobStore::new(10);
        let a = ObjectId::hash(b"a");
        let b = ObjectId::hash(b"b");

        backend.put(&a, vec![0; 8]).unwrap();
        let err = backend.put(&b, vec![0; 4]).unwrap_err();

        assert!(matches!(err, StoreError::NoSpace { needed: 4, used: 8, max: 10, .. }));
        assert_eq!(backend.get(&a).unwrap(), Some(vec![0; 8]));
        assert!(!backend.contains(&b));
    }

    #[test]
    fn test_memory_backend_accounts_replacements() {
        let backend = MemoryBlobStore::new(10);
        let a = ObjectId::hash(b"a");

        backend.put(&a, vec![0; 8]).unwrap();
        backend.put(&a, vec![1; 10]).unwrap();
        assert_eq!(backend.capacity_used(), 10);

        assert!(backend.remove(&a).unwrap());
        assert!(!backend.remove(&a).unwrap());
        assert_eq!(backend.capacity_used(), 0);
    }

    #[test]
    fn test_fs_backend_persists_across_reopen() {
        // ARRANGE
        let dir = tempfile::tempdir().unwrap();
        let a = ObjectId::hash(b"a");
        let b = ObjectId::hash(b"b");
        {
            let backend = FsBlobStore::open(dir.path(), 1024).unwrap();
            backend.put(&a, b"alpha".to_vec()).unwrap();
            backend.put(&b, b"bravo!".to_vec()).unwrap();
            backend.remove(&b).unwrap();
        }

        // ACT
        let reopened = FsBlobStore::open(dir.path(), 1024).unwrap();

        // ASSERT
        assert_eq!(reopened.keys(), vec![a]);
        assert_eq!(reopened.get(&a).unwrap(), Some(b"alpha".to_vec()));
        assert_eq!(reopened.size_of(&a), Some(5));
        assert_eq!(reopened.capacity_used(), 5);
        assert_eq!(reopened.get(&b).unwrap(), None);
    }

    #[test]
    fn test_fs_backend_enforces_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBlobStore::open(dir.path(), 4).unwrap();

        let err = backend.put(&ObjectId::hash(b"a"), vec![0; 5]).unwrap_err();

        assert!(matches!(err, StoreError::NoSpace { .. }));
        assert_eq!(backend.capacity_used(), 0);
    }

    // ============================================================
    // OBJECT STORE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_create_returns_held_lock_and_rejects_duplicates() {
        let store = store_with(Arc::new(RecordingAdvertiser::default()), 1 << 20);
        let mut object = block(b"data", &ObjectId::random());

        let guard = store.create(&mut object).unwrap();
        let id = guard.id();
        assert!(store.is_locked(&id));
        assert!(matches!(
            store.create(&mut object.clone()),
            Err(StoreError::AlreadyExists(dup)) if dup == id
        ));

        drop(guard);
        assert!(matches!(
            store.create(&mut object),
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_update_requires_existing_object() {
        let store = store_with(Arc::new(RecordingAdvertiser::default()), 1 << 20);
        let mut object = block(b"data", &ObjectId::random());
        let guard = store.lock(object.object_id().unwrap()).await;

        assert!(matches!(
            store.update(&guard, &mut object),
            Err(StoreError::NotFound(_))
        ));
        store.store(&guard, &mut object).unwrap();
        store.update(&guard, &mut object).unwrap();
    }

    #[tokio::test]
    async fn test_store_requires_matching_lock() {
        let store = store_with(Arc::new(RecordingAdvertiser::default()), 1 << 20);
        let mut object = block(b"data", &ObjectId::random());
        let guard = store.lock(ObjectId::hash(b"other")).await;

        assert!(matches!(
            store.store(&guard, &mut object),
            Err(StoreError::NotLocked { .. })
        ));
    }

    #[tokio::test]
    async fn test_store_restarts_ttl_clock() {
        let store = store_with(Arc::new(RecordingAdvertiser::default()), 1 << 20);
        let mut object = block(b"data", &ObjectId::random());
        object.metadata.created_at = 5;
        let guard = store.lock(object.object_id().unwrap()).await;

        store.store(&guard, &mut object).unwrap();

        assert!(object.metadata.created_at > 5);
        let stored = store.get(&guard.id()).await.unwrap();
        assert_eq!(stored.metadata.created_at, object.metadata.created_at);
    }

    #[tokio::test]
    async fn test_tombstone_with_payload_is_refused() {
        let store = store_with(Arc::new(RecordingAdvertiser::default()), 1 << 20);
        let token = ObjectId::random();
        let mut object = PoolObject::new(
            ObjectMetadata {
                delete_token_id: Some(ObjectId::hash(token.as_bytes())),
                delete_token: Some(token),
                ..Default::default()
            },
            b"leftover".to_vec(),
        );
        let guard = store.lock(object.object_id().unwrap()).await;

        let err = store.store(&guard, &mut object).unwrap_err();

        assert!(matches!(err, StoreError::TombstoneWithPayload(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_no_space_keeps_existing_objects() {
        let store = store_with(Arc::new(RecordingAdvertiser::default()), 400);
        let mut small = block(b"small", &ObjectId::random());
        let mut large = block(&[7u8; 512], &ObjectId::random());

        drop(store.create(&mut small).unwrap());
        let err = store.create(&mut large).unwrap_err();

        assert!(matches!(err, StoreError::NoSpace { .. }));
        assert_eq!(store.ids(), vec![small.object_id().unwrap()]);
    }

    #[tokio::test]
    async fn test_release_publishes_stored_object() {
        // ARRANGE
        let advertiser = Arc::new(RecordingAdvertiser::default());
        let store = store_with(advertiser.clone(), 1 << 20);
        let mut object = block(b"data", &ObjectId::random());
        let guard = store.create(&mut object).unwrap();
        let id = guard.id();

        // ACT
        let outcome = store.release(guard, &object).await.unwrap();

        // ASSERT
        assert!(matches!(outcome, ReleaseOutcome::Published(ref r) if r.object_ids == vec![id]));
        assert_eq!(*advertiser.published.lock(), vec![id]);
        assert!(!store.is_locked(&id));
    }

    #[tokio::test]
    async fn test_release_after_remove_unpublishes_typed() {
        let advertiser = Arc::new(RecordingAdvertiser::default());
        let store = store_with(advertiser.clone(), 1 << 20);
        let mut object = block(b"data", &ObjectId::random());
        let id = object.object_id().unwrap();
        drop(store.create(&mut object).unwrap());

        let (guard, object) = store.get_and_lock(id).await.unwrap();
        assert!(store.remove(&guard).unwrap());
        let outcome = store.release(guard, &object).await.unwrap();

        assert!(matches!(outcome, ReleaseOutcome::Unpublished));
        assert!(advertiser.published.lock().is_empty());
        assert_eq!(
            *advertiser.unpublished.lock(),
            vec![(id, Some("block".to_string()), UnpublishKind::Required)]
        );
    }

    #[tokio::test]
    async fn test_rejected_publish_drops_local_copy() {
        let advertiser = Arc::new(RecordingAdvertiser {
            reject: true,
            ..Default::default()
        });
        let store = store_with(advertiser, 1 << 20);
        let mut object = block(b"data", &ObjectId::random());
        let guard = store.create(&mut object).unwrap();
        let id = guard.id();

        let result = store.release(guard, &object).await;

        assert!(matches!(result, Err(PoolError::DisallowedDuplicate(_))));
        assert!(!store.contains(&id));
    }

    #[tokio::test]
    async fn test_try_get_and_lock_skips_held_objects() {
        let store = store_with(Arc::new(RecordingAdvertiser::default()), 1 << 20);
        let mut object = block(b"data", &ObjectId::random());
        let guard = store.create(&mut object).unwrap();
        let id = guard.id();

        assert!(store.try_get_and_lock(id).await.unwrap().is_none());
        drop(guard);
        let (guard, fetched) = store.try_get_and_lock(id).await.unwrap().unwrap();

        assert_eq!(guard.id(), id);
        assert_eq!(fetched.payload, object.payload);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found_without_unpublish() {
        let advertiser = Arc::new(RecordingAdvertiser::default());
        let store = store_with(advertiser.clone(), 1 << 20);

        let err = store.get(&ObjectId::hash(b"nope")).await.unwrap_err();

        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(advertiser.unpublished.lock().is_empty());
    }

    #[tokio::test]
    async fn test_get_removes_tombstone_with_mismatched_token() {
        // ARRANGE: a tombstone whose exposed token was swapped on disk.
        let advertiser = Arc::new(RecordingAdvertiser::default());
        let backend = Arc::new(MemoryBlobStore::new(1 << 20));
        let store = ObjectStore::new(backend.clone(), advertiser.clone());
        let token = ObjectId::random();
        let mut object = block(b"data", &token);
        let id = object.object_id().unwrap();
        object.make_tombstone(ObjectId::random(), 60).unwrap();
        backend.put(&id, object.encode().unwrap()).unwrap();

        // ACT
        let err = store.get(&id).await.unwrap_err();

        // ASSERT
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(!store.contains(&id));
        assert_eq!(
            *advertiser.unpublished.lock(),
            vec![(id, None, UnpublishKind::Optional)]
        );
    }
}

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use super::protocol::PublishRequest;
use crate::clock::now_secs;
use crate::identity::ObjectId;
use crate::membership::types::{NodeAddress, NodeId};
use crate::object::ObjectMetadata;
use crate::store::locks::{KeyGuard, KeyLocks};

/// A node's claim to hold a copy of an object.
///
/// Identity is the (object, publisher) pair: a newer record from the same
/// publisher replaces the old one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRecord {
    pub object_id: ObjectId,
    pub publisher: NodeAddress,
    pub object_type: String,
    /// Epoch seconds after which the record is stale.
    pub expire_time_secs: i64,
    /// Epoch seconds at which the published copy itself expires.
    pub object_expire_secs: i64,
    /// Echo of the copy's exposed delete token, if it is a tombstone.
    pub delete_token: Option<ObjectId>,
}

impl PublishRecord {
    pub fn from_publish(
        object_id: ObjectId,
        request: &PublishRequest,
        metadata: &ObjectMetadata,
        now: i64,
    ) -> Self {
        Self {
            object_id,
            publisher: request.publisher.clone(),
            object_type: metadata.object_type.clone(),
            expire_time_secs: now.saturating_add(request.seconds_to_live),
            object_expire_secs: metadata.expires_at(),
            delete_token: metadata.delete_token,
        }
    }

    pub fn seconds_until_expired(&self, now: i64) -> i64 {
        self.expire_time_secs.saturating_sub(now)
    }
}

impl PartialEq for PublishRecord {
    fn eq(&self, other: &Self) -> bool {
        self.object_id == other.object_id && self.publisher.id == other.publisher.id
    }
}

impl Eq for PublishRecord {}

impl Hash for PublishRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.object_id.hash(state);
        self.publisher.id.hash(state);
    }
}

/// Backpointers known to this node, keyed by object id.
///
/// Kept under its own per-id locks: a node routinely holds records for
/// objects it does not store.
#[derive(Default)]
pub struct Publishers {
    records: DashMap<ObjectId, HashMap<NodeId, PublishRecord>>,
    locks: KeyLocks,
}

impl Publishers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_publishers(&self, object_id: &ObjectId) -> Vec<PublishRecord> {
        self.records
            .get(object_id)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn get_publishers_and_lock(
        &self,
        object_id: ObjectId,
    ) -> (KeyGuard, Vec<PublishRecord>) {
        let guard = self.locks.lock(object_id).await;
        let records = self.get_publishers(&object_id);
        (guard, records)
    }

    /// Replaces the whole set for the guarded id. An empty set forgets the id.
    pub fn put(&self, guard: &KeyGuard, records: Vec<PublishRecord>) {
        let object_id = guard.id();
        if records.is_empty() {
            self.records.remove(&object_id);
            return;
        }
        let set = records
            .into_iter()
            .map(|record| (record.publisher.id, record))
            .collect();
        self.records.insert(object_id, set);
    }

    /// Adds or refreshes one record.
    pub async fn update(&self, record: PublishRecord) {
        let _guard = self.locks.lock(record.object_id).await;
        tracing::trace!(
            "Backpointer {} -> {} for {}s",
            record.object_id.short(),
            record.publisher,
            record.seconds_until_expired(now_secs())
        );
        self.records
            .entry(record.object_id)
            .or_default()
            .insert(record.publisher.id, record);
    }

    pub async fn remove(&self, object_id: ObjectId, publisher: &NodeId) {
        let _guard = self.locks.lock(object_id).await;
        let now_empty = match self.records.get_mut(&object_id) {
            Some(mut set) => {
                set.remove(publisher);
                set.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.records.remove(&object_id);
        }
    }

    /// Drops every record with no time left at `now`. Returns how many went.
    pub async fn expire_at(&self, now: i64) -> usize {
        let mut expired = 0;

        for object_id in self.object_ids() {
            let (guard, records) = self.get_publishers_and_lock(object_id).await;
            let before = records.len();
            let live: Vec<PublishRecord> = records
                .into_iter()
                .filter(|record| record.seconds_until_expired(now) > 0)
                .collect();

            if live.len() != before {
                expired += before - live.len();
                self.put(&guard, live);
            }
        }

        if expired > 0 {
            tracing::debug!("Expired {} publish records", expired);
        }
        expired
    }

    pub async fn expire(&self) -> usize {
        self.expire_at(now_secs()).await
    }

    pub fn object_ids(&self) -> Vec<ObjectId> {
        self.records.iter().map(|entry| *entry.key()).collect()
    }

    pub fn record_count(&self) -> usize {
        self.records.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::IdentityError;
use crate::identity::{IdentityFields, ObjectId, compute_object_id, delete_token_valid, voucher_for};

/// Time-to-live of an object that never expires.
pub const TIME_TO_LIVE_FOREVER: i64 = i64::MAX;

/// Well-known metadata of a pooled object.
///
/// Protocol-critical fields are typed. Handler-specific properties go in
/// `extensions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub object_type: String,
    /// Explicitly assigned id, only meaningful together with `voucher`.
    pub object_id: Option<ObjectId>,
    pub data_hash: Option<ObjectId>,
    pub delete_token_id: Option<ObjectId>,
    /// Exposed delete token. Once set the object is a tombstone.
    pub delete_token: Option<ObjectId>,
    pub voucher: Option<ObjectId>,
    /// Seconds from `created_at`.
    pub time_to_live: i64,
    pub created_at: i64,
    pub replication_store: u32,
    pub replication_low_water: u32,
    pub extensions: BTreeMap<String, String>,
}

impl Default for ObjectMetadata {
    fn default() -> Self {
        Self {
            object_type: String::new(),
            object_id: None,
            data_hash: None,
            delete_token_id: None,
            delete_token: None,
            voucher: None,
            time_to_live: TIME_TO_LIVE_FOREVER,
            created_at: 0,
            replication_store: 1,
            replication_low_water: 1,
            extensions: BTreeMap::new(),
        }
    }
}

impl ObjectMetadata {
    /// Absolute expiry in epoch seconds.
    pub fn expires_at(&self) -> i64 {
        if self.time_to_live == TIME_TO_LIVE_FOREVER {
            return TIME_TO_LIVE_FOREVER;
        }
        self.created_at.saturating_add(self.time_to_live)
    }

    pub fn remaining_ttl(&self, now: i64) -> i64 {
        if self.time_to_live == TIME_TO_LIVE_FOREVER {
            return TIME_TO_LIVE_FOREVER;
        }
        self.expires_at().saturating_sub(now)
    }

    /// True when an exposed delete token is present and hashes to the
    /// delete-token-id.
    pub fn delete_token_is_valid(&self) -> bool {
        match (&self.delete_token, &self.delete_token_id) {
            (Some(token), Some(token_id)) => delete_token_valid(token, token_id),
            _ => false,
        }
    }
}

/// An object as held by an object store: metadata plus opaque payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolObject {
    pub metadata: ObjectMetadata,
    pub payload: Vec<u8>,
}

impl PoolObject {
    pub fn new(metadata: ObjectMetadata, payload: Vec<u8>) -> Self {
        let mut object = Self { metadata, payload };
        object.metadata.data_hash = Some(object.data_hash());
        object
    }

    pub fn data_hash(&self) -> ObjectId {
        ObjectId::hash(&self.payload)
    }

    pub fn object_id(&self) -> Result<ObjectId, IdentityError> {
        compute_object_id(self)
    }

    pub fn object_type(&self) -> &str {
        &self.metadata.object_type
    }

    pub fn is_tombstone(&self) -> bool {
        self.metadata.delete_token.is_some()
    }

    pub fn remaining_ttl(&self, now: i64) -> i64 {
        self.metadata.remaining_ttl(now)
    }

    /// Converts this object into its anti-object form in place.
    ///
    /// The payload is dropped, the token is exposed and a voucher pins the
    /// original id so the tombstone keeps verifying to it.
    pub fn make_tombstone(
        &mut self,
        delete_token: ObjectId,
        time_to_live: i64,
    ) -> Result<ObjectId, IdentityError> {
        let original = self.object_id()?;

        self.payload.clear();
        let data_hash = self.data_hash();
        let metadata = &mut self.metadata;
        metadata.data_hash = Some(data_hash);
        metadata.delete_token = Some(delete_token);
        metadata.time_to_live = time_to_live;
        metadata.object_id = Some(original);
        metadata.voucher = Some(voucher_for(
            metadata.delete_token_id.as_ref(),
            &original,
            &data_hash,
        ));

        Ok(original)
    }

    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

impl IdentityFields for PoolObject {
    fn data_hash(&self) -> ObjectId {
        PoolObject::data_hash(self)
    }

    fn delete_token_id(&self) -> Option<ObjectId> {
        self.metadata.delete_token_id
    }

    fn delete_token(&self) -> Option<ObjectId> {
        self.metadata.delete_token
    }

    fn declared_object_id(&self) -> Option<ObjectId> {
        self.metadata.object_id
    }

    fn voucher(&self) -> Option<ObjectId> {
        self.metadata.voucher
    }
}

/// Read-only view of an object, as reported by inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSummary {
    pub object_id: ObjectId,
    pub object_type: String,
    pub payload_len: usize,
    pub deleted: bool,
    pub remaining_ttl: i64,
    pub detail: String,
}

//! Block objects.
//!
//! A block is a run of bytes at an offset within some larger content. The
//! offset is part of the encoded payload so the data hash, and therefore the
//! object id, differs for identical bytes at different offsets.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use super::capability::{
    Deleteable, Inspectable, ObjectHandler, ObjectType, Replicatable, Retrievable, Storable,
};
use super::types::{ObjectMetadata, ObjectSummary, PoolObject};
use crate::clock::now_secs;
use crate::error::PoolError;
use crate::identity::ObjectId;
use crate::node::message::{Message, Operation, Payload, Status};
use crate::node::service::PoolNode;
use crate::pool::replication::{Parallelism, StoreReceipt};
use crate::pool::{deletion, replication, retrieval};
use crate::publish::root;
use crate::store::locks::KeyLocks;

pub const BLOCK_OBJECT_TYPE: &str = "block";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockContents {
    pub offset: u64,
    pub data: Vec<u8>,
}

pub struct BlockObjectHandler {
    delete_locks: KeyLocks,
}

impl BlockObjectHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            delete_locks: KeyLocks::new(),
        })
    }

    /// Builds a block object ready to be stored.
    pub fn create_block(
        &self,
        offset: u64,
        data: Vec<u8>,
        delete_token_id: Option<ObjectId>,
        time_to_live: i64,
        replicas: u32,
    ) -> Result<PoolObject, PoolError> {
        let payload = bincode::serialize(&BlockContents { offset, data })
            .map_err(|e| PoolError::BadRequest(format!("unencodable block: {}", e)))?;

        let metadata = ObjectMetadata {
            object_type: BLOCK_OBJECT_TYPE.to_string(),
            delete_token_id,
            time_to_live,
            replication_store: replicas,
            ..Default::default()
        };

        Ok(PoolObject::new(metadata, payload))
    }

    pub fn contents(object: &PoolObject) -> Result<BlockContents, PoolError> {
        bincode::deserialize(&object.payload).map_err(|e| PoolError::Unacceptable {
            object_id: object.object_id().unwrap_or_default(),
            reason: format!("malformed block payload: {}", e),
        })
    }

    pub async fn store(
        &self,
        node: &Arc<PoolNode>,
        block: PoolObject,
        parallelism: Parallelism,
    ) -> Result<StoreReceipt, PoolError> {
        replication::store_object(self, node, block, None, HashSet::new(), parallelism).await
    }

    pub async fn retrieve(
        &self,
        node: &Arc<PoolNode>,
        object_id: ObjectId,
    ) -> Result<BlockContents, PoolError> {
        let object = retrieval::retrieve(self, node, object_id).await?;
        Self::contents(&object)
    }

    pub async fn delete(
        &self,
        node: &Arc<PoolNode>,
        object_id: ObjectId,
        delete_token: ObjectId,
        time_to_live: i64,
    ) -> Result<Status, PoolError> {
        deletion::delete_object(self, node, object_id, delete_token, time_to_live).await
    }
}

impl ObjectType for BlockObjectHandler {
    fn type_name(&self) -> &'static str {
        BLOCK_OBJECT_TYPE
    }
}

impl Storable for BlockObjectHandler {
    fn validate(&self, object: &PoolObject) -> Result<(), PoolError> {
        if object.is_tombstone() {
            if !object.payload.is_empty() {
                return Err(PoolError::Unacceptable {
                    object_id: object.object_id()?,
                    reason: "deleted block still carries data".to_string(),
                });
            }
            return Ok(());
        }
        Self::contents(object).map(|_| ())
    }
}

impl Retrievable for BlockObjectHandler {}

impl Deleteable for BlockObjectHandler {
    fn delete_locks(&self) -> &KeyLocks {
        &self.delete_locks
    }
}

impl Replicatable for BlockObjectHandler {}

impl Inspectable for BlockObjectHandler {
    fn inspect(&self, object_id: ObjectId, object: &PoolObject) -> ObjectSummary {
        let detail = match Self::contents(object) {
            Ok(contents) => format!("offset={} len={}", contents.offset, contents.data.len()),
            Err(_) if object.is_tombstone() => "deleted".to_string(),
            Err(e) => e.to_string(),
        };

        ObjectSummary {
            object_id,
            object_type: BLOCK_OBJECT_TYPE.to_string(),
            payload_len: object.payload.len(),
            deleted: object.is_tombstone(),
            remaining_ttl: object.remaining_ttl(now_secs()),
            detail,
        }
    }
}

#[async_trait]
impl ObjectHandler for BlockObjectHandler {
    fn object_type(&self) -> &str {
        BLOCK_OBJECT_TYPE
    }

    fn summarize(&self, object_id: ObjectId, object: &PoolObject) -> Option<ObjectSummary> {
        Some(self.inspect(object_id, object))
    }

    async fn handle(&self, node: &Arc<PoolNode>, message: &Message) -> Result<Payload, PoolError> {
        match (message.operation, &message.payload) {
            (Operation::PublishObject, Payload::Publish(request)) => {
                root::accept_publish(self, node, request).await
            }
            (Operation::UnpublishObject, Payload::Unpublish(request)) => {
                replication::unpublish_object_root_helper(self, node, request).await?;
                Ok(Payload::Empty)
            }
            (Operation::StoreLocalObject, Payload::Store(object)) => {
                replication::store_local_object(self, node, object.clone()).await
            }
            (Operation::RetrieveLocalObject, Payload::Retrieve(request)) => {
                retrieval::retrieve_local_object(node, request).await
            }
            (Operation::DeleteLocalObject, Payload::Delete(request)) => {
                deletion::delete_local_object(self, node, request).await
            }
            (Operation::ReplicateObject, Payload::Replicate(request)) => {
                replication::replicate_object(self, node, request).await
            }
            (operation, _) => Err(PoolError::BadRequest(format!(
                "{} cannot handle {:?} with this payload",
                BLOCK_OBJECT_TYPE, operation
            ))),
        }
    }
}

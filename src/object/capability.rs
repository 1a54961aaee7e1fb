//! Object capabilities.
//!
//! The protocol core in `pool` and `publish` is written against these traits
//! rather than against a concrete object type. A type implements the subset
//! that applies to it and exposes everything through [`ObjectHandler`].

use async_trait::async_trait;
use std::sync::Arc;

use super::types::{ObjectSummary, PoolObject};
use crate::clock::now_secs;
use crate::error::PoolError;
use crate::identity::ObjectId;
use crate::node::message::{Message, Payload};
use crate::node::service::PoolNode;
use crate::store::locks::KeyLocks;

/// Names the object type. Messages for the type carry this as their service.
pub trait ObjectType: Send + Sync {
    fn type_name(&self) -> &'static str;
}

/// Entry point for messages dispatched to an object type on a node.
#[async_trait]
pub trait ObjectHandler: Send + Sync {
    fn object_type(&self) -> &str;

    /// Summary for listings. Types that are not inspectable return `None`.
    fn summarize(&self, object_id: ObjectId, object: &PoolObject) -> Option<ObjectSummary> {
        let _ = (object_id, object);
        None
    }

    async fn handle(&self, node: &Arc<PoolNode>, message: &Message) -> Result<Payload, PoolError>;
}

pub trait Storable: ObjectType {
    /// Replica count used when the caller does not override it.
    fn replication_store(&self, object: &PoolObject) -> usize {
        object.metadata.replication_store.max(1) as usize
    }

    /// Type-specific acceptance check run before an object is stored.
    fn validate(&self, object: &PoolObject) -> Result<(), PoolError> {
        let _ = object;
        Ok(())
    }
}

pub trait Retrievable: ObjectType {
    /// Client-side check on a fetched copy. Deleted copies are refused.
    fn accept_retrieved(&self, object_id: &ObjectId, object: &PoolObject) -> Result<(), PoolError> {
        if object.is_tombstone() {
            return Err(PoolError::DeletedObject(*object_id));
        }
        Ok(())
    }
}

pub trait Deleteable: ObjectType {
    /// Serialises deletion fan-outs for the same id.
    fn delete_locks(&self) -> &KeyLocks;

    /// Converts `object` into its anti-object form.
    fn create_anti_object(
        &self,
        object: &mut PoolObject,
        delete_token: ObjectId,
        time_to_live: i64,
    ) -> Result<ObjectId, PoolError> {
        Ok(object.make_tombstone(delete_token, time_to_live)?)
    }
}

pub trait Replicatable: Storable {
    /// Copies made when repairing after a publisher vanished.
    fn repair_replicas(&self) -> usize {
        1
    }
}

pub trait Inspectable: ObjectType {
    fn inspect(&self, object_id: ObjectId, object: &PoolObject) -> ObjectSummary {
        ObjectSummary {
            object_id,
            object_type: object.object_type().to_string(),
            payload_len: object.payload.len(),
            deleted: object.is_tombstone(),
            remaining_ttl: object.remaining_ttl(now_secs()),
            detail: String::new(),
        }
    }
}

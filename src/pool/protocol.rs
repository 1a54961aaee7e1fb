use serde::{Deserialize, Serialize};

use crate::identity::ObjectId;
use crate::membership::types::{NodeAddress, NodeId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrieveRequest {
    pub object_id: ObjectId,
}

/// Asks the receiving holder to convert its copy into a tombstone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub object_id: ObjectId,
    pub delete_token: ObjectId,
    /// Lifetime of the tombstone, in seconds.
    pub time_to_live: i64,
}

/// Asks a holder to place one more copy outside `excluded`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicateRequest {
    pub object_id: ObjectId,
    pub excluded: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreReply {
    pub object_id: ObjectId,
    pub holder: NodeAddress,
}

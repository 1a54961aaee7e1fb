use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::identity::ObjectId;
use crate::membership::types::NodeAddress;
use crate::object::ObjectMetadata;

/// Record lifetime used when publishing is not periodic.
pub const DEFAULT_RECORD_SECONDS_TO_LIVE: i64 = 300;

/// Advertises that `publisher` holds the listed objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub publisher: NodeAddress,
    pub objects: BTreeMap<ObjectId, ObjectMetadata>,
    pub seconds_to_live: i64,
    /// Set on the copies a root forwards to its successors.
    pub backup: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishResponse {
    pub responder: NodeAddress,
    pub object_ids: Vec<ObjectId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnpublishKind {
    /// Cleanup after a local miss.
    Optional,
    /// The object was removed and the pool should know.
    Required,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnpublishRequest {
    pub publisher: NodeAddress,
    pub object_ids: Vec<ObjectId>,
    pub kind: UnpublishKind,
}

/// Lifetime of a publish record.
///
/// Records outlive two publish periods so one missed refresh does not drop
/// the backpointer.
pub fn record_seconds_to_live(publish_period_seconds: i64) -> i64 {
    if publish_period_seconds < 1 {
        DEFAULT_RECORD_SECONDS_TO_LIVE
    } else {
        publish_period_seconds.saturating_mul(2)
    }
}

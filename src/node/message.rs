use serde::{Deserialize, Serialize};

use crate::clock::now_ms;
use crate::error::{PoolError, RemoteError};
use crate::identity::ObjectId;
use crate::membership::types::NodeAddress;
use crate::object::PoolObject;
use crate::pool::protocol::{DeleteRequest, ReplicateRequest, RetrieveRequest, StoreReply};
use crate::pool::replication::StoreReceipt;
use crate::publish::protocol::{PublishRequest, PublishResponse, UnpublishRequest};
use crate::publish::publishers::PublishRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Reply,
    /// Routed toward a node id, or the node closest to an id.
    RouteToNode,
    /// Routed toward any node holding the subject object.
    RouteToObject,
    PublishObject,
    UnpublishObject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Ok,
    NotFound,
    Forbidden,
    Unauthorized,
    Gone,
    NotAcceptable,
    BadRequest,
    Throwable,
}

impl Status {
    pub fn is_success(self) -> bool {
        self == Status::Ok
    }

    pub fn http_code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::Unauthorized => 401,
            Status::Forbidden => 403,
            Status::NotFound => 404,
            Status::NotAcceptable => 406,
            Status::Gone => 410,
            Status::Throwable => 500,
        }
    }
}

/// Operations a service can be asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    PublishObject,
    UnpublishObject,
    StoreLocalObject,
    RetrieveLocalObject,
    DeleteLocalObject,
    ReplicateObject,
    GetPublishers,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Empty,
    Publish(PublishRequest),
    PublishAck(PublishResponse),
    Unpublish(UnpublishRequest),
    Store(PoolObject),
    Stored(StoreReply),
    Receipt(StoreReceipt),
    Retrieve(RetrieveRequest),
    Object(PoolObject),
    Delete(DeleteRequest),
    Replicate(ReplicateRequest),
    Publishers(Vec<PublishRecord>),
    Error(RemoteError),
}

/// The envelope every inter-node request and reply travels in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub kind: MessageKind,
    pub status: Status,
    pub source: NodeAddress,
    pub destination: ObjectId,
    pub subject: ObjectId,
    pub service: String,
    pub operation: Operation,
    pub multicast: bool,
    /// Deliver only to the node whose id equals `destination`.
    pub exact: bool,
    /// Remaining hop budget.
    pub ttl: i32,
    pub timestamp_ms: u64,
    pub payload: Payload,
}

impl Message {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: MessageKind,
        source: NodeAddress,
        destination: ObjectId,
        subject: ObjectId,
        service: &str,
        operation: Operation,
        ttl: i32,
        payload: Payload,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            status: Status::Ok,
            source,
            destination,
            subject,
            service: service.to_string(),
            operation,
            multicast: false,
            exact: false,
            ttl,
            timestamp_ms: now_ms(),
            payload,
        }
    }

    pub fn exact(mut self) -> Self {
        self.exact = true;
        self
    }

    pub fn compose_reply(&self, responder: &NodeAddress, payload: Payload) -> Message {
        Message {
            id: self.id.clone(),
            kind: MessageKind::Reply,
            status: Status::Ok,
            source: responder.clone(),
            destination: self.source.id.0,
            subject: self.subject,
            service: self.service.clone(),
            operation: self.operation,
            multicast: false,
            exact: true,
            ttl: self.ttl,
            timestamp_ms: now_ms(),
            payload,
        }
    }

    pub fn compose_error(&self, responder: &NodeAddress, error: &PoolError) -> Message {
        let mut reply = self.compose_reply(responder, Payload::Error(RemoteError::from(error)));
        reply.status = error.status();
        reply
    }

    /// The reply's payload, or the remote failure it carries.
    pub fn into_result(self) -> Result<Payload, PoolError> {
        if self.status.is_success() {
            return Ok(self.payload);
        }
        match self.payload {
            Payload::Error(error) => Err(error.into()),
            _ => Err(PoolError::Transport(format!(
                "{:?} reply to {} without error detail",
                self.status, self.id
            ))),
        }
    }
}

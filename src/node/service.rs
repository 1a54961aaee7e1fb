use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use super::message::{Message, MessageKind, Operation, Payload};
use super::transport::Transport;
use crate::clock::now_secs;
use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::identity::ObjectId;
use crate::membership::directory::NodeDirectory;
use crate::membership::types::{NodeAddress, NodeId};
use crate::object::{HandlerRegistry, PoolObject};
use crate::publish::protocol::{
    PublishRequest, PublishResponse, UnpublishKind, UnpublishRequest, record_seconds_to_live,
};
use crate::publish::publishers::{PublishRecord, Publishers};
use crate::store::backend::BlobStore;
use crate::store::object_store::{ObjectAdvertiser, ObjectStore};

/// Service name of the node's own publish bookkeeping, used for untyped
/// unpublishes and publisher queries.
pub const PUBLISH_SERVICE: &str = "publish";

/// One member of the object pool.
///
/// Owns the local object store and the publisher registry, and is the hop
/// every routed message passes through.
pub struct PoolNode {
    address: NodeAddress,
    config: PoolConfig,
    store: ObjectStore,
    publishers: Publishers,
    directory: Arc<dyn NodeDirectory>,
    transport: Arc<dyn Transport>,
    handlers: Arc<HandlerRegistry>,
}

impl PoolNode {
    pub fn new(
        address: NodeAddress,
        config: PoolConfig,
        backend: Arc<dyn BlobStore>,
        directory: Arc<dyn NodeDirectory>,
        transport: Arc<dyn Transport>,
        handlers: Arc<HandlerRegistry>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|node: &Weak<PoolNode>| {
            let advertiser = Arc::new(NodeAdvertiser { node: node.clone() });
            Self {
                address,
                config,
                store: ObjectStore::new(backend, advertiser),
                publishers: Publishers::new(),
                directory,
                transport,
                handlers,
            }
        })
    }

    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    pub fn id(&self) -> NodeId {
        self.address.id
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn publishers(&self) -> &Publishers {
        &self.publishers
    }

    pub fn directory(&self) -> &Arc<dyn NodeDirectory> {
        &self.directory
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    /// Alive nodes as this node sees them, itself included.
    pub fn known_nodes(&self) -> Vec<NodeAddress> {
        let mut nodes = self.directory.alive_nodes();
        if !nodes.iter().any(|node| node.id == self.address.id) {
            nodes.push(self.address.clone());
        }
        nodes
    }

    fn compose(
        &self,
        kind: MessageKind,
        destination: ObjectId,
        subject: ObjectId,
        service: &str,
        operation: Operation,
        payload: Payload,
    ) -> Message {
        Message::new(
            kind,
            self.address.clone(),
            destination,
            subject,
            service,
            operation,
            self.config.message_ttl,
            payload,
        )
    }

    /// Round trip to exactly the node `node_id`.
    pub async fn send_to_node_exactly(
        self: &Arc<Self>,
        node_id: NodeId,
        subject: ObjectId,
        service: &str,
        operation: Operation,
        payload: Payload,
    ) -> Result<Payload, PoolError> {
        let message = self
            .compose(
                MessageKind::RouteToNode,
                node_id.0,
                subject,
                service,
                operation,
                payload,
            )
            .exact();
        self.receive(message).await.into_result()
    }

    /// Round trip to the node closest to `destination`.
    pub async fn send_to_node(
        self: &Arc<Self>,
        destination: ObjectId,
        subject: ObjectId,
        service: &str,
        operation: Operation,
        payload: Payload,
    ) -> Result<Payload, PoolError> {
        let message = self.compose(
            MessageKind::RouteToNode,
            destination,
            subject,
            service,
            operation,
            payload,
        );
        self.receive(message).await.into_result()
    }

    /// Round trip to the root of `object_id`.
    pub async fn send_to_root(
        self: &Arc<Self>,
        object_id: ObjectId,
        service: &str,
        operation: Operation,
        payload: Payload,
    ) -> Result<Payload, PoolError> {
        self.send_to_node(object_id, object_id, service, operation, payload)
            .await
    }

    /// Round trip to some node holding `object_id`.
    pub async fn send_to_object(
        self: &Arc<Self>,
        object_id: ObjectId,
        service: &str,
        operation: Operation,
        payload: Payload,
    ) -> Result<Payload, PoolError> {
        let message = self.compose(
            MessageKind::RouteToObject,
            object_id,
            object_id,
            service,
            operation,
            payload,
        );
        self.receive(message).await.into_result()
    }

    /// Advertises a local copy toward its root.
    ///
    /// Every hop on the way records the backpointer once the root accepts.
    pub async fn publish(
        self: &Arc<Self>,
        object: &PoolObject,
    ) -> Result<PublishResponse, PoolError> {
        let object_id = object.object_id()?;
        let seconds_to_live = record_seconds_to_live(self.config.publish_period_seconds)
            .min(object.remaining_ttl(now_secs()));

        let request = PublishRequest {
            publisher: self.address.clone(),
            objects: BTreeMap::from([(object_id, object.metadata.clone())]),
            seconds_to_live,
            backup: false,
        };
        let message = self.compose(
            MessageKind::PublishObject,
            object_id,
            object_id,
            object.object_type(),
            Operation::PublishObject,
            Payload::Publish(request),
        );

        match self.receive(message).await.into_result()? {
            Payload::PublishAck(response) => Ok(response),
            _ => Err(PoolError::Transport(format!(
                "publish of {} answered with an unexpected payload",
                object_id.short()
            ))),
        }
    }

    /// Withdraws this node's backpointer for `object_id`.
    ///
    /// A typed unpublish also reaches the type's handler at the root. Best
    /// effort: failures are only logged.
    pub async fn unpublish(
        self: &Arc<Self>,
        object_id: ObjectId,
        object_type: Option<&str>,
        kind: UnpublishKind,
    ) {
        let request = UnpublishRequest {
            publisher: self.address.clone(),
            object_ids: vec![object_id],
            kind,
        };
        let message = self.compose(
            MessageKind::UnpublishObject,
            object_id,
            object_id,
            object_type.unwrap_or(PUBLISH_SERVICE),
            Operation::UnpublishObject,
            Payload::Unpublish(request),
        );

        if let Err(e) = self.receive(message).await.into_result() {
            tracing::debug!("Unpublish of {} failed: {}", object_id.short(), e);
        }
    }

    /// The publish records held at the root of `object_id`.
    pub async fn get_publishers(
        self: &Arc<Self>,
        object_id: ObjectId,
    ) -> Result<Vec<PublishRecord>, PoolError> {
        let reply = self
            .send_to_root(
                object_id,
                PUBLISH_SERVICE,
                Operation::GetPublishers,
                Payload::Empty,
            )
            .await?;

        match reply {
            Payload::Publishers(records) => Ok(records),
            _ => Err(PoolError::Transport(format!(
                "publisher query for {} answered with an unexpected payload",
                object_id.short()
            ))),
        }
    }
}

/// Connects a node's object store back to the node's publish path.
struct NodeAdvertiser {
    node: Weak<PoolNode>,
}

impl NodeAdvertiser {
    fn node(&self) -> Option<Arc<PoolNode>> {
        self.node.upgrade()
    }
}

#[async_trait]
impl ObjectAdvertiser for NodeAdvertiser {
    async fn publish(&self, object: &PoolObject) -> Result<PublishResponse, PoolError> {
        let node = self
            .node()
            .ok_or_else(|| PoolError::Transport("node is shutting down".to_string()))?;
        node.publish(object).await
    }

    async fn unpublish(
        &self,
        object_id: ObjectId,
        object_type: Option<String>,
        kind: UnpublishKind,
    ) {
        if let Some(node) = self.node() {
            node.unpublish(object_id, object_type.as_deref(), kind).await;
        }
    }
}

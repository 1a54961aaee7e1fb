//! In-process pools for tests: every node shares one `LocalTransport` and
//! one static directory, no sockets involved.

use std::net::SocketAddr;
use std::sync::Arc;

use super::service::PoolNode;
use super::transport::LocalTransport;
use crate::config::PoolConfig;
use crate::identity::ObjectId;
use crate::membership::directory::StaticDirectory;
use crate::membership::types::{NodeAddress, NodeId};
use crate::object::{BlockObjectHandler, HandlerRegistry, ObjectHandler};
use crate::store::backend::MemoryBlobStore;

pub(crate) const NODE_CAPACITY: u64 = 1 << 20;

/// Daemon periods off, so nothing runs unless a test triggers it.
pub(crate) fn test_config() -> PoolConfig {
    PoolConfig {
        publish_period_seconds: 0,
        expire_period_seconds: 0,
        replica_wait_warn_millis: 200,
        ..PoolConfig::default()
    }
}

pub(crate) struct TestPool {
    pub transport: Arc<LocalTransport>,
    pub directory: Arc<StaticDirectory>,
    pub nodes: Vec<Arc<PoolNode>>,
    /// Client-side handle for the block type.
    pub blocks: Arc<BlockObjectHandler>,
}

impl TestPool {
    pub fn new(size: usize) -> Self {
        Self::with_config(size, test_config())
    }

    pub fn with_config(size: usize, config: PoolConfig) -> Self {
        Self::build(size, config, |_| BlockObjectHandler::new() as Arc<dyn ObjectHandler>)
    }

    /// One handler per node, made by `make_handler(index)`.
    pub fn build<F>(size: usize, config: PoolConfig, make_handler: F) -> Self
    where
        F: Fn(usize) -> Arc<dyn ObjectHandler>,
    {
        let transport = LocalTransport::new();
        let directory = Arc::new(StaticDirectory::new());
        let mut nodes = Vec::with_capacity(size);

        for index in 0..size {
            let http_addr: SocketAddr = format!("127.0.0.1:{}", 7000 + index).parse().unwrap();
            let address = NodeAddress {
                id: NodeId::from_address(&http_addr),
                http_addr,
            };
            directory.add(address.clone());

            let handlers = HandlerRegistry::new();
            handlers.register(make_handler(index));

            let node = PoolNode::new(
                address,
                config.clone(),
                Arc::new(MemoryBlobStore::new(NODE_CAPACITY)),
                directory.clone(),
                transport.clone(),
                handlers,
            );
            transport.register(&node);
            nodes.push(node);
        }

        Self {
            transport,
            directory,
            nodes,
            blocks: BlockObjectHandler::new(),
        }
    }

    pub fn node(&self, id: &NodeId) -> Arc<PoolNode> {
        self.nodes
            .iter()
            .find(|node| node.id() == *id)
            .cloned()
            .unwrap()
    }

    /// The alive node closest to `object_id`.
    pub fn root_of(&self, object_id: &ObjectId) -> Arc<PoolNode> {
        self.nodes
            .iter()
            .filter(|node| self.directory.is_alive(&node.id()))
            .min_by_key(|node| node.id().0.distance(object_id))
            .cloned()
            .unwrap()
    }

    pub fn holders(&self, object_id: &ObjectId) -> Vec<Arc<PoolNode>> {
        self.nodes
            .iter()
            .filter(|node| node.store().contains(object_id))
            .cloned()
            .collect()
    }

    pub fn take_offline(&self, id: NodeId) {
        self.transport.set_offline(id, true);
        self.directory.set_alive(&id, false);
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use crate::identity::ObjectId;

/// A node's position in the id space shared with objects.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub ObjectId);

impl NodeId {
    pub fn random() -> Self {
        Self(ObjectId::random())
    }

    /// Stable id for a node serving at `addr`, so a restarted node keeps
    /// its place and its stored objects stay near their roots.
    pub fn from_address(addr: &SocketAddr) -> Self {
        Self(ObjectId::hash(addr.to_string().as_bytes()))
    }

    pub fn short(&self) -> String {
        self.0.short()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where to reach a node's message endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddress {
    pub id: NodeId,
    pub http_addr: SocketAddr,
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id.short(), self.http_addr)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeState {
    Alive,
    Suspect,
    Dead,
}

/// A single member of the pool as seen by gossip.
///
/// `incarnation` orders claims about the member; only the member itself
/// raises it, to refute a suspicion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub gossip_addr: SocketAddr,
    pub http_addr: SocketAddr,
    pub state: NodeState,
    pub incarnation: u64,

    #[serde(skip)]
    pub last_seen: Option<Instant>,
}

impl Node {
    pub fn address(&self) -> NodeAddress {
        NodeAddress {
            id: self.id,
            http_addr: self.http_addr,
        }
    }
}

/// Gossip wire protocol, bincode over UDP.
///
/// - `Join`: a new node announces itself to a seed.
/// - `Ping/Ack`: liveness probe, the ack carries the responder's view.
/// - `Suspect/Alive`: dissemination of health changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GossipMessage {
    Join { node: Node },
    Ping { from: Node },
    Ack { from: Node, members: Vec<Node> },
    Suspect { node_id: NodeId, incarnation: u64 },
    Alive { node_id: NodeId, incarnation: u64 },
}

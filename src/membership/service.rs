use anyhow::Result;
use dashmap::DashMap;
use rand::seq::SliceRandom;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::info;

use super::directory::NodeDirectory;
use super::types::{GossipMessage, Node, NodeAddress, NodeId, NodeState};

const GOSSIP_INTERVAL: Duration = Duration::from_millis(500);
const FAILURE_DETECTION_INTERVAL: Duration = Duration::from_secs(2);
const SUSPECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Gossip-maintained view of the pool's members.
pub struct MembershipService {
    local_id: NodeId,
    gossip_addr: SocketAddr,
    http_addr: SocketAddr,
    members: DashMap<NodeId, Node>,
    socket: UdpSocket,
    incarnation: AtomicU64,
    seeds: Vec<SocketAddr>,
}

impl MembershipService {
    /// Binds the gossip socket. Nothing is sent until [`MembershipService::start`].
    pub async fn bind(
        gossip_addr: SocketAddr,
        http_addr: SocketAddr,
        seeds: Vec<SocketAddr>,
    ) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(gossip_addr).await?;
        let gossip_addr = socket.local_addr()?;
        let local_id = NodeId::from_address(&http_addr);

        let service = Arc::new(Self {
            local_id,
            gossip_addr,
            http_addr,
            members: DashMap::new(),
            socket,
            incarnation: AtomicU64::new(1),
            seeds,
        });
        service
            .members
            .insert(local_id, service.local_node());

        Ok(service)
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    pub fn local_node(&self) -> Node {
        Node {
            id: self.local_id,
            gossip_addr: self.gossip_addr,
            http_addr: self.http_addr,
            state: NodeState::Alive,
            incarnation: self.incarnation.load(Ordering::SeqCst),
            last_seen: Some(Instant::now()),
        }
    }

    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        info!(
            "Starting membership for {} (gossip {}, http {})",
            self.local_id.short(),
            self.gossip_addr,
            self.http_addr
        );

        let gossip = {
            let service = self.clone();
            tokio::spawn(async move { service.gossip_loop().await })
        };
        let receive = {
            let service = self.clone();
            tokio::spawn(async move { service.receive_loop().await })
        };
        let failure_detection = {
            let service = self.clone();
            tokio::spawn(async move { service.failure_detection_loop().await })
        };

        vec![gossip, receive, failure_detection]
    }

    pub fn members(&self) -> Vec<Node> {
        self.members.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn alive_members(&self) -> Vec<Node> {
        self.members
            .iter()
            .filter(|entry| entry.value().state == NodeState::Alive)
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn peers(&self) -> Vec<Node> {
        self.members
            .iter()
            .filter(|entry| *entry.key() != self.local_id && entry.value().state != NodeState::Dead)
            .map(|entry| entry.value().clone())
            .collect()
    }

    async fn send(&self, msg: &GossipMessage, to: SocketAddr) {
        match bincode::serialize(msg) {
            Ok(encoded) => {
                if let Err(e) = self.socket.send_to(&encoded, to).await {
                    tracing::warn!("Failed to send gossip to {}: {}", to, e);
                }
            }
            Err(e) => tracing::error!("Failed to encode gossip message: {}", e),
        }
    }

    async fn broadcast(&self, msg: GossipMessage) {
        for peer in self.peers() {
            self.send(&msg, peer.gossip_addr).await;
        }
    }

    async fn gossip_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(GOSSIP_INTERVAL);

        loop {
            interval.tick().await;

            let peers = self.peers();
            let target = peers.choose(&mut rand::thread_rng()).cloned();
            match target {
                Some(target) => {
                    let ping = GossipMessage::Ping {
                        from: self.local_node(),
                    };
                    self.send(&ping, target.gossip_addr).await;
                    tracing::trace!("Sent ping to {}", target.id.short());
                }
                None => {
                    // Alone: keep knocking on the seeds until one answers.
                    let join = GossipMessage::Join {
                        node: self.local_node(),
                    };
                    for seed in &self.seeds {
                        self.send(&join, *seed).await;
                    }
                }
            }
        }
    }

    async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; 65536];

        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, src)) => match bincode::deserialize::<GossipMessage>(&buf[..len]) {
                    Ok(msg) => self.handle_message(msg, src).await,
                    Err(e) => tracing::warn!("Undecodable gossip from {}: {}", src, e),
                },
                Err(e) => {
                    tracing::error!("Failed to receive UDP packet: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    pub(crate) async fn handle_message(&self, msg: GossipMessage, src: SocketAddr) {
        match msg {
            GossipMessage::Join { node } => {
                info!("Node {} joining via {}", node.id.short(), src);
                let reply_to = node.gossip_addr;
                self.heard_from(node);
                let ack = GossipMessage::Ack {
                    from: self.local_node(),
                    members: self.members(),
                };
                self.send(&ack, reply_to).await;
            }
            GossipMessage::Ping { from } => {
                let reply_to = from.gossip_addr;
                self.heard_from(from);
                let ack = GossipMessage::Ack {
                    from: self.local_node(),
                    members: self.members(),
                };
                self.send(&ack, reply_to).await;
            }
            GossipMessage::Ack { from, members } => {
                self.heard_from(from);
                for member in members {
                    self.merge(member).await;
                }
            }
            GossipMessage::Suspect {
                node_id,
                incarnation,
            } => {
                if node_id == self.local_id {
                    self.refute(incarnation).await;
                } else {
                    self.apply_state(node_id, NodeState::Suspect, incarnation);
                }
            }
            GossipMessage::Alive {
                node_id,
                incarnation,
            } => {
                self.apply_state(node_id, NodeState::Alive, incarnation);
            }
        }
    }

    /// Direct contact: the sender is alive right now.
    fn heard_from(&self, mut node: Node) {
        if node.id == self.local_id {
            return;
        }
        node.state = NodeState::Alive;
        node.last_seen = Some(Instant::now());

        match self.members.get_mut(&node.id) {
            Some(mut existing) => {
                existing.incarnation = existing.incarnation.max(node.incarnation);
                existing.state = NodeState::Alive;
                existing.gossip_addr = node.gossip_addr;
                existing.http_addr = node.http_addr;
                existing.last_seen = node.last_seen;
            }
            None => {
                info!("Discovered member {} at {}", node.id.short(), node.http_addr);
                self.members.insert(node.id, node);
            }
        }
    }

    /// Second-hand news about a member, ordered by incarnation.
    async fn merge(&self, mut incoming: Node) {
        if incoming.id == self.local_id {
            if incoming.state != NodeState::Alive {
                self.refute(incoming.incarnation).await;
            }
            return;
        }

        match self.members.get_mut(&incoming.id) {
            Some(mut existing) => {
                let newer = incoming.incarnation > existing.incarnation;
                let refutes = incoming.incarnation == existing.incarnation
                    && incoming.state == NodeState::Alive
                    && existing.state == NodeState::Suspect;
                if newer || refutes {
                    tracing::debug!(
                        "{} now {:?} (inc {} -> {})",
                        incoming.id.short(),
                        incoming.state,
                        existing.incarnation,
                        incoming.incarnation
                    );
                    existing.state = incoming.state;
                    existing.incarnation = incoming.incarnation;
                    existing.last_seen = Some(Instant::now());
                }
            }
            None if incoming.state != NodeState::Dead => {
                info!(
                    "Discovered member {} at {}",
                    incoming.id.short(),
                    incoming.http_addr
                );
                incoming.last_seen = Some(Instant::now());
                self.members.insert(incoming.id, incoming);
            }
            None => {}
        }
    }

    fn apply_state(&self, node_id: NodeId, state: NodeState, incarnation: u64) {
        let Some(mut existing) = self.members.get_mut(&node_id) else {
            tracing::debug!("{:?} news for unknown member {}", state, node_id.short());
            return;
        };

        let applies = match state {
            NodeState::Suspect => {
                incarnation > existing.incarnation
                    || (incarnation == existing.incarnation && existing.state == NodeState::Alive)
            }
            _ => {
                incarnation > existing.incarnation
                    || (incarnation == existing.incarnation && existing.state == NodeState::Suspect)
            }
        };
        if applies {
            info!("Member {} is {:?} (inc={})", node_id.short(), state, incarnation);
            existing.state = state;
            existing.incarnation = incarnation;
            existing.last_seen = Some(Instant::now());
        }
    }

    /// Someone suspects this node: outbid the claim and announce it.
    async fn refute(&self, claimed: u64) {
        let current = self.incarnation.load(Ordering::SeqCst);
        if claimed < current {
            return;
        }
        let incarnation = claimed + 1;
        self.incarnation.store(incarnation, Ordering::SeqCst);
        if let Some(mut me) = self.members.get_mut(&self.local_id) {
            me.incarnation = incarnation;
        }

        info!("Refuting suspicion with incarnation {}", incarnation);
        self.broadcast(GossipMessage::Alive {
            node_id: self.local_id,
            incarnation,
        })
        .await;
    }

    async fn failure_detection_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(FAILURE_DETECTION_INTERVAL);

        loop {
            interval.tick().await;
            for msg in self.detect_failures(Instant::now()) {
                self.broadcast(msg).await;
            }
        }
    }

    pub(crate) fn detect_failures(&self, now: Instant) -> Vec<GossipMessage> {
        let mut suspicions = Vec::new();

        for mut entry in self.members.iter_mut() {
            let member = entry.value_mut();
            if member.id == self.local_id {
                continue;
            }
            let Some(last_seen) = member.last_seen else {
                member.last_seen = Some(now);
                continue;
            };
            let silent_for = now.saturating_duration_since(last_seen);

            match member.state {
                NodeState::Alive if silent_for > SUSPECT_TIMEOUT => {
                    tracing::warn!(
                        "Member {} suspected (silent for {:?})",
                        member.id.short(),
                        silent_for
                    );
                    member.state = NodeState::Suspect;
                    suspicions.push(GossipMessage::Suspect {
                        node_id: member.id,
                        incarnation: member.incarnation,
                    });
                }
                NodeState::Suspect if silent_for > DEAD_TIMEOUT => {
                    tracing::warn!("Member {} declared dead", member.id.short());
                    member.state = NodeState::Dead;
                }
                _ => {}
            }
        }

        suspicions
    }
}

impl NodeDirectory for MembershipService {
    fn alive_nodes(&self) -> Vec<NodeAddress> {
        self.alive_members().iter().map(Node::address).collect()
    }

    fn mark_unreachable(&self, id: &NodeId) {
        if *id == self.local_id {
            return;
        }
        if let Some(mut member) = self.members.get_mut(id)
            && member.state == NodeState::Alive
        {
            tracing::warn!("Member {} unreachable, suspecting it", id.short());
            member.state = NodeState::Suspect;
        }
    }
}

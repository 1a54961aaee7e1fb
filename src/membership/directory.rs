use dashmap::DashMap;
use rand::seq::SliceRandom;
use std::collections::HashSet;

use super::types::{NodeAddress, NodeId};

/// The set of nodes a pool node can route to and store on.
pub trait NodeDirectory: Send + Sync {
    /// Every node currently believed alive, the local node included.
    fn alive_nodes(&self) -> Vec<NodeAddress>;

    /// Called when delivery to `id` failed.
    fn mark_unreachable(&self, id: &NodeId);

    fn lookup(&self, id: &NodeId) -> Option<NodeAddress> {
        self.alive_nodes().into_iter().find(|node| node.id == *id)
    }

    /// Up to `count` random alive nodes outside `excluded`.
    fn select(&self, count: usize, excluded: &HashSet<NodeId>) -> Vec<NodeAddress> {
        let mut candidates: Vec<NodeAddress> = self
            .alive_nodes()
            .into_iter()
            .filter(|node| !excluded.contains(&node.id))
            .collect();
        candidates.shuffle(&mut rand::thread_rng());
        candidates.truncate(count);
        candidates
    }
}

/// A fixed directory for in-process pools.
#[derive(Default)]
pub struct StaticDirectory {
    nodes: DashMap<NodeId, (NodeAddress, bool)>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, address: NodeAddress) {
        self.nodes.insert(address.id, (address, true));
    }

    pub fn set_alive(&self, id: &NodeId, alive: bool) {
        if let Some(mut entry) = self.nodes.get_mut(id) {
            entry.1 = alive;
        }
    }

    pub fn is_alive(&self, id: &NodeId) -> bool {
        self.nodes.get(id).is_some_and(|entry| entry.1)
    }
}

impl NodeDirectory for StaticDirectory {
    fn alive_nodes(&self) -> Vec<NodeAddress> {
        self.nodes
            .iter()
            .filter(|entry| entry.value().1)
            .map(|entry| entry.value().0.clone())
            .collect()
    }

    fn mark_unreachable(&self, id: &NodeId) {
        self.set_alive(id, false);
    }
}

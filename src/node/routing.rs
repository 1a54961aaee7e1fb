//! XOR-distance routing over the alive node set.
//!
//! The root of an id is the alive node whose id is closest to it. A hop only
//! forwards to nodes strictly closer than itself, so every route terminates.

use crate::identity::ObjectId;
use crate::membership::types::{NodeAddress, NodeId};

/// Nodes ordered from closest to farthest from `target`.
pub fn by_distance(target: &ObjectId, nodes: &[NodeAddress]) -> Vec<NodeAddress> {
    let mut sorted = nodes.to_vec();
    sorted.sort_by_key(|node| node.id.0.distance(target));
    sorted.dedup_by(|a, b| a.id == b.id);
    sorted
}

/// The root of `target` among `nodes`.
pub fn closest(target: &ObjectId, nodes: &[NodeAddress]) -> Option<NodeAddress> {
    nodes
        .iter()
        .min_by_key(|node| node.id.0.distance(target))
        .cloned()
}

/// Next hops for a message at `local`: the nodes closer to `target` than
/// `local` itself, closest first. Empty means `local` is the root.
pub fn next_hops(local: &NodeId, target: &ObjectId, nodes: &[NodeAddress]) -> Vec<NodeAddress> {
    let own = local.0.distance(target);
    by_distance(target, nodes)
        .into_iter()
        .filter(|node| node.id != *local && node.id.0.distance(target) < own)
        .collect()
}

/// The `count` nodes that would inherit `local`'s root role, nearest first.
pub fn successors(local: &NodeId, nodes: &[NodeAddress], count: usize) -> Vec<NodeAddress> {
    by_distance(&local.0, nodes)
        .into_iter()
        .filter(|node| node.id != *local)
        .take(count)
        .collect()
}

//! Membership & Discovery Module
//!
//! Maintains the set of live pool nodes with a gossip protocol (inspired by
//! SWIM) and exposes it to the pool as a `NodeDirectory`: the alive set used
//! for routing and the random candidate selection used for replica placement.
//!
//! ## Core Mechanisms
//! - **Gossip Protocol**: nodes exchange their member views over UDP (bincode).
//! - **Failure Detection**: silent members go Suspect, then Dead. A failed
//!   message delivery suspects the target immediately.
//! - **Incarnation Numbers**: a member refutes a suspicion by raising its own
//!   incarnation.

pub mod directory;
pub mod service;
pub mod types;

pub use directory::{NodeDirectory, StaticDirectory};
pub use service::MembershipService;
pub use types::{Node, NodeAddress, NodeId, NodeState};

#[cfg(test)]
mod tests;

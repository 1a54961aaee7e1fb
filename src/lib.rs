//! Content-Addressed Object Pool Library
//!
//! This library crate defines the modules of a peer-to-peer object pool:
//! nodes store immutable, self-verifying objects and advertise their copies
//! to the node responsible for each object id. It serves as the foundation
//! for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//!
//! - **`identity`**: object ids, content ids and vouchers, delete-token checks.
//! - **`store`**: the per-node object store. Every mutation runs under a
//!   per-id lock whose release publishes or unpublishes the copy.
//! - **`publish`**: backpointers from an object's root to its holders, the
//!   publish and unpublish protocol and the periodic publish daemon.
//! - **`pool`**: the multi-node protocols: replication, deletion through
//!   anti-objects, retrieval.
//! - **`object`**: object types as capability traits, plus the block type.
//! - **`node`**: the messaging substrate. Message envelope, per-hop routing,
//!   transports and the HTTP surface.
//! - **`membership`**: gossip-based discovery and failure detection, exposed
//!   to the pool as a node directory.
//! - **`cache`**: a client-side cache of byte ranges of versioned content.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod membership;
pub mod node;
pub mod object;
pub mod pool;
pub mod publish;
pub mod store;

//! Publish Module
//!
//! Backpointers from an object's root to the nodes that hold copies.
//!
//! ## Core Concepts
//! - **Publishers**: the per-object set of `PublishRecord`s this node knows.
//!   Every hop a publish passes through records it once the root accepts.
//! - **Refresh, not permanence**: records expire. Holders republish on every
//!   release of an object lock and on each daemon sweep, which rebuilds the
//!   backpointers at whichever node is currently the root.
//! - **Backups**: the root mirrors each accepted publish to its successors.

pub mod daemon;
pub mod protocol;
pub mod publishers;
pub mod root;

pub use daemon::{DaemonStatsSnapshot, LocalSweep, PublishDaemon};
pub use protocol::{
    PublishRequest, PublishResponse, UnpublishKind, UnpublishRequest, record_seconds_to_live,
};
pub use publishers::{PublishRecord, Publishers};

#[cfg(test)]
mod tests;

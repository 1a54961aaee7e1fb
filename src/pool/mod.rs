//! Pool Protocols
//!
//! The multi-node operations on pooled objects, written against the
//! capability traits in `object::capability` so any object type can use them.
//!
//! ## Core Concepts
//! - **Replication**: N copies on distinct selected nodes. Node-local
//!   failures move the copy elsewhere, pool-fatal failures abort.
//! - **Deletion**: a holder converts its copy into an anti-object, the root
//!   fans the deletion out to every other publisher.
//! - **Retrieval**: routed to any holder, verified and filtered for
//!   tombstones on the client side.
//! - **Repair**: when a holder unpublishes, the root asks the longest-lived
//!   remaining holder for one more copy.

pub mod deletion;
pub mod protocol;
pub mod replication;
pub mod retrieval;

pub use deletion::{delete_object, object_is_deleteable};
pub use protocol::{DeleteRequest, ReplicateRequest, RetrieveRequest, StoreReply};
pub use replication::{Parallelism, StoreReceipt, store_object};
pub use retrieval::retrieve;

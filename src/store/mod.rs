//! Object Store Module
//!
//! The per-node persistent map from object id to object.
//!
//! ## Core Concepts
//! - **Backends**: `BlobStore` is the capacity-bounded byte store underneath,
//!   in memory or one file per object on disk.
//! - **Key locks**: every id has its own exclusive lock, independent of the
//!   publisher registry's locks.
//! - **Release**: unlocking advertises the result. A stored object is
//!   published, a removed one is unpublished.

pub mod backend;
pub mod locks;
pub mod object_store;

pub use backend::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use locks::{KeyGuard, KeyLocks};
pub use object_store::{ObjectAdvertiser, ObjectStore, ReleaseOutcome};

#[cfg(test)]
mod tests;

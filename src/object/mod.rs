//! Pooled Objects
//!
//! The object model shared by every layer: typed metadata, the stored
//! object itself, the capability traits object types implement and the
//! registry that dispatches messages to them.
//!
//! ## Lifecycle
//! - **Live**: created by a handler, stored under a lock, published on release.
//! - **Tombstone**: the delete token is exposed and the payload is gone. A
//!   tombstone never becomes live again.
//! - **Removed**: dropped from a node's store by expiry or explicit removal,
//!   which unpublishes it.

pub mod block;
pub mod capability;
pub mod registry;
pub mod types;

pub use block::{BLOCK_OBJECT_TYPE, BlockContents, BlockObjectHandler};
pub use capability::{
    Deleteable, Inspectable, ObjectHandler, ObjectType, Replicatable, Retrievable, Storable,
};
pub use registry::HandlerRegistry;
pub use types::{ObjectMetadata, ObjectSummary, PoolObject, TIME_TO_LIVE_FOREVER};

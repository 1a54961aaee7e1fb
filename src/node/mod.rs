//! Pool Node Module
//!
//! The messaging substrate the pool protocols run on: a node, its inbound
//! hop handling, and the transports that carry messages between nodes.
//!
//! ## Core Concepts
//! - **Envelope**: every request and reply is a `Message` naming a target
//!   service (the object type) and an `Operation`. Dispatch is a registry
//!   lookup plus a match, no reflection.
//! - **Routing**: XOR distance over the alive set. A message addressed to an
//!   id ends at its root. An exact message ends at one node or fails.
//! - **Failure reporting**: handler errors travel back as replies with a
//!   status and an `ErrorKind`, unreachable nodes as transport errors.

pub mod handlers;
pub mod message;
pub mod receive;
pub mod routing;
pub mod service;
pub mod transport;

pub use message::{Message, MessageKind, Operation, Payload, Status};
pub use service::{PUBLISH_SERVICE, PoolNode};
pub use transport::{HttpTransport, LocalTransport, Transport};

#[cfg(test)]
pub(crate) mod testing;

#[cfg(test)]
mod tests;

//! Error Types
//!
//! Typed errors for every layer of the pool. Errors that cross the wire are
//! flattened into an [`ErrorKind`] plus message, and reconstructed on the
//! caller side as [`PoolError::Remote`] so the caller can still classify them.
//!
//! ## Classification
//! - **Pool-fatal** (`DisallowedDuplicate`): the object can never be stored
//!   anywhere, a multi-node operation must abort.
//! - **Store-local** (capacity, existence, validation): only the node that
//!   raised it is affected, a multi-node operation skips that node.
//! - Everything else is surfaced to the caller as is.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::ObjectId;
use crate::node::message::Status;

/// Failures while deriving or verifying an object identifier.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("voucher does not attest declared object id {declared}")]
    InvalidObjectIdentity { declared: ObjectId },

    #[error("exposed delete token does not hash to the delete-token-id of {object_id}")]
    DeleteTokenMismatch { object_id: ObjectId },
}

/// Failures of the per-node object store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object {0} not found")]
    NotFound(ObjectId),

    #[error("object {0} already exists or is locked")]
    AlreadyExists(ObjectId),

    #[error("no space for {object_id}: need {needed} bytes, {used} of {max} used")]
    NoSpace {
        object_id: ObjectId,
        needed: u64,
        used: u64,
        max: u64,
    },

    #[error("invalid object: {0}")]
    InvalidObject(#[from] IdentityError),

    #[error("object {0} carries an exposed delete token and a payload")]
    TombstoneWithPayload(ObjectId),

    #[error("object {object_id} stored under a lock held for {locked}")]
    NotLocked { object_id: ObjectId, locked: ObjectId },

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("backend i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Protocol level error returned by every pool operation.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("object {0} has been deleted")]
    DeletedObject(ObjectId),

    #[error("object {0} has no delete-token-id and can never be deleted")]
    Forbidden(ObjectId),

    #[error("proffered delete token is not valid for {0}")]
    Unauthorized(ObjectId),

    #[error("object {object_id} unacceptable: {reason}")]
    Unacceptable { object_id: ObjectId, reason: String },

    #[error("duplicate of {0} is not allowed")]
    DisallowedDuplicate(ObjectId),

    #[error("stored {stored} of {wanted} replicas of {object_id}")]
    NoSpace {
        object_id: ObjectId,
        stored: usize,
        wanted: usize,
    },

    #[error("no handler for object type '{0}'")]
    UnknownObjectType(String),

    #[error("no route to node {0}")]
    NoSuchNode(ObjectId),

    #[error("message {0} exhausted its hop budget")]
    TtlExceeded(String),

    #[error("transport: {0}")]
    Transport(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("remote {kind:?}: {message}")]
    Remote { kind: ErrorKind, message: String },
}

/// Wire form of an error's category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    NoSpace,
    InvalidObjectIdentity,
    DeleteTokenMismatch,
    TombstoneWithPayload,
    StoreInternal,
    DeletedObject,
    Forbidden,
    Unauthorized,
    Unacceptable,
    DisallowedDuplicate,
    ReplicationShortfall,
    UnknownObjectType,
    NoSuchNode,
    TtlExceeded,
    Transport,
    BadRequest,
}

impl ErrorKind {
    pub fn status(self) -> Status {
        match self {
            ErrorKind::NotFound => Status::NotFound,
            ErrorKind::DeletedObject => Status::Gone,
            ErrorKind::Forbidden => Status::Forbidden,
            ErrorKind::Unauthorized => Status::Unauthorized,
            ErrorKind::Unacceptable => Status::NotAcceptable,
            ErrorKind::BadRequest => Status::BadRequest,
            _ => Status::Throwable,
        }
    }

    /// Failures that mean the object cannot be stored on any node.
    pub fn is_pool_fatal(self) -> bool {
        matches!(self, ErrorKind::DisallowedDuplicate)
    }

    /// Failures confined to the node that raised them.
    pub fn is_store_local(self) -> bool {
        matches!(
            self,
            ErrorKind::NotFound
                | ErrorKind::AlreadyExists
                | ErrorKind::NoSpace
                | ErrorKind::InvalidObjectIdentity
                | ErrorKind::DeleteTokenMismatch
                | ErrorKind::TombstoneWithPayload
                | ErrorKind::StoreInternal
                | ErrorKind::Unacceptable
        )
    }
}

impl IdentityError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IdentityError::InvalidObjectIdentity { .. } => ErrorKind::InvalidObjectIdentity,
            IdentityError::DeleteTokenMismatch { .. } => ErrorKind::DeleteTokenMismatch,
        }
    }
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            StoreError::NoSpace { .. } => ErrorKind::NoSpace,
            StoreError::InvalidObject(e) => e.kind(),
            StoreError::TombstoneWithPayload(_) => ErrorKind::TombstoneWithPayload,
            StoreError::NotLocked { .. } | StoreError::Codec(_) | StoreError::Io(_) => {
                ErrorKind::StoreInternal
            }
        }
    }
}

impl PoolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PoolError::Store(e) => e.kind(),
            PoolError::Identity(e) => e.kind(),
            PoolError::DeletedObject(_) => ErrorKind::DeletedObject,
            PoolError::Forbidden(_) => ErrorKind::Forbidden,
            PoolError::Unauthorized(_) => ErrorKind::Unauthorized,
            PoolError::Unacceptable { .. } => ErrorKind::Unacceptable,
            PoolError::DisallowedDuplicate(_) => ErrorKind::DisallowedDuplicate,
            PoolError::NoSpace { .. } => ErrorKind::ReplicationShortfall,
            PoolError::UnknownObjectType(_) => ErrorKind::UnknownObjectType,
            PoolError::NoSuchNode(_) => ErrorKind::NoSuchNode,
            PoolError::TtlExceeded(_) => ErrorKind::TtlExceeded,
            PoolError::Transport(_) => ErrorKind::Transport,
            PoolError::BadRequest(_) => ErrorKind::BadRequest,
            PoolError::Remote { kind, .. } => *kind,
        }
    }

    pub fn status(&self) -> Status {
        self.kind().status()
    }

    pub fn is_pool_fatal(&self) -> bool {
        self.kind().is_pool_fatal()
    }

    pub fn is_store_local(&self) -> bool {
        self.kind().is_store_local()
    }
}

/// Serialisable error carried in an error reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&PoolError> for RemoteError {
    fn from(err: &PoolError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<RemoteError> for PoolError {
    fn from(err: RemoteError) -> Self {
        PoolError::Remote {
            kind: err.kind,
            message: err.message,
        }
    }
}

/// Failures of the client-side buffer cache.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

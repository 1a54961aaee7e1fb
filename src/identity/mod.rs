//! Object Identity
//!
//! Every object in the pool is named by a content-derived identifier that
//! any node can recompute and check.
//!
//! ## Modes
//! - **Content id**: `hash(dataHash ++ deleteTokenId)` for objects with no
//!   externally imposed id.
//! - **Vouched id**: an explicitly assigned id bound to its contents by a
//!   voucher `hash(deleteTokenId ++ objectId ++ dataHash)`. Tombstones use
//!   this mode so they keep the id of the object they replace.
//!
//! Possession of a secret delete token whose hash equals the object's
//! delete-token-id authorises deletion.

pub mod types;
pub mod verify;

pub use types::ObjectId;
pub use verify::{IdentityFields, compute_object_id, content_id, delete_token_valid, voucher_for};

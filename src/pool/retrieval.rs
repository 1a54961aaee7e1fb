use std::sync::Arc;

use super::protocol::RetrieveRequest;
use crate::error::{IdentityError, PoolError};
use crate::identity::ObjectId;
use crate::node::message::{Operation, Payload};
use crate::node::service::PoolNode;
use crate::object::PoolObject;
use crate::object::capability::Retrievable;

/// Fetches an object from wherever it is published.
///
/// The copy is verified against the requested id before the handler sees
/// it, and deleted copies are refused.
pub async fn retrieve<H: Retrievable + ?Sized>(
    handler: &H,
    node: &Arc<PoolNode>,
    object_id: ObjectId,
) -> Result<PoolObject, PoolError> {
    let reply = node
        .send_to_object(
            object_id,
            handler.type_name(),
            Operation::RetrieveLocalObject,
            Payload::Retrieve(RetrieveRequest { object_id }),
        )
        .await?;

    let Payload::Object(object) = reply else {
        return Err(PoolError::Transport(format!(
            "retrieve of {} answered with an unexpected payload",
            object_id.short()
        )));
    };

    if object.object_id()? != object_id {
        return Err(IdentityError::InvalidObjectIdentity {
            declared: object_id,
        }
        .into());
    }

    handler.accept_retrieved(&object_id, &object)?;
    Ok(object)
}

/// Serves a retrieve from the local store.
pub async fn retrieve_local_object(
    node: &Arc<PoolNode>,
    request: &RetrieveRequest,
) -> Result<Payload, PoolError> {
    let object = node.store().get(&request.object_id).await?;
    Ok(Payload::Object(object))
}

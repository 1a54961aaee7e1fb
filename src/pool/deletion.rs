//! Deletion by anti-object.
//!
//! A copy is never simply removed. Its holder converts it into a tombstone
//! under a validated delete token and republishes it. The root sees the
//! exposed token in the publish and fans the deletion out to every other
//! publisher it knows about.

use std::sync::Arc;

use super::protocol::DeleteRequest;
use crate::clock::now_secs;
use crate::error::PoolError;
use crate::identity::{ObjectId, delete_token_valid};
use crate::membership::types::NodeId;
use crate::node::message::{Operation, Payload, Status};
use crate::node::service::PoolNode;
use crate::object::ObjectMetadata;
use crate::object::capability::Deleteable;
use crate::publish::protocol::PublishRequest;

/// Decides whether `proffered` may delete an object with `metadata`.
///
/// `Gone` means the object is already a tombstone for this token.
pub fn object_is_deleteable(metadata: &ObjectMetadata, proffered: &ObjectId) -> Status {
    let Some(token_id) = metadata.delete_token_id else {
        return Status::Forbidden;
    };
    if metadata.delete_token == Some(*proffered) {
        return Status::Gone;
    }
    if !delete_token_valid(proffered, &token_id) {
        return Status::Unauthorized;
    }
    Status::Ok
}

fn refusal(verdict: Status, object_id: ObjectId) -> PoolError {
    match verdict {
        Status::Gone => PoolError::DeletedObject(object_id),
        Status::Unauthorized => PoolError::Unauthorized(object_id),
        _ => PoolError::Forbidden(object_id),
    }
}

/// Deletes an object pool-wide.
///
/// Returns the outcome at the first holder reached: `Ok`, `Gone`,
/// `Unauthorized` or `Forbidden`. Any other failure is an error. The
/// remaining copies are converted by the root's fan-out.
pub async fn delete_object<H: Deleteable + ?Sized>(
    handler: &H,
    node: &Arc<PoolNode>,
    object_id: ObjectId,
    delete_token: ObjectId,
    time_to_live: i64,
) -> Result<Status, PoolError> {
    let request = DeleteRequest {
        object_id,
        delete_token,
        time_to_live,
    };

    let result = node
        .send_to_object(
            object_id,
            handler.type_name(),
            Operation::DeleteLocalObject,
            Payload::Delete(request),
        )
        .await;

    match result {
        Ok(_) => {
            tracing::info!("Deleted object {}", object_id.short());
            Ok(Status::Ok)
        }
        Err(e) => match e.status() {
            status @ (Status::Gone | Status::Unauthorized | Status::Forbidden) => {
                tracing::info!("Delete of {}: {:?}", object_id.short(), status);
                Ok(status)
            }
            _ => Err(e),
        },
    }
}

/// Converts the local copy into its anti-object.
///
/// The lock is always released, so the current state of the copy is
/// republished whatever the verdict.
pub async fn delete_local_object<H: Deleteable + ?Sized>(
    handler: &H,
    node: &Arc<PoolNode>,
    request: &DeleteRequest,
) -> Result<Payload, PoolError> {
    let object_id = request.object_id;
    let store = node.store();

    // Waits for any other holder of the copy. The root's fan-out lock is
    // only tried, so a release publishing back to the root never blocks here.
    let (guard, object) = store.get_and_lock(object_id).await?;

    let converted = match object_is_deleteable(&object.metadata, &request.delete_token) {
        Status::Ok => {
            let mut tombstone = object.clone();
            handler
                .create_anti_object(&mut tombstone, request.delete_token, request.time_to_live)
                .and_then(|_| Ok(store.update(&guard, &mut tombstone)?))
                .map(|()| tombstone)
        }
        verdict => Err(refusal(verdict, object_id)),
    };

    let advertised = converted.as_ref().unwrap_or(&object);
    let released = store.release(guard, advertised).await;

    converted?;
    released?;
    tracing::info!(
        "Object {} converted to anti-object on {}",
        object_id.short(),
        node.address()
    );
    Ok(Payload::Empty)
}

/// Inspects a publish request for exposed delete tokens.
///
/// Each validated token starts a deletion fan-out, unless a fan-out for the
/// same id is already running here.
pub async fn publish_object_helper<H: Deleteable + ?Sized>(
    handler: &H,
    node: &Arc<PoolNode>,
    request: &PublishRequest,
) {
    for (object_id, metadata) in &request.objects {
        let Some(delete_token) = metadata.delete_token else {
            continue;
        };
        if !metadata.delete_token_is_valid() {
            tracing::warn!(
                "Ignoring invalid delete token for {} from {}",
                object_id.short(),
                request.publisher
            );
            continue;
        }

        let Some(_fan_out) = handler.delete_locks().try_lock(*object_id) else {
            tracing::debug!("Deletion of {} already fanning out", object_id.short());
            continue;
        };

        let time_to_live = metadata.remaining_ttl(now_secs()).max(1);
        delete_back_pointers(
            handler,
            node,
            *object_id,
            delete_token,
            time_to_live,
            &request.publisher.id,
        )
        .await;
    }
}

/// Sends the deletion to every publisher of `object_id` except this node,
/// `excluded`, and those whose record already echoes `delete_token`.
///
/// A copy held here is converted inline. Failures are logged and the sweep
/// carries on.
pub async fn delete_back_pointers<H: Deleteable + ?Sized>(
    handler: &H,
    node: &Arc<PoolNode>,
    object_id: ObjectId,
    delete_token: ObjectId,
    time_to_live: i64,
    excluded: &NodeId,
) {
    let request = DeleteRequest {
        object_id,
        delete_token,
        time_to_live,
    };
    let local = node.id();

    if local != *excluded && node.store().contains(&object_id) {
        match delete_local_object(handler, node, &request).await {
            Ok(_) => {}
            Err(e) if e.status() == Status::Gone => {}
            Err(e) => tracing::warn!("Local delete of {} failed: {}", object_id.short(), e),
        }
    }

    for record in node.publishers().get_publishers(&object_id) {
        let target = record.publisher.id;
        if target == local || target == *excluded || record.delete_token == Some(delete_token) {
            continue;
        }

        let result = node
            .send_to_node_exactly(
                target,
                object_id,
                handler.type_name(),
                Operation::DeleteLocalObject,
                Payload::Delete(request.clone()),
            )
            .await;

        match result {
            Ok(_) => tracing::debug!(
                "Deletion of {} sent to {}",
                object_id.short(),
                record.publisher
            ),
            Err(e) if e.status() == Status::Gone => {}
            Err(e) => tracing::warn!(
                "Deletion of {} at {} failed: {}",
                object_id.short(),
                record.publisher,
                e
            ),
        }
    }
}

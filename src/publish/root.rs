//! Root-side handling of publish requests.

use std::sync::Arc;

use super::protocol::{PublishRequest, PublishResponse};
use super::publishers::PublishRecord;
use crate::clock::now_secs;
use crate::error::PoolError;
use crate::node::message::{Operation, Payload};
use crate::node::routing;
use crate::node::service::PoolNode;
use crate::object::capability::Deleteable;
use crate::pool::deletion;

/// Accepts a publish request at the root of its objects.
///
/// Exposed delete tokens trigger the deletion fan-out, then the request is
/// mirrored to the root's successors. The caller records the backpointers
/// once this reply travels back as a success.
///
/// A backup copy only records backpointers. Its fan-out would reach holders
/// still releasing the copy whose publish started it.
pub async fn accept_publish<H: Deleteable + ?Sized>(
    handler: &H,
    node: &Arc<PoolNode>,
    request: &PublishRequest,
) -> Result<Payload, PoolError> {
    if !request.backup {
        deletion::publish_object_helper(handler, node, request).await;
    }
    publish_object_backup(handler, node, request).await;

    Ok(Payload::PublishAck(PublishResponse {
        responder: node.address().clone(),
        object_ids: request.objects.keys().copied().collect(),
    }))
}

/// Records a backup copy locally, or forwards the request to the next
/// `backup_publish_count` nodes after this one.
pub async fn publish_object_backup<H: Deleteable + ?Sized>(
    handler: &H,
    node: &Arc<PoolNode>,
    request: &PublishRequest,
) {
    if request.backup {
        let now = now_secs();
        for (object_id, metadata) in &request.objects {
            let record = PublishRecord::from_publish(*object_id, request, metadata, now);
            node.publishers().update(record).await;
        }
        return;
    }

    let mut backup = request.clone();
    backup.backup = true;

    let count = node.config().backup_publish_count;
    let successors = routing::successors(&node.id(), &node.known_nodes(), count);
    for successor in successors {
        let result = node
            .send_to_node_exactly(
                successor.id,
                successor.id.0,
                handler.type_name(),
                Operation::PublishObject,
                Payload::Publish(backup.clone()),
            )
            .await;
        if let Err(e) = result {
            tracing::warn!("Backup publish to {} failed: {}", successor, e);
        }
    }
}

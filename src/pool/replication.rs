//! Replica placement and repair.
//!
//! `store_object` places N copies on distinct nodes. Failures are sorted
//! into two classes: a pool-fatal error means the object can never be stored
//! and aborts the whole operation, anything else only rules out the node
//! that raised it, which is excluded from the next selection round.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::protocol::{ReplicateRequest, StoreReply};
use crate::clock::now_secs;
use crate::error::{PoolError, StoreError};
use crate::identity::ObjectId;
use crate::membership::types::{NodeAddress, NodeId};
use crate::node::message::{Operation, Payload};
use crate::node::service::PoolNode;
use crate::object::PoolObject;
use crate::object::capability::{Replicatable, Storable};
use crate::publish::protocol::UnpublishRequest;

/// How replica stores within one selection round are issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parallelism {
    Sequential,
    /// One task per candidate.
    Parallel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreReceipt {
    pub object_id: ObjectId,
    pub stored_on: Vec<NodeAddress>,
}

/// Stores `replicas` copies of `object` on distinct nodes outside `excluded`.
///
/// `replicas` of `None` takes the count from the handler. Fails with
/// `NoSpace` once no candidates remain or the round budget is spent.
pub async fn store_object<H: Storable + ?Sized>(
    handler: &H,
    node: &Arc<PoolNode>,
    object: PoolObject,
    replicas: Option<usize>,
    mut excluded: HashSet<NodeId>,
    parallelism: Parallelism,
) -> Result<StoreReceipt, PoolError> {
    handler.validate(&object)?;
    let object_id = object.object_id()?;
    let wanted = replicas.unwrap_or_else(|| handler.replication_store(&object));
    let rounds = node.config().max_replication_rounds.max(1);
    let mut stored_on: Vec<NodeAddress> = Vec::with_capacity(wanted);

    for round in 0..rounds {
        if stored_on.len() >= wanted {
            break;
        }

        let candidates = node
            .directory()
            .select(wanted - stored_on.len(), &excluded);
        if candidates.is_empty() {
            tracing::warn!(
                "No candidates left for {} after {} round(s)",
                object_id.short(),
                round
            );
            break;
        }
        excluded.extend(candidates.iter().map(|candidate| candidate.id));

        tracing::debug!(
            "Round {}: storing {} on {} node(s)",
            round,
            object_id.short(),
            candidates.len()
        );

        let stored = match parallelism {
            Parallelism::Sequential => {
                store_sequential(node, handler.type_name(), &object, candidates).await?
            }
            Parallelism::Parallel => {
                store_parallel(node, handler.type_name(), &object, candidates).await?
            }
        };
        stored_on.extend(stored);
    }

    if stored_on.len() < wanted {
        return Err(PoolError::NoSpace {
            object_id,
            stored: stored_on.len(),
            wanted,
        });
    }

    tracing::info!(
        "Stored {} on {} node(s)",
        object_id.short(),
        stored_on.len()
    );
    Ok(StoreReceipt {
        object_id,
        stored_on,
    })
}

async fn store_sequential(
    node: &Arc<PoolNode>,
    service: &str,
    object: &PoolObject,
    candidates: Vec<NodeAddress>,
) -> Result<Vec<NodeAddress>, PoolError> {
    let mut stored = Vec::new();
    for candidate in candidates {
        let result = store_on(
            node.clone(),
            service.to_string(),
            candidate.clone(),
            object.clone(),
        )
        .await;
        if let Some(holder) = classify(&candidate, result)? {
            stored.push(holder);
        }
    }
    Ok(stored)
}

async fn store_parallel(
    node: &Arc<PoolNode>,
    service: &str,
    object: &PoolObject,
    candidates: Vec<NodeAddress>,
) -> Result<Vec<NodeAddress>, PoolError> {
    let (tx, mut rx) = mpsc::channel(candidates.len().max(1));
    let mut pending = candidates.len();

    for candidate in candidates {
        let tx = tx.clone();
        let node = node.clone();
        let service = service.to_string();
        let object = object.clone();
        tokio::spawn(async move {
            let result = store_on(node, service, candidate.clone(), object).await;
            let _ = tx.send((candidate, result)).await;
        });
    }
    drop(tx);

    let warn_after = Duration::from_millis(node.config().replica_wait_warn_millis.max(1));
    let mut stored = Vec::new();

    while pending > 0 {
        match tokio::time::timeout(warn_after, rx.recv()).await {
            Ok(Some((candidate, result))) => {
                pending -= 1;
                // A pool-fatal error returns here, leaving the other tasks
                // to finish unobserved.
                if let Some(holder) = classify(&candidate, result)? {
                    stored.push(holder);
                }
            }
            Ok(None) => break,
            Err(_) => tracing::warn!(
                "Still waiting on {} replica store(s) after {}ms",
                pending,
                warn_after.as_millis()
            ),
        }
    }

    Ok(stored)
}

async fn store_on(
    node: Arc<PoolNode>,
    service: String,
    candidate: NodeAddress,
    object: PoolObject,
) -> Result<StoreReply, PoolError> {
    let subject = object.object_id()?;
    let reply = node
        .send_to_node_exactly(
            candidate.id,
            subject,
            &service,
            Operation::StoreLocalObject,
            Payload::Store(object),
        )
        .await?;

    match reply {
        Payload::Stored(reply) => Ok(reply),
        _ => Err(PoolError::Transport(format!(
            "store on {} answered with an unexpected payload",
            candidate
        ))),
    }
}

/// Sorts one replica outcome: the holder on success, `None` for a failure
/// confined to that node, an error when the whole operation must stop.
fn classify(
    candidate: &NodeAddress,
    result: Result<StoreReply, PoolError>,
) -> Result<Option<NodeAddress>, PoolError> {
    match result {
        Ok(reply) => Ok(Some(reply.holder)),
        Err(e) if e.is_pool_fatal() => {
            tracing::warn!("Store on {} failed pool-wide: {}", candidate, e);
            Err(e)
        }
        Err(e) if e.is_store_local() => {
            tracing::debug!("Store on {} refused: {}", candidate, e);
            Ok(None)
        }
        Err(e) => {
            tracing::warn!("Store on {} failed: {}", candidate, e);
            Ok(None)
        }
    }
}

/// Stores one replica on this node and publishes it.
///
/// A copy already held here is replaced by the new one.
pub async fn store_local_object<H: Storable + ?Sized>(
    handler: &H,
    node: &Arc<PoolNode>,
    mut object: PoolObject,
) -> Result<Payload, PoolError> {
    handler.validate(&object)?;

    let object_id = object.object_id()?;
    let guard = node.store().lock(object_id).await;
    node.store().store(&guard, &mut object)?;
    node.store().release(guard, &object).await?;

    tracing::debug!("Holding {} on {}", object_id.short(), node.address());
    Ok(Payload::Stored(StoreReply {
        object_id,
        holder: node.address().clone(),
    }))
}

/// Places one more copy of a locally held object.
///
/// The copy keeps the source's expiry. A copy with no time left is not
/// replicated.
pub async fn replicate_object<H: Replicatable + ?Sized>(
    handler: &H,
    node: &Arc<PoolNode>,
    request: &ReplicateRequest,
) -> Result<Payload, PoolError> {
    let object_id = request.object_id;
    let mut object = node.store().get(&object_id).await?;

    let remaining = object.remaining_ttl(now_secs());
    if remaining < 1 {
        tracing::debug!("Not replicating expired object {}", object_id.short());
        return Err(StoreError::NotFound(object_id).into());
    }
    object.metadata.time_to_live = remaining;

    let mut excluded: HashSet<NodeId> = request.excluded.iter().copied().collect();
    excluded.insert(node.id());

    let receipt = store_object(
        handler,
        node,
        object,
        Some(handler.repair_replicas()),
        excluded,
        Parallelism::Sequential,
    )
    .await?;
    Ok(Payload::Receipt(receipt))
}

/// Runs at the root when a holder unpublishes a typed object.
///
/// Of the remaining live publishers, the one whose copy expires last is
/// asked to make a new replica away from every known holder.
pub async fn unpublish_object_root_helper<H: Replicatable + ?Sized>(
    handler: &H,
    node: &Arc<PoolNode>,
    request: &UnpublishRequest,
) -> Result<(), PoolError> {
    let now = now_secs();

    for object_id in &request.object_ids {
        let publishers = node.publishers().get_publishers(object_id);

        let source = publishers
            .iter()
            .filter(|record| record.publisher.id != request.publisher.id)
            .filter(|record| record.seconds_until_expired(now) > 0)
            .max_by_key(|record| record.object_expire_secs);
        let Some(source) = source else {
            tracing::debug!("No publisher left to re-replicate {}", object_id.short());
            continue;
        };

        let mut excluded: Vec<NodeId> =
            publishers.iter().map(|record| record.publisher.id).collect();
        if !excluded.contains(&request.publisher.id) {
            excluded.push(request.publisher.id);
        }

        let result = node
            .send_to_node_exactly(
                source.publisher.id,
                *object_id,
                handler.type_name(),
                Operation::ReplicateObject,
                Payload::Replicate(ReplicateRequest {
                    object_id: *object_id,
                    excluded,
                }),
            )
            .await;

        match result {
            Ok(_) => tracing::info!(
                "Re-replicated {} from {} after {} left",
                object_id.short(),
                source.publisher,
                request.publisher
            ),
            Err(e) => tracing::warn!(
                "Re-replication of {} from {} failed: {}",
                object_id.short(),
                source.publisher,
                e
            ),
        }
    }

    Ok(())
}

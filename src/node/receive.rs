//! Per-hop message handling.
//!
//! Every routed message, local or remote in origin, enters a node through
//! [`PoolNode::receive`]. The node either forwards it one hop closer to its
//! destination or dispatches it to the named service, and the reply travels
//! back along the same path.

use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;

use super::message::{Message, MessageKind, Operation, Payload, Status};
use super::routing;
use super::service::{PUBLISH_SERVICE, PoolNode};
use crate::clock::now_secs;
use crate::error::{PoolError, StoreError};
use crate::membership::types::{NodeAddress, NodeId};
use crate::publish::protocol::PublishRequest;
use crate::publish::publishers::PublishRecord;

impl PoolNode {
    /// Handles one hop of `message` and returns the reply for the sender.
    pub fn receive(self: &Arc<Self>, message: Message) -> BoxFuture<'static, Message> {
        let node = self.clone();
        async move { node.route(message).await }.boxed()
    }

    async fn route(self: Arc<Self>, message: Message) -> Message {
        if message.ttl < 0 {
            let error = PoolError::TtlExceeded(message.id.clone());
            return message.compose_error(self.address(), &error);
        }

        match message.kind {
            MessageKind::Reply => {
                let error = PoolError::BadRequest(format!("stray reply {}", message.id));
                message.compose_error(self.address(), &error)
            }
            MessageKind::RouteToNode if message.exact => self.route_exact(message).await,
            MessageKind::RouteToNode => self.route_to_root(message).await,
            MessageKind::RouteToObject => self.route_to_object(message).await,
            MessageKind::PublishObject => {
                let request = match &message.payload {
                    Payload::Publish(request) => Some(request.clone()),
                    _ => None,
                };
                let reply = self.clone().route_to_root(message).await;
                // Only an accepted publish leaves a backpointer behind.
                if reply.status.is_success()
                    && let Some(request) = request
                {
                    self.record_publish(&request).await;
                }
                reply
            }
            MessageKind::UnpublishObject => {
                if let Payload::Unpublish(request) = &message.payload {
                    for object_id in &request.object_ids {
                        self.publishers()
                            .remove(*object_id, &request.publisher.id)
                            .await;
                    }
                }
                self.route_to_root(message).await
            }
        }
    }

    async fn record_publish(&self, request: &PublishRequest) {
        let now = now_secs();
        for (object_id, metadata) in &request.objects {
            let record = PublishRecord::from_publish(*object_id, request, metadata, now);
            self.publishers().update(record).await;
        }
    }

    /// Forwards toward the node closest to the destination, or dispatches
    /// here when no reachable node is closer.
    async fn route_to_root(self: Arc<Self>, message: Message) -> Message {
        let hops = routing::next_hops(&self.id(), &message.destination, &self.known_nodes());
        match self.transmit(&message, hops).await {
            Ok(reply) => reply,
            Err(_) => self.dispatch(message).await,
        }
    }

    async fn route_exact(self: Arc<Self>, message: Message) -> Message {
        if message.destination == self.id().0 {
            return self.dispatch(message).await;
        }

        let target = NodeId(message.destination);
        let Some(address) = self.directory().lookup(&target) else {
            let error = PoolError::NoSuchNode(message.destination);
            return message.compose_error(self.address(), &error);
        };

        match self.transmit(&message, vec![address]).await {
            Ok(reply) => reply,
            Err(e) => message.compose_error(self.address(), &e),
        }
    }

    /// Serves from the local store, else asks the holders this node knows
    /// about, else forwards toward the subject's root.
    async fn route_to_object(self: Arc<Self>, message: Message) -> Message {
        let subject = message.subject;
        if self.store().contains(&subject) {
            return self.dispatch(message).await;
        }

        let holders: Vec<NodeAddress> = self
            .publishers()
            .get_publishers(&subject)
            .into_iter()
            .map(|record| record.publisher)
            .filter(|publisher| publisher.id != self.id())
            .collect();

        let mut last_reply = None;
        for holder in holders {
            let mut direct = message.clone();
            direct.kind = MessageKind::RouteToNode;
            direct.exact = true;
            direct.destination = holder.id.0;

            match self.transmit(&direct, vec![holder.clone()]).await {
                Ok(reply) if reply.status != Status::NotFound => return reply,
                Ok(reply) => last_reply = Some(reply),
                Err(e) => {
                    tracing::debug!("Holder {} of {} unreachable: {}", holder, subject.short(), e)
                }
            }
        }

        let hops = routing::next_hops(&self.id(), &subject, &self.known_nodes());
        if let Ok(reply) = self.transmit(&message, hops).await {
            return reply;
        }

        last_reply.unwrap_or_else(|| {
            let error = PoolError::Store(StoreError::NotFound(subject));
            message.compose_error(self.address(), &error)
        })
    }

    /// Tries each candidate in turn. A candidate that cannot be reached is
    /// reported to the directory before the next one is tried.
    async fn transmit(
        &self,
        message: &Message,
        candidates: Vec<NodeAddress>,
    ) -> Result<Message, PoolError> {
        let mut last_error = PoolError::NoSuchNode(message.destination);

        for candidate in candidates {
            let mut forwarded = message.clone();
            forwarded.ttl -= 1;

            match self.transport().deliver(&candidate, forwarded).await {
                Ok(reply) => return Ok(reply),
                Err(e) => {
                    tracing::warn!("Hop to {} failed, marking unreachable: {}", candidate, e);
                    self.directory().mark_unreachable(&candidate.id);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    async fn dispatch(self: Arc<Self>, message: Message) -> Message {
        let result = if message.service == PUBLISH_SERVICE {
            self.handle_publish_service(&message)
        } else {
            match self.handlers().get(&message.service) {
                Some(handler) => handler.handle(&self, &message).await,
                None => Err(PoolError::UnknownObjectType(message.service.clone())),
            }
        };

        match result {
            Ok(payload) => message.compose_reply(self.address(), payload),
            Err(e) => {
                tracing::debug!(
                    "{:?} for {} failed on {}: {}",
                    message.operation,
                    message.subject.short(),
                    self.address(),
                    e
                );
                message.compose_error(self.address(), &e)
            }
        }
    }

    /// Untyped requests answered from the publisher registry alone.
    fn handle_publish_service(&self, message: &Message) -> Result<Payload, PoolError> {
        match message.operation {
            Operation::UnpublishObject => Ok(Payload::Empty),
            Operation::GetPublishers => Ok(Payload::Publishers(
                self.publishers().get_publishers(&message.subject),
            )),
            operation => Err(PoolError::BadRequest(format!(
                "{} service cannot handle {:?}",
                PUBLISH_SERVICE, operation
            ))),
        }
    }
}

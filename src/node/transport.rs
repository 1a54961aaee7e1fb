//! Message delivery between nodes.
//!
//! A transport moves one [`Message`] to a node and returns its reply. A
//! delivery error means the node could not be reached. Failures raised by
//! the remote handler come back as an ordinary reply with a non-OK status.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use super::message::Message;
use super::service::PoolNode;
use crate::error::PoolError;
use crate::membership::types::{NodeAddress, NodeId};

/// Path of the inbound message endpoint on every node.
pub const MESSAGE_ENDPOINT: &str = "/internal/message";

#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, to: &NodeAddress, message: Message) -> Result<Message, PoolError>;
}

/// JSON over HTTP POST, retried with backoff.
pub struct HttpTransport {
    http_client: reqwest::Client,
    timeout: Duration,
    attempts: usize,
}

impl HttpTransport {
    pub fn new(timeout: Duration, attempts: usize) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            timeout,
            attempts: attempts.max(1),
        }
    }

    async fn post_with_retry(
        &self,
        url: String,
        payload: &Message,
    ) -> Result<reqwest::Response, PoolError> {
        let mut delay_ms = 150u64;

        for attempt in 0..self.attempts {
            let response = self
                .http_client
                .post(url.clone())
                .json(payload)
                .timeout(self.timeout)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == self.attempts {
                        return Err(PoolError::Transport(e.to_string()));
                    }
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(PoolError::Transport("Retry attempts exhausted".to_string()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn deliver(&self, to: &NodeAddress, message: Message) -> Result<Message, PoolError> {
        let url = format!("http://{}{}", to.http_addr, MESSAGE_ENDPOINT);
        let response = self.post_with_retry(url, &message).await?;

        if !response.status().is_success() {
            return Err(PoolError::Transport(format!(
                "{} answered HTTP {}",
                to,
                response.status()
            )));
        }

        response
            .json::<Message>()
            .await
            .map_err(|e| PoolError::Transport(format!("unreadable reply from {}: {}", to, e)))
    }
}

/// Delivers between nodes living in the same process.
///
/// Messages still pass through their JSON form, so anything that would not
/// survive the wire fails here too. Nodes can be taken offline to simulate
/// failures.
#[derive(Default)]
pub struct LocalTransport {
    nodes: DashMap<NodeId, Weak<PoolNode>>,
    offline: DashSet<NodeId>,
}

impl LocalTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, node: &Arc<PoolNode>) {
        self.nodes.insert(node.id(), Arc::downgrade(node));
    }

    pub fn set_offline(&self, id: NodeId, offline: bool) {
        if offline {
            self.offline.insert(id);
        } else {
            self.offline.remove(&id);
        }
    }
}

fn through_json(message: &Message) -> Result<Message, PoolError> {
    let json = serde_json::to_vec(message)
        .map_err(|e| PoolError::Transport(format!("unencodable message: {}", e)))?;
    serde_json::from_slice(&json)
        .map_err(|e| PoolError::Transport(format!("undecodable message: {}", e)))
}

#[async_trait]
impl Transport for LocalTransport {
    async fn deliver(&self, to: &NodeAddress, message: Message) -> Result<Message, PoolError> {
        if self.offline.contains(&to.id) {
            return Err(PoolError::Transport(format!("{} is offline", to)));
        }
        let node = self
            .nodes
            .get(&to.id)
            .and_then(|entry| entry.value().upgrade())
            .ok_or_else(|| PoolError::Transport(format!("{} is not registered", to)))?;

        let inbound = through_json(&message)?;
        let reply = node.receive(inbound).await;
        through_json(&reply)
    }
}

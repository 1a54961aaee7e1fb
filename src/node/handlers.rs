use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::message::{Message, Status};
use super::service::PoolNode;
use super::transport::MESSAGE_ENDPOINT;
use crate::error::PoolError;
use crate::identity::ObjectId;
use crate::object::{BlockObjectHandler, ObjectSummary};
use crate::pool::replication::Parallelism;
use crate::publish::daemon::{DaemonStatsSnapshot, LocalSweep, PublishDaemon};
use crate::publish::publishers::PublishRecord;

#[derive(Debug, Deserialize)]
pub struct StoreBlockRequest {
    #[serde(default)]
    pub offset: u64,
    pub data: Vec<u8>,
    pub delete_token_id: Option<ObjectId>,
    pub time_to_live: Option<i64>,
    pub replicas: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct StoreBlockResponse {
    pub object_id: Option<ObjectId>,
    pub stored_on: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GetBlockResponse {
    pub offset: Option<u64>,
    pub data: Option<Vec<u8>>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteBlockRequest {
    pub delete_token: ObjectId,
    pub time_to_live: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct DeleteBlockResponse {
    pub status: Option<Status>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SweepResponse<T> {
    pub ran: bool,
    pub result: Option<T>,
}

/// Default lifetime of a tombstone created over HTTP.
const DEFAULT_TOMBSTONE_SECONDS: i64 = 86_400;

fn status_code(error: &PoolError) -> StatusCode {
    StatusCode::from_u16(error.status().http_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

pub fn router(
    node: Arc<PoolNode>,
    blocks: Arc<BlockObjectHandler>,
    daemon: Arc<PublishDaemon>,
) -> Router {
    Router::new()
        .route(MESSAGE_ENDPOINT, post(handle_message))
        .route("/objects", post(handle_store_block).get(handle_list_objects))
        .route("/objects/:id", get(handle_get_block))
        .route("/objects/:id/delete", post(handle_delete_block))
        .route("/publishers/:id", get(handle_get_publishers))
        .route("/daemon/publish", post(handle_publish_now))
        .route("/daemon/expire", post(handle_expire_now))
        .route("/daemon/stats", get(handle_daemon_stats))
        .layer(Extension(node))
        .layer(Extension(blocks))
        .layer(Extension(daemon))
}

pub async fn handle_message(
    Extension(node): Extension<Arc<PoolNode>>,
    Json(message): Json<Message>,
) -> (StatusCode, Json<Message>) {
    let reply = node.receive(message).await;
    (StatusCode::OK, Json(reply))
}

pub async fn handle_store_block(
    Extension(node): Extension<Arc<PoolNode>>,
    Extension(blocks): Extension<Arc<BlockObjectHandler>>,
    Json(req): Json<StoreBlockRequest>,
) -> (StatusCode, Json<StoreBlockResponse>) {
    let replicas = req
        .replicas
        .unwrap_or(node.config().default_replication_store);
    let time_to_live = req
        .time_to_live
        .unwrap_or(crate::object::TIME_TO_LIVE_FOREVER);

    let result = match blocks.create_block(
        req.offset,
        req.data,
        req.delete_token_id,
        time_to_live,
        replicas,
    ) {
        Ok(block) => blocks.store(&node, block, Parallelism::Parallel).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(receipt) => (
            StatusCode::OK,
            Json(StoreBlockResponse {
                object_id: Some(receipt.object_id),
                stored_on: receipt.stored_on.iter().map(|n| n.to_string()).collect(),
                error: None,
            }),
        ),
        Err(e) => {
            tracing::error!("Failed to store block: {}", e);
            (
                status_code(&e),
                Json(StoreBlockResponse {
                    object_id: None,
                    stored_on: vec![],
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

pub async fn handle_get_block(
    Extension(node): Extension<Arc<PoolNode>>,
    Extension(blocks): Extension<Arc<BlockObjectHandler>>,
    Path(id): Path<String>,
) -> (StatusCode, Json<GetBlockResponse>) {
    let object_id: ObjectId = match id.parse() {
        Ok(id) => id,
        Err(e) => {
            tracing::error!("Failed to parse object id: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(GetBlockResponse {
                    offset: None,
                    data: None,
                    error: Some(format!("bad object id: {}", e)),
                }),
            );
        }
    };

    match blocks.retrieve(&node, object_id).await {
        Ok(contents) => (
            StatusCode::OK,
            Json(GetBlockResponse {
                offset: Some(contents.offset),
                data: Some(contents.data),
                error: None,
            }),
        ),
        Err(e) => (
            status_code(&e),
            Json(GetBlockResponse {
                offset: None,
                data: None,
                error: Some(e.to_string()),
            }),
        ),
    }
}

pub async fn handle_delete_block(
    Extension(node): Extension<Arc<PoolNode>>,
    Extension(blocks): Extension<Arc<BlockObjectHandler>>,
    Path(id): Path<String>,
    Json(req): Json<DeleteBlockRequest>,
) -> (StatusCode, Json<DeleteBlockResponse>) {
    let object_id: ObjectId = match id.parse() {
        Ok(id) => id,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(DeleteBlockResponse {
                    status: None,
                    error: Some(format!("bad object id: {}", e)),
                }),
            );
        }
    };
    let time_to_live = req.time_to_live.unwrap_or(DEFAULT_TOMBSTONE_SECONDS);

    match blocks
        .delete(&node, object_id, req.delete_token, time_to_live)
        .await
    {
        Ok(status) => {
            let code = StatusCode::from_u16(status.http_code()).unwrap_or(StatusCode::OK);
            (
                code,
                Json(DeleteBlockResponse {
                    status: Some(status),
                    error: None,
                }),
            )
        }
        Err(e) => (
            status_code(&e),
            Json(DeleteBlockResponse {
                status: Some(e.status()),
                error: Some(e.to_string()),
            }),
        ),
    }
}

/// Publish records held on this node, not at the root.
pub async fn handle_get_publishers(
    Extension(node): Extension<Arc<PoolNode>>,
    Path(id): Path<String>,
) -> (StatusCode, Json<Vec<PublishRecord>>) {
    match id.parse::<ObjectId>() {
        Ok(object_id) => (
            StatusCode::OK,
            Json(node.publishers().get_publishers(&object_id)),
        ),
        Err(_) => (StatusCode::BAD_REQUEST, Json(vec![])),
    }
}

pub async fn handle_list_objects(
    Extension(node): Extension<Arc<PoolNode>>,
) -> (StatusCode, Json<Vec<ObjectSummary>>) {
    let mut summaries = Vec::new();
    for object_id in node.store().ids() {
        let object = match node.store().get(&object_id).await {
            Ok(object) => object,
            Err(e) => {
                tracing::debug!("Skipping {} in listing: {}", object_id.short(), e);
                continue;
            }
        };
        let summary = node
            .handlers()
            .get(object.object_type())
            .and_then(|handler| handler.summarize(object_id, &object));
        if let Some(summary) = summary {
            summaries.push(summary);
        }
    }
    (StatusCode::OK, Json(summaries))
}

pub async fn handle_publish_now(
    Extension(daemon): Extension<Arc<PublishDaemon>>,
) -> (StatusCode, Json<SweepResponse<LocalSweep>>) {
    match daemon.publish_now().await {
        Some(sweep) => (
            StatusCode::OK,
            Json(SweepResponse {
                ran: true,
                result: Some(sweep),
            }),
        ),
        None => (
            StatusCode::CONFLICT,
            Json(SweepResponse {
                ran: false,
                result: None,
            }),
        ),
    }
}

pub async fn handle_expire_now(
    Extension(daemon): Extension<Arc<PublishDaemon>>,
) -> (StatusCode, Json<SweepResponse<usize>>) {
    match daemon.expire_now().await {
        Some(expired) => (
            StatusCode::OK,
            Json(SweepResponse {
                ran: true,
                result: Some(expired),
            }),
        ),
        None => (
            StatusCode::CONFLICT,
            Json(SweepResponse {
                ran: false,
                result: None,
            }),
        ),
    }
}

pub async fn handle_daemon_stats(
    Extension(daemon): Extension<Arc<PublishDaemon>>,
) -> (StatusCode, Json<DaemonStatsSnapshot>) {
    (StatusCode::OK, Json(daemon.stats()))
}

//! Grid introspection and control: sessions, queue, node membership

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

use super::ApiState;
use super::error::ApiError;
use crate::Error;
use crate::data::{NodeId, SessionId};
use crate::node::RemoteNode;

#[derive(Debug, Deserialize)]
pub struct AddNodeRequest {
    pub uri: Url,
}

async fn list_sessions(State(state): State<Arc<ApiState>>) -> Json<Value> {
    let sessions = state.distributor.sessions().entries().await;
    Json(json!({
        "value": {
            "count": sessions.len(),
            "sessions": sessions,
        }
    }))
}

async fn get_session(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<SessionId>,
) -> Result<Json<Value>, ApiError> {
    let owner = state.distributor.sessions().get(&id).await?;
    Ok(Json(json!({
        "value": {
            "sessionId": id,
            "nodeUri": owner,
        }
    })))
}

async fn list_queue(State(state): State<Arc<ApiState>>) -> Json<Value> {
    Json(json!({ "value": state.distributor.queue().summaries() }))
}

async fn clear_queue(State(state): State<Arc<ApiState>>) -> Json<Value> {
    let cleared = state.distributor.queue().clear_all();
    tracing::info!(cleared, "new session queue cleared");
    Json(json!({ "value": cleared }))
}

/// Register a node running in another process
async fn add_node(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<AddNodeRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let (node, status) = RemoteNode::connect(state.client.clone(), req.uri).await?;
    let id = state.distributor.add_with_status(Arc::new(node), status);
    Ok((StatusCode::CREATED, Json(json!({ "value": { "nodeId": id } }))))
}

async fn remove_node(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<NodeId>,
) -> Result<Json<Value>, ApiError> {
    if !state.distributor.remove(id).await {
        return Err(Error::NotFound(format!("unknown node {id}")).into());
    }
    Ok(Json(json!({ "value": null })))
}

async fn drain_node(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<NodeId>,
) -> Result<Json<Value>, ApiError> {
    state.distributor.drain(id).await?;
    Ok(Json(json!({ "value": null })))
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/se/grid/sessions", get(list_sessions))
        .route("/se/grid/sessions/{id}", get(get_session))
        .route("/se/grid/queue", get(list_queue).delete(clear_queue))
        .route("/se/grid/distributor/node", post(add_node))
        .route("/se/grid/distributor/node/{id}", delete(remove_node))
        .route("/se/grid/distributor/node/{id}/drain", post(drain_node))
        .with_state(state)
}

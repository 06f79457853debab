//! HTTP surface of a single node, consumed by [`crate::node::RemoteNode`]

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, Method, Uri},
    response::Response,
    routing::{any, delete, get, post},
};
use serde_json::{Value, json};

use super::error::{ApiError, NodeError, unknown_command};
use super::session::{command_request, command_response};
use crate::data::{Capabilities, CreateSessionRequest, CreateSessionResponse, NodeStatus, Session, SessionId};
use crate::node::{HealthCheckResult, LocalNode, Node};

type NodeState = State<Arc<LocalNode>>;

async fn new_session(
    State(node): NodeState,
    Json(request): Json<CreateSessionRequest>,
) -> Result<Json<CreateSessionResponse>, NodeError> {
    Ok(Json(node.new_session(request).await?))
}

async fn get_session(State(node): NodeState, Path(id): Path<SessionId>) -> Result<Json<Session>, NodeError> {
    Ok(Json(node.session(&id).await?))
}

async fn stop_session(State(node): NodeState, Path(id): Path<SessionId>) -> Result<Json<Value>, NodeError> {
    node.stop_session(&id).await?;
    Ok(Json(json!({ "value": null })))
}

async fn is_owner(State(node): NodeState, Path(id): Path<SessionId>) -> Json<Value> {
    Json(json!({ "value": node.is_session_owner(&id).await }))
}

async fn supports(State(node): NodeState, Json(caps): Json<Capabilities>) -> Json<Value> {
    Json(json!({ "value": node.is_supporting(&caps).await }))
}

async fn drain(State(node): NodeState) -> Json<Value> {
    node.drain().await;
    Json(json!({ "value": null }))
}

async fn status(State(node): NodeState) -> Result<Json<NodeStatus>, NodeError> {
    Ok(Json(node.status().await?))
}

async fn health(State(node): NodeState) -> Json<HealthCheckResult> {
    Json(node.health_check().await)
}

/// Pass a client command straight to the session
async fn execute(
    State(node): NodeState,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Result<Response, ApiError> {
    let request = command_request(&method, &uri, &headers, body);
    Ok(command_response(node.execute_command(request).await?))
}

/// Control endpoints the hub calls
pub fn router(node: Arc<LocalNode>) -> Router {
    Router::new()
        .route("/se/grid/node/session", post(new_session))
        .route("/se/grid/node/session/{id}", get(get_session).delete(stop_session))
        .route("/se/grid/node/owner/{id}", get(is_owner))
        .route("/se/grid/node/supports", post(supports))
        .route("/se/grid/node/drain", post(drain))
        .route("/se/grid/node/status", get(status))
        .route("/se/grid/node/health", get(health))
        .with_state(node)
}

/// In-session commands, served when the node runs on its own
pub fn session_router(node: Arc<LocalNode>) -> Router {
    Router::new()
        .route("/session/{id}", delete(execute).fallback(unknown_command))
        .route("/session/{id}/{*rest}", any(execute))
        .with_state(node)
}

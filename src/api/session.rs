//! Client session endpoints: create, command pass-through, delete

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::Response,
    routing::{any, delete, post},
};
use serde_json::Value;

use super::ApiState;
use super::error::{ApiError, unknown_command};
use crate::data::{CommandRequest, CommandResponse, CreateSessionRequest, SessionId};
use crate::Error;

/// Headers that describe one hop and must not be relayed
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "content-length",
    "keep-alive",
    "transfer-encoding",
    "upgrade",
];

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/session", post(new_session).fallback(unknown_command))
        .route("/session/{id}", delete(delete_session).fallback(unknown_command))
        .route("/session/{id}/{*rest}", any(forward))
        .with_state(state)
}

/// Create a session somewhere on the grid, waiting in the queue if needed
async fn new_session(State(state): State<Arc<ApiState>>, body: String) -> Result<Json<Value>, ApiError> {
    let payload: Value = serde_json::from_str(&body)
        .map_err(|e| Error::Unsupported(format!("malformed new session payload: {e}")))?;
    let request = CreateSessionRequest::from_payload(&payload)?;
    let response = state.distributor.new_session(request).await?;
    Ok(Json(response.payload))
}

async fn forward(
    State(state): State<Arc<ApiState>>,
    Path((id, _)): Path<(SessionId, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Result<Response, ApiError> {
    let request = command_request(&method, &uri, &headers, body);
    let response = execute(&state, &id, request).await?;
    Ok(command_response(response))
}

async fn delete_session(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<SessionId>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Result<Response, ApiError> {
    let request = command_request(&method, &uri, &headers, body);
    let response = execute(&state, &id, request).await?;
    if (200..300).contains(&response.status) {
        state.distributor.sessions().remove(&id).await;
        tracing::info!(session_id = %id, "session deleted");
    }
    Ok(command_response(response))
}

/// Look up the owner and hand it the command
async fn execute(state: &ApiState, id: &SessionId, request: CommandRequest) -> crate::Result<CommandResponse> {
    let sessions = state.distributor.sessions();
    let owner = sessions.get(id).await?;
    let Some(node) = state.distributor.node_by_uri(&owner) else {
        sessions.remove(id).await;
        return Err(Error::NotFound(format!("node {owner} owning session {id} is gone")));
    };
    node.execute_command(request).await
}

pub(crate) fn command_request(method: &Method, uri: &Uri, headers: &HeaderMap, body: String) -> CommandRequest {
    let path = uri
        .path_and_query()
        .map_or_else(|| uri.path().to_string(), ToString::to_string);
    CommandRequest {
        method: method.as_str().to_string(),
        path,
        headers: headers
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect(),
        body,
    }
}

pub(crate) fn command_response(response: CommandResponse) -> Response {
    let mut out = Response::new(Body::from(response.body));
    *out.status_mut() = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let headers = out.headers_mut();
    for (name, value) in response.headers {
        if HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h)) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(&value)) {
            headers.append(name, value);
        }
    }
    out
}

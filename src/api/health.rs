//! Liveness and grid status

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};

use super::ApiState;
use crate::data::{Availability, NodeStatus};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Grid-wide status snapshot
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridStatus {
    /// Some node is up and has a free slot
    pub ready: bool,
    pub message: String,
    pub nodes: Vec<NodeStatus>,
    pub queue_size: usize,
    pub session_count: usize,
    /// Start of the newest session still running anywhere
    pub last_session_created: Option<DateTime<Utc>>,
}

/// Liveness probe - is the service running?
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn status(State(state): State<Arc<ApiState>>) -> Json<Value> {
    let nodes = state.distributor.statuses();
    let ready = state.distributor.has_capacity();
    let up = nodes.iter().filter(|n| n.availability == Availability::Up).count();
    let message = if ready {
        "Grid ready.".to_string()
    } else if nodes.is_empty() {
        "Grid not ready: no nodes registered.".to_string()
    } else {
        format!("Grid not ready: {up} of {} nodes up, none with a free slot.", nodes.len())
    };

    let last_session_created = nodes.iter().filter_map(NodeStatus::last_session_created).max();
    let status = GridStatus {
        last_session_created,
        ready,
        message,
        nodes,
        queue_size: state.distributor.queue().len(),
        session_count: state.distributor.sessions().count().await,
    };
    Json(json!({ "value": status }))
}

/// Build health router (liveness only, no state needed)
pub fn router() -> Router {
    Router::new().route("/health", get(health))
}

pub fn status_router(state: Arc<ApiState>) -> Router {
    Router::new().route("/status", get(status)).with_state(state)
}

//! Ingest events forwarded by nodes in other processes

use std::sync::Arc;

use axum::{Json, Router, extract::State, http::StatusCode, routing::post};

use super::ApiState;
use crate::events::GridEvent;
use crate::events::forward::EVENTS_PATH;

async fn ingest(State(state): State<Arc<ApiState>>, Json(event): Json<GridEvent>) -> StatusCode {
    tracing::trace!(event = event.name(), "forwarded event received");
    state.bus.publish(event);
    StatusCode::ACCEPTED
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new().route(EVENTS_PATH, post(ingest)).with_state(state)
}

//! Error responses
//!
//! Clients get WebDriver-shaped bodies. The hub talking to a node gets the
//! error kind back so it can be rebuilt on the other side.

use axum::{
    Json,
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::Error;

/// HTTP status and WebDriver error code for an error
#[must_use]
pub const fn classify(err: &Error) -> (StatusCode, &'static str) {
    match err {
        Error::NotFound(_) => (StatusCode::NOT_FOUND, "invalid session id"),
        Error::Unsupported(_) => (StatusCode::BAD_REQUEST, "session not created"),
        Error::RetryableCapacity(_) | Error::RetryablePlacement(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, "session not created")
        }
        Error::CreationFailed(_) | Error::Timeout(_) | Error::Cancelled(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "session not created")
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "unknown error"),
    }
}

/// Client-facing error
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = classify(&self.0);
        if status == StatusCode::INTERNAL_SERVER_ERROR && code == "unknown error" {
            tracing::error!(error = %self.0, "request failed");
        }
        let body = json!({
            "value": {
                "error": code,
                "message": self.0.to_string(),
                "stacktrace": "",
            }
        });
        (status, Json(body)).into_response()
    }
}

/// Error returned by the node surface to the hub
#[derive(Debug)]
pub struct NodeError(pub Error);

impl From<Error> for NodeError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for NodeError {
    fn into_response(self) -> Response {
        let (status, _) = classify(&self.0);
        (status, Json(self.0.to_wire())).into_response()
    }
}

/// Fallback for anything no route matches
pub async fn unknown_command(uri: Uri) -> Response {
    let body = json!({
        "value": {
            "error": "unknown command",
            "message": format!("unable to find handler for {}", uri.path()),
            "stacktrace": "",
        }
    });
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}

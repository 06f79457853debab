//! Opaque in-session command pass-through

use serde::{Deserialize, Serialize};

use super::SessionId;

/// An HTTP request aimed at a running session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub method: String,
    /// Path and query, e.g. `/session/{id}/url`
    pub path: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: String,
}

impl CommandRequest {
    #[must_use]
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Session id from a `/session/{id}/...` path
    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        let path = self.path.split('?').next().unwrap_or_default();
        let mut parts = path.trim_start_matches('/').split('/');
        match (parts.next(), parts.next()) {
            (Some("session"), Some(id)) if !id.is_empty() => Some(SessionId::from(id)),
            _ => None,
        }
    }

    /// `DELETE /session/{id}` ends the session
    #[must_use]
    pub fn is_session_delete(&self) -> bool {
        if !self.method.eq_ignore_ascii_case("DELETE") {
            return false;
        }
        let path = self.path.split('?').next().unwrap_or_default();
        let trimmed = path.trim_matches('/');
        let mut parts = trimmed.split('/');
        matches!(
            (parts.next(), parts.next(), parts.next()),
            (Some("session"), Some(id), None) if !id.is_empty()
        )
    }
}

/// Response relayed back from a driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: String,
}

impl CommandResponse {
    #[must_use]
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: body.into(),
        }
    }
}

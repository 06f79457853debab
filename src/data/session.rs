//! Sessions and new-session requests

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use url::Url;

use super::{Capabilities, SessionId};
use crate::{Error, Result};

/// Downstream protocol flavour a client speaks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    W3c,
    Oss,
}

impl Dialect {
    /// Encode the new-session response body for this dialect
    #[must_use]
    pub fn encode(self, session: &Session) -> Value {
        let caps = Value::from(session.capabilities.clone());
        match self {
            Self::W3c => json!({
                "value": {
                    "sessionId": session.id,
                    "capabilities": caps,
                }
            }),
            Self::Oss => json!({
                "status": 0,
                "sessionId": session.id,
                "value": caps,
            }),
        }
    }
}

/// A running session on some slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    /// Where commands for this session are served
    pub uri: Url,
    pub stereotype: Capabilities,
    /// Capabilities as resolved by the driver
    pub capabilities: Capabilities,
    pub start_time: DateTime<Utc>,
}

/// Request to create a new session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    /// Dialects the client accepts, most preferred first
    pub dialects: Vec<Dialect>,
    pub capabilities: Capabilities,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl CreateSessionRequest {
    #[must_use]
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            dialects: vec![Dialect::W3c],
            capabilities,
            metadata: Map::new(),
        }
    }

    /// Parse a client's new-session body
    ///
    /// W3C `capabilities` (alwaysMatch merged with the first firstMatch) wins
    /// over legacy `desiredCapabilities`; both dialects are accepted when
    /// both shapes are present.
    ///
    /// # Errors
    ///
    /// Returns `Error::Unsupported` if the body carries neither shape
    pub fn from_payload(body: &Value) -> Result<Self> {
        let mut dialects = Vec::new();
        let mut capabilities = None;

        if let Some(Value::Object(w3c)) = body.get("capabilities") {
            let always = object_caps(w3c.get("alwaysMatch"));
            let first = w3c
                .get("firstMatch")
                .and_then(Value::as_array)
                .and_then(|entries| entries.first());
            capabilities = Some(always.merge(&object_caps(first)));
            dialects.push(Dialect::W3c);
        }

        if let Some(Value::Object(desired)) = body.get("desiredCapabilities") {
            if capabilities.is_none() {
                capabilities = Some(Capabilities::from(desired.clone()));
            }
            dialects.push(Dialect::Oss);
        }

        let capabilities = capabilities.ok_or_else(|| {
            Error::Unsupported("new session payload carries no capabilities".to_string())
        })?;

        let metadata = body
            .get("metadata")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        Ok(Self {
            dialects,
            capabilities,
            metadata,
        })
    }

    /// The dialect the response will be encoded in
    #[must_use]
    pub fn dialect(&self) -> Dialect {
        self.dialects.first().copied().unwrap_or_default()
    }
}

fn object_caps(value: Option<&Value>) -> Capabilities {
    value
        .and_then(Value::as_object)
        .map(|m| Capabilities::from(m.clone()))
        .unwrap_or_default()
}

/// Successful session creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub session: Session,
    /// Response body in the client's dialect
    pub payload: Value,
}

impl CreateSessionResponse {
    #[must_use]
    pub fn new(session: Session, dialect: Dialect) -> Self {
        let payload = dialect.encode(&session);
        Self { session, payload }
    }
}

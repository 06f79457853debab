//! Relay sessions to an already-running WebDriver endpoint
//!
//! The node does not launch drivers itself. Each slot group points at a
//! service URL (a driver, an appium server, another grid) and sessions are
//! created and driven there over plain HTTP.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use url::Url;

use super::factory::{ActiveSession, SessionFactory};
use super::health::{HealthCheck, HealthCheckResult};
use crate::data::{Capabilities, CommandRequest, CommandResponse, CreateSessionRequest, SessionId};
use crate::{Error, Result};

/// Creates sessions by POSTing to `{service}/session`
pub struct RelayFactory {
    client: reqwest::Client,
    service_url: Url,
}

/// Make `join` append to the service path instead of replacing its last segment
fn base_url(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

impl RelayFactory {
    #[must_use]
    pub fn new(client: reqwest::Client, service_url: Url) -> Self {
        Self {
            client,
            service_url: base_url(service_url),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.service_url
            .join(path)
            .map_err(|e| Error::Config(format!("invalid relay path {path}: {e}")))
    }
}

/// Pull the session id and resolved capabilities out of a new-session reply
fn parse_created(body: &Value) -> Option<(SessionId, Capabilities)> {
    // W3C: {"value": {"sessionId", "capabilities"}}
    if let Some(id) = body["value"]["sessionId"].as_str() {
        let caps = body["value"]["capabilities"]
            .as_object()
            .cloned()
            .unwrap_or_default();
        return Some((SessionId::from(id), Capabilities::from(caps)));
    }
    // OSS: {"sessionId", "value": caps}
    let id = body["sessionId"].as_str()?;
    let caps = body["value"].as_object().cloned().unwrap_or_default();
    Some((SessionId::from(id), Capabilities::from(caps)))
}

#[async_trait]
impl SessionFactory for RelayFactory {
    async fn create(&self, request: &CreateSessionRequest) -> Result<Arc<dyn ActiveSession>> {
        let url = self.endpoint("session")?;
        let payload = json!({
            "capabilities": { "alwaysMatch": Value::from(request.capabilities.clone()) },
            "desiredCapabilities": Value::from(request.capabilities.clone()),
        });

        let resp = self.client.post(url).json(&payload).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(Error::CreationFailed(format!(
                "relay {} returned {status}: {text}",
                self.service_url
            )));
        }

        let body: Value = serde_json::from_str(&text)?;
        let (id, capabilities) = parse_created(&body).ok_or_else(|| {
            Error::CreationFailed(format!("relay {} reply has no session id", self.service_url))
        })?;

        tracing::debug!(session_id = %id, relay = %self.service_url, "relay session created");

        Ok(Arc::new(RelaySession {
            id,
            uri: self.service_url.clone(),
            capabilities,
            start_time: Utc::now(),
            client: self.client.clone(),
            deleted: AtomicBool::new(false),
        }))
    }
}

/// A session living on the relay target
pub struct RelaySession {
    id: SessionId,
    uri: Url,
    capabilities: Capabilities,
    start_time: DateTime<Utc>,
    client: reqwest::Client,
    /// Set once a DELETE has reached the relay target
    deleted: AtomicBool,
}

#[async_trait]
impl ActiveSession for RelaySession {
    fn id(&self) -> &SessionId {
        &self.id
    }

    fn uri(&self) -> &Url {
        &self.uri
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    async fn execute(&self, request: CommandRequest) -> Result<CommandResponse> {
        let method = reqwest::Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|e| Error::Config(format!("bad method {}: {e}", request.method)))?;
        let url = self
            .uri
            .join(request.path.trim_start_matches('/'))
            .map_err(|e| Error::Config(format!("bad path {}: {e}", request.path)))?;

        let mut builder = self.client.request(method, url);
        for (name, value) in &request.headers {
            if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            builder = builder.header(name, value);
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let resp = builder.send().await?;
        let status = resp.status();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let body = resp.text().await?;

        if request.is_session_delete() && status.is_success() {
            self.deleted.store(true, Ordering::SeqCst);
        }

        Ok(CommandResponse {
            status: status.as_u16(),
            headers,
            body,
        })
    }

    async fn stop(&self) {
        if self.deleted.swap(true, Ordering::SeqCst) {
            return;
        }
        let url = match self.uri.join(&format!("session/{}", self.id)) {
            Ok(u) => u,
            Err(e) => {
                tracing::warn!(session_id = %self.id, error = %e, "cannot build delete url");
                return;
            }
        };
        match self.client.delete(url).send().await {
            Ok(resp) if resp.status().is_success() => {
                tracing::debug!(session_id = %self.id, "relay session deleted");
            }
            Ok(resp) => {
                tracing::warn!(session_id = %self.id, status = %resp.status(), "relay refused session delete");
            }
            Err(e) => {
                tracing::warn!(session_id = %self.id, error = %e, "failed to delete relay session");
            }
        }
    }
}

/// Probes `{service}/status`; a relay that is unreachable or not ready
/// takes the node down
pub struct RelayHealthCheck {
    client: reqwest::Client,
    service_url: Url,
}

impl RelayHealthCheck {
    #[must_use]
    pub fn new(client: reqwest::Client, service_url: Url) -> Self {
        Self {
            client,
            service_url: base_url(service_url),
        }
    }
}

#[async_trait]
impl HealthCheck for RelayHealthCheck {
    async fn check(&self) -> HealthCheckResult {
        let url = match self.service_url.join("status") {
            Ok(u) => u,
            Err(e) => return HealthCheckResult::down(format!("invalid relay url: {e}")),
        };

        let resp = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => return HealthCheckResult::down(format!("relay {} unreachable: {e}", self.service_url)),
        };

        if !resp.status().is_success() {
            return HealthCheckResult::down(format!(
                "relay {} returned {}",
                self.service_url,
                resp.status()
            ));
        }

        // Drivers report {"value": {"ready": bool}}; a missing field counts as ready
        let ready = resp
            .json::<Value>()
            .await
            .ok()
            .and_then(|v| v["value"]["ready"].as_bool())
            .unwrap_or(true);

        if ready {
            HealthCheckResult::up(format!("relay {} is ready", self.service_url))
        } else {
            HealthCheckResult::down(format!("relay {} is not ready", self.service_url))
        }
    }
}

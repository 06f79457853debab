//! A node in another process, reached over HTTP

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use super::Node;
use super::health::HealthCheckResult;
use crate::data::{
    Capabilities, CommandRequest, CommandResponse, CreateSessionRequest, CreateSessionResponse,
    NodeId, NodeStatus, Session, SessionId,
};
use crate::error::{ErrorKind, WireError};
use crate::{Error, Result};

/// Client side of the node HTTP surface served by [`crate::api::node`]
pub struct RemoteNode {
    id: NodeId,
    uri: Url,
    client: reqwest::Client,
}

impl RemoteNode {
    /// Contact the node at `uri` and learn its id
    ///
    /// # Errors
    ///
    /// Returns error if the node cannot be reached or its status is malformed
    pub async fn connect(client: reqwest::Client, uri: Url) -> Result<(Self, NodeStatus)> {
        let mut node = Self {
            id: NodeId::new(),
            uri,
            client,
        };
        let status = node.fetch_status().await?;
        node.id = status.node_id;
        Ok((node, status))
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.uri
            .join(path)
            .map_err(|e| Error::Config(format!("invalid node path {path}: {e}")))
    }

    async fn fetch_status(&self) -> Result<NodeStatus> {
        let resp = self.client.get(self.url("/se/grid/node/status")?).send().await?;
        read(resp).await
    }
}

/// Decode a success body, or rebuild the node's error
async fn read<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    let text = resp.text().await?;
    if status.is_success() {
        return Ok(serde_json::from_str(&text)?);
    }
    Err(serde_json::from_str::<WireError>(&text).map_or_else(
        |_| {
            Error::from(WireError {
                kind: ErrorKind::Internal,
                message: format!("node returned {status}: {text}"),
            })
        },
        Error::from,
    ))
}

fn flag(body: &Value) -> bool {
    body["value"].as_bool().unwrap_or(false)
}

#[async_trait]
impl Node for RemoteNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn uri(&self) -> &Url {
        &self.uri
    }

    async fn is_supporting(&self, capabilities: &Capabilities) -> bool {
        let Ok(url) = self.url("/se/grid/node/supports") else {
            return false;
        };
        match self.client.post(url).json(capabilities).send().await {
            Ok(resp) => read::<Value>(resp).await.is_ok_and(|v| flag(&v)),
            Err(e) => {
                tracing::warn!(node_id = %self.id, error = %e, "supports query failed");
                false
            }
        }
    }

    async fn new_session(&self, request: CreateSessionRequest) -> Result<CreateSessionResponse> {
        let resp = self
            .client
            .post(self.url("/se/grid/node/session")?)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::RetryableCapacity(format!("node {} unreachable: {e}", self.uri)))?;
        read(resp).await
    }

    async fn execute_command(&self, request: CommandRequest) -> Result<CommandResponse> {
        let method = reqwest::Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|e| Error::Config(format!("bad method {}: {e}", request.method)))?;
        let mut builder = self.client.request(method, self.url(&request.path)?);
        for (name, value) in &request.headers {
            if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            builder = builder.header(name, value);
        }
        let resp = builder.body(request.body).send().await?;

        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let body = resp.text().await?;
        Ok(CommandResponse {
            status,
            headers,
            body,
        })
    }

    async fn session(&self, id: &SessionId) -> Result<Session> {
        let resp = self
            .client
            .get(self.url(&format!("/se/grid/node/session/{id}"))?)
            .send()
            .await?;
        read(resp).await
    }

    async fn is_session_owner(&self, id: &SessionId) -> bool {
        let Ok(url) = self.url(&format!("/se/grid/node/owner/{id}")) else {
            return false;
        };
        match self.client.get(url).send().await {
            Ok(resp) => read::<Value>(resp).await.is_ok_and(|v| flag(&v)),
            Err(_) => false,
        }
    }

    async fn stop_session(&self, id: &SessionId) -> Result<()> {
        let resp = self
            .client
            .delete(self.url(&format!("/se/grid/node/session/{id}"))?)
            .send()
            .await?;
        read::<Value>(resp).await.map(|_| ())
    }

    async fn drain(&self) {
        let result = match self.url("/se/grid/node/drain") {
            Ok(url) => self.client.post(url).send().await.map(|_| ()).map_err(Error::from),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!(node_id = %self.id, error = %e, "failed to ask node to drain");
        }
    }

    async fn status(&self) -> Result<NodeStatus> {
        self.fetch_status().await
    }

    async fn health_check(&self) -> HealthCheckResult {
        let url = match self.url("/se/grid/node/health") {
            Ok(u) => u,
            Err(e) => return HealthCheckResult::down(e.to_string()),
        };
        match self.client.get(url).send().await {
            Ok(resp) => read(resp)
                .await
                .unwrap_or_else(|e| HealthCheckResult::down(format!("bad health reply: {e}"))),
            Err(e) => HealthCheckResult::down(format!("node {} unreachable: {e}", self.uri)),
        }
    }
}

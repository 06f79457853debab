//! Daemon - wires components together for each run mode
//!
//! - standalone: router, distributor and one local node in a single process
//! - hub: router and distributor; nodes join over HTTP
//! - node: one local node, registered with a hub and forwarding its events

pub mod retry;

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::api::{ApiServer, ApiState};
use crate::config::GridConfig;
use crate::data::NodeId;
use crate::distributor::Distributor;
use crate::events::{EventBus, GridEvent, forward};
use crate::node::{LocalNode, Node, RelayFactory, RelayHealthCheck, SessionFactory};
use crate::queue::NewSessionQueue;
use crate::sessionmap::LocalSessionMap;
use crate::{Error, Result};

use retry::{RetryPolicy, delay_for_attempt, is_recoverable};

/// Which components this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Standalone,
    Hub,
    Node,
}

/// The grid daemon
pub struct Daemon {
    config: GridConfig,
    mode: Mode,
    client: reqwest::Client,
}

impl Daemon {
    /// Create a daemon for `mode`
    ///
    /// # Errors
    ///
    /// Returns error if the configuration cannot support the mode
    pub fn new(config: GridConfig, mode: Mode) -> Result<Self> {
        match mode {
            Mode::Hub => config.validate()?,
            Mode::Standalone => config.validate_node()?,
            Mode::Node => {
                config.validate_node()?;
                if config.hub_url.is_none() {
                    return Err(Error::Config(
                        "node mode needs a hub url (--hub or GRID_HUB_URL)".into(),
                    ));
                }
            }
        }
        Ok(Self {
            config,
            mode,
            client: reqwest::Client::new(),
        })
    }

    /// Run until ctrl-c
    ///
    /// # Errors
    ///
    /// Returns error if the daemon encounters a fatal error
    pub async fn run(self) -> Result<()> {
        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                signal.cancel();
            }
        });

        tracing::info!(mode = ?self.mode, port = self.config.server.port, "session grid starting");

        match self.mode {
            Mode::Standalone => self.run_standalone(shutdown).await,
            Mode::Hub => self.run_hub(shutdown).await,
            Mode::Node => self.run_node(shutdown).await,
        }
    }

    fn distributor(&self, bus: &EventBus) -> Arc<Distributor> {
        let queue = Arc::new(NewSessionQueue::new(self.config.queue.clone()));
        Distributor::new(
            self.config.distributor.clone(),
            Arc::new(LocalSessionMap::new()),
            queue,
            bus.clone(),
        )
    }

    fn server(&self) -> crate::api::ApiServerBuilder {
        ApiServer::builder()
            .host(self.config.server.host.clone())
            .port(self.config.server.port)
    }

    async fn run_standalone(self, shutdown: CancellationToken) -> Result<()> {
        let bus = EventBus::new();
        let uri = self.config.server.external_url()?;
        let node = build_node(&self.config, uri, bus.clone(), &self.client);
        let node_tasks = node.start();

        let distributor = self.distributor(&bus);
        distributor.add(node.clone()).await?;
        let grid_tasks = distributor.start(&shutdown);

        let server = self
            .server()
            .grid(ApiState {
                distributor,
                bus,
                client: self.client.clone(),
            })
            .node(Arc::clone(&node))
            .build();
        let result = server.run(shutdown.clone()).await;

        shutdown.cancel();
        node.shutdown();
        join_all(node_tasks.into_iter().chain(grid_tasks)).await;
        result
    }

    async fn run_hub(self, shutdown: CancellationToken) -> Result<()> {
        let bus = EventBus::new();
        let distributor = self.distributor(&bus);
        let grid_tasks = distributor.start(&shutdown);

        let server = self
            .server()
            .grid(ApiState {
                distributor,
                bus,
                client: self.client.clone(),
            })
            .build();
        let result = server.run(shutdown.clone()).await;

        shutdown.cancel();
        join_all(grid_tasks).await;
        result
    }

    async fn run_node(self, shutdown: CancellationToken) -> Result<()> {
        let hub = self
            .config
            .hub_url
            .clone()
            .ok_or_else(|| Error::Config("node mode needs a hub url".into()))?;
        let bus = EventBus::new();
        let uri = self.config.server.external_url()?;
        let node = build_node(&self.config, uri.clone(), bus.clone(), &self.client);
        let mut events = bus.subscribe();
        let node_tasks = node.start();

        let server = self.server().node(Arc::clone(&node)).build().spawn(shutdown.clone());

        let policy = RetryPolicy::default();
        let registered = tokio::select! {
            () = shutdown.cancelled() => None,
            result = register(&self.client, &hub, &uri, &policy) => Some(result),
        };

        let mut failure = None;
        match registered {
            Some(Ok(id)) => {
                tracing::info!(node_id = %id, hub = %hub, "registered with hub");
                let forwarder = forward::spawn(&bus, hub.clone(), self.client.clone(), shutdown.clone());
                wait_for_drain(&mut events, node.id(), &shutdown).await;
                deregister(&self.client, &hub, id).await;
                shutdown.cancel();
                join_all([forwarder]).await;
            }
            Some(Err(e)) => failure = Some(e),
            None => {}
        }

        shutdown.cancel();
        node.shutdown();
        join_all(node_tasks).await;
        let served = match server.await {
            Ok(result) => result,
            Err(e) => Err(Error::Config(format!("API server task failed: {e}"))),
        };
        failure.map_or(served, Err)
    }
}

/// Wait until this node has drained or the process is stopping
async fn wait_for_drain(
    events: &mut tokio::sync::broadcast::Receiver<GridEvent>,
    id: NodeId,
    shutdown: &CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = shutdown.cancelled() => return,
            received = events.recv() => match received {
                Ok(event) => event,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return,
            },
        };
        // A drained node has nothing left to do
        if matches!(event, GridEvent::NodeDrainComplete(drained) if drained == id) {
            tracing::info!(node_id = %id, "drain complete, leaving the grid");
            return;
        }
    }
}

/// Build a local node from the slot groups in `config`
///
/// Every distinct relay gets one health check.
#[must_use]
pub fn build_node(config: &GridConfig, uri: Url, bus: EventBus, client: &reqwest::Client) -> Arc<LocalNode> {
    let mut builder = LocalNode::builder(uri, bus)
        .max_sessions(config.node.max_sessions)
        .session_timeout(config.node.session_timeout)
        .heartbeat_period(config.node.heartbeat_period)
        .drain_after(config.node.drain_after_session_count);

    let mut probed = HashSet::new();
    for slot in &config.node.slots {
        let factory: Arc<dyn SessionFactory> =
            Arc::new(RelayFactory::new(client.clone(), slot.relay_url.clone()));
        builder = builder.add_slots(&slot.stereotype, &factory, slot.count);
        if probed.insert(slot.relay_url.clone()) {
            builder = builder.health_check(Arc::new(RelayHealthCheck::new(
                client.clone(),
                slot.relay_url.clone(),
            )));
        }
    }
    builder.build()
}

/// Register `uri` with the hub, retrying transient failures
///
/// # Errors
///
/// Returns error if the hub rejects the node or stays unreachable
pub async fn register(client: &reqwest::Client, hub: &Url, uri: &Url, policy: &RetryPolicy) -> Result<NodeId> {
    let endpoint = hub
        .join("/se/grid/distributor/node")
        .map_err(|e| Error::Config(format!("invalid hub url {hub}: {e}")))?;

    let mut attempt = 0;
    loop {
        let outcome = match client.post(endpoint.clone()).json(&json!({ "uri": uri })).send().await {
            Ok(resp) if resp.status().is_success() => {
                let body: Value = resp.json().await?;
                return body["value"]["nodeId"]
                    .as_str()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| Error::Config(format!("hub {hub} returned no node id")));
            }
            Ok(resp) if !is_recoverable(resp.status().as_u16()) => {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                return Err(Error::Config(format!("hub {hub} refused registration ({status}): {text}")));
            }
            Ok(resp) => format!("hub returned {}", resp.status()),
            Err(e) => e.to_string(),
        };

        if attempt >= policy.max_retries {
            return Err(Error::Config(format!(
                "could not register with hub {hub} after {} attempts: {outcome}",
                attempt + 1
            )));
        }
        let delay = delay_for_attempt(policy, attempt);
        tracing::warn!(hub = %hub, attempt, error = %outcome, delay_ms = delay.as_millis(), "registration failed, retrying");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Tell the hub to forget this node; best-effort
async fn deregister(client: &reqwest::Client, hub: &Url, id: NodeId) {
    let Ok(endpoint) = hub.join(&format!("/se/grid/distributor/node/{id}")) else {
        return;
    };
    if let Err(e) = client.delete(endpoint).send().await {
        tracing::warn!(node_id = %id, error = %e, "failed to deregister from hub");
    }
}

async fn join_all(tasks: impl IntoIterator<Item = JoinHandle<()>>) {
    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "background task failed");
        }
    }
}

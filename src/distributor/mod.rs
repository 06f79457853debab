//! Fleet-wide session placement
//!
//! Keeps the last known status of every registered node, fed by heartbeats
//! from the event bus and by periodic health probes. New session requests
//! go to the best candidate; when nobody can take one right now it waits in
//! the [`NewSessionQueue`].

pub mod fleet;
pub mod selection;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::DistributorConfig;
use crate::data::{Availability, Capabilities, CreateSessionRequest, CreateSessionResponse, NodeId, NodeStatus, SessionId};
use crate::events::{EventBus, GridEvent};
use crate::node::Node;
use crate::queue::{NewSessionQueue, SessionPlacer};
use crate::sessionmap::SessionMap;
use crate::{Error, Result};

use fleet::{Fleet, FleetSnapshot, NodeRecord};

pub struct Distributor {
    config: DistributorConfig,
    fleet: Fleet,
    sessions: Arc<dyn SessionMap>,
    queue: Arc<NewSessionQueue>,
    bus: EventBus,
}

impl Distributor {
    #[must_use]
    pub fn new(
        config: DistributorConfig,
        sessions: Arc<dyn SessionMap>,
        queue: Arc<NewSessionQueue>,
        bus: EventBus,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            fleet: Fleet::default(),
            sessions,
            queue,
            bus,
        })
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<NewSessionQueue> {
        &self.queue
    }

    #[must_use]
    pub fn sessions(&self) -> &Arc<dyn SessionMap> {
        &self.sessions
    }

    /// Register a node, asking it for its current status
    ///
    /// # Errors
    ///
    /// Returns error if the node's status cannot be read
    pub async fn add(&self, node: Arc<dyn Node>) -> Result<NodeId> {
        let status = node.status().await?;
        Ok(self.add_with_status(node, status))
    }

    /// Register a node whose status is already known
    pub fn add_with_status(&self, node: Arc<dyn Node>, status: NodeStatus) -> NodeId {
        let id = node.id();
        tracing::info!(
            node_id = %id,
            uri = %node.uri(),
            slots = status.slots.len(),
            max_sessions = status.max_session_count,
            "node added"
        );
        let uri = node.uri().clone();
        self.fleet.update(|nodes| {
            // A node restarting at the same address comes back with a new id
            nodes.retain(|other, r| *other == id || r.node.uri() != &uri);
            nodes.insert(id, NodeRecord::new(node, status));
        });
        self.queue.wake();
        id
    }

    /// Forget a node and the sessions it owned; returns whether it was
    /// registered
    pub async fn remove(&self, id: NodeId) -> bool {
        let Some(record) = self.fleet.update(|nodes| nodes.remove(&id)) else {
            return false;
        };
        let uri = record.node.uri();
        let mut dropped = 0;
        for entry in self.sessions.entries().await {
            if entry.node_uri == *uri {
                self.sessions.remove(&entry.session_id).await;
                dropped += 1;
            }
        }
        tracing::info!(node_id = %id, sessions = dropped, "node removed");
        self.bus.publish(GridEvent::NodeRemoved(id));
        true
    }

    /// Ask a node to drain
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown node
    pub async fn drain(&self, id: NodeId) -> Result<()> {
        let record = self
            .fleet
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("unknown node {id}")))?;
        tracing::info!(node_id = %id, "draining node");
        record.node.drain().await;
        self.refresh(id).await;
        Ok(())
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<Arc<dyn Node>> {
        self.fleet.get(&id).map(|r| r.node)
    }

    /// The registered node serving at `uri`
    #[must_use]
    pub fn node_by_uri(&self, uri: &Url) -> Option<Arc<dyn Node>> {
        self.fleet.by_uri(uri).map(|r| r.node)
    }

    /// Last known status of every node, with availability as placement sees it
    #[must_use]
    pub fn statuses(&self) -> Vec<NodeStatus> {
        let now = Instant::now();
        let mut statuses: Vec<NodeStatus> = self
            .fleet
            .snapshot()
            .values()
            .map(|r| NodeStatus {
                availability: r.availability(now, self.config.heartbeat_misses_allowed),
                ..r.status.clone()
            })
            .collect();
        statuses.sort_by_key(|s| s.node_id);
        statuses
    }

    /// Whether some node could start a session right now
    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.statuses()
            .iter()
            .any(|s| s.availability == Availability::Up && s.has_capacity())
    }

    /// Place a request, waiting in the queue if nobody can take it yet
    ///
    /// # Errors
    ///
    /// `Unsupported` when no registered stereotype matches, `CreationFailed`
    /// when the chosen node could not start the session, `Timeout` when the
    /// request waited too long
    pub async fn new_session(&self, request: CreateSessionRequest) -> Result<CreateSessionResponse> {
        if !self.queue.is_idle() {
            // Earlier and more important requests get freed capacity first
            if let Err(e) = self.check_supported(&self.fleet.snapshot(), &request.capabilities) {
                if !e.is_retryable() {
                    return Err(e);
                }
            }
            tracing::info!("requests already waiting, queuing behind them");
            return self.queue.enqueue(request).await;
        }

        match self.try_place(&request).await {
            Err(e) if e.is_retryable() => {
                tracing::info!(reason = %e, "no node can take the request yet, queuing");
                self.queue.enqueue(request).await
            }
            other => other,
        }
    }

    /// Fails unless some registered stereotype could ever serve `caps`
    fn check_supported(&self, snapshot: &FleetSnapshot, caps: &Capabilities) -> Result<()> {
        if snapshot.values().any(|r| r.status.supports(caps)) {
            return Ok(());
        }
        let message = format!("no registered node supports {}", serde_json::to_string(caps)?);
        if self.config.reject_unsupported {
            tracing::warn!(capabilities = ?caps, "rejecting unsupported request");
            Err(Error::Unsupported(message))
        } else {
            Err(Error::RetryablePlacement(message))
        }
    }

    async fn try_place(&self, request: &CreateSessionRequest) -> Result<CreateSessionResponse> {
        let caps = &request.capabilities;
        let snapshot = self.fleet.snapshot();
        self.check_supported(&snapshot, caps)?;

        let now = Instant::now();
        let up = snapshot
            .values()
            .filter(|r| r.availability(now, self.config.heartbeat_misses_allowed) == Availability::Up)
            .map(|r| &r.status);
        let ranked = selection::rank(up, caps);
        if ranked.is_empty() {
            return Err(Error::RetryablePlacement(
                "no healthy node has a free matching slot".to_string(),
            ));
        }

        let mut creation_failure = None;
        for id in ranked {
            let Some(record) = snapshot.get(&id) else {
                continue;
            };
            match record.node.new_session(request.clone()).await {
                Ok(resp) => {
                    self.refresh(id).await;
                    return self.register(record.node.as_ref(), resp).await;
                }
                Err(e) if e.is_retryable() => {
                    tracing::debug!(node_id = %id, reason = %e, "node turned the request down, trying next");
                    self.refresh(id).await;
                }
                Err(e @ Error::CreationFailed(_)) => {
                    tracing::warn!(node_id = %id, error = %e, "session creation failed, trying next node");
                    self.refresh(id).await;
                    creation_failure = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(creation_failure.unwrap_or_else(|| {
            Error::RetryableCapacity("every candidate node was busy".to_string())
        }))
    }

    /// Record ownership of a freshly created session
    async fn register(&self, node: &dyn Node, resp: CreateSessionResponse) -> Result<CreateSessionResponse> {
        let id = resp.session.id.clone();
        if let Err(e) = self.sessions.add(id.clone(), node.uri().clone()).await {
            // The map keeps the earlier owner; ours must not survive
            if let Err(stop) = node.stop_session(&id).await {
                tracing::warn!(session_id = %id, error = %stop, "failed to stop conflicting session");
            }
            return Err(e);
        }
        tracing::info!(session_id = %id, node_id = %node.id(), "session placed");
        Ok(resp)
    }

    /// Re-read one node's status without counting it as a heartbeat
    async fn refresh(&self, id: NodeId) {
        let Some(record) = self.fleet.get(&id) else {
            return;
        };
        match record.node.status().await {
            Ok(status) => self.fleet.update(|nodes| {
                if let Some(r) = nodes.get_mut(&id) {
                    r.status = status;
                }
            }),
            Err(e) => tracing::debug!(node_id = %id, error = %e, "status refresh failed"),
        }
    }

    fn on_heartbeat(&self, status: NodeStatus) {
        let id = status.node_id;
        let now = Instant::now();
        let misses = self.config.heartbeat_misses_allowed;
        let has_capacity = status.has_capacity();

        let known = self.fleet.update(|nodes| {
            let Some(record) = nodes.get_mut(&id) else {
                return false;
            };
            if record.heartbeat_missed(now, misses) {
                tracing::info!(node_id = %id, "heartbeat resumed");
            }
            // A node that reports itself fit again overrides an older failed health check
            record.healthy = status.availability != Availability::Down;
            record.status = status;
            record.last_heartbeat = now;
            true
        });

        if !known {
            tracing::debug!(node_id = %id, "heartbeat from unregistered node ignored");
        } else if has_capacity {
            self.queue.wake();
        }
    }

    async fn on_session_closed(&self, id: &SessionId, node_uri: &Url) {
        // Only the recorded owner may clear the entry
        if self.sessions.get(id).await.is_ok_and(|owner| owner == *node_uri) {
            self.sessions.remove(id).await;
        }
        // The freed slot has to show up before the queue retries
        if let Some(record) = self.fleet.by_uri(node_uri) {
            self.refresh(record.node.id()).await;
        }
        self.queue.wake();
    }

    /// Probe every node once and mark silent or unhealthy ones down
    pub async fn check_health(&self) {
        let misses = self.config.heartbeat_misses_allowed;
        let snapshot = self.fleet.snapshot();
        let probes = snapshot.iter().map(|(id, record)| async move {
            let result = record.node.health_check().await;
            let status = if result.is_down() {
                None
            } else {
                record.node.status().await.ok()
            };
            (*id, record, result, status)
        });

        for (id, record, result, status) in join_all(probes).await {
            let healthy = !result.is_down();
            let now = Instant::now();
            let before = record.availability(now, misses);
            let after = self.fleet.update(|nodes| {
                let r = nodes.get_mut(&id)?;
                r.healthy = healthy;
                if let Some(status) = status {
                    r.status = status;
                }
                Some(r.availability(now, misses))
            });

            match after {
                Some(Availability::Down) if before != Availability::Down => {
                    tracing::warn!(node_id = %id, message = %result.message, "node marked down");
                }
                Some(a) if before == Availability::Down && a != Availability::Down => {
                    tracing::info!(node_id = %id, "node back up");
                    self.queue.wake();
                }
                _ => {}
            }
        }
    }

    async fn handle(&self, event: GridEvent) {
        match event {
            GridEvent::NodeHeartbeat(status) => self.on_heartbeat(status),
            GridEvent::NodeDrainStarted(id) => self.refresh(id).await,
            GridEvent::NodeDrainComplete(id) => {
                tracing::info!(node_id = %id, "node finished draining");
                self.remove(id).await;
            }
            GridEvent::SessionClosed { session_id, node_uri } => {
                self.on_session_closed(&session_id, &node_uri).await;
            }
            GridEvent::NodeRemoved(_) => {}
        }
    }

    /// Spawn the event listener, the health check loop and the queue retry loop
    pub fn start(self: &Arc<Self>, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
        let mut events = self.bus.subscribe();
        let distributor = Arc::clone(self);
        let stop = shutdown.clone();
        let listener = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    () = stop.cancelled() => break,
                    received = events.recv() => match received {
                        Ok(event) => event,
                        Err(RecvError::Lagged(n)) => {
                            tracing::warn!(skipped = n, "distributor lagging behind grid events");
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    },
                };
                distributor.handle(event).await;
            }
        });

        let distributor = Arc::clone(self);
        let stop = shutdown.clone();
        let health = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(distributor.config.health_check_interval);
            loop {
                tokio::select! {
                    () = stop.cancelled() => break,
                    _ = ticker.tick() => distributor.check_health().await,
                }
            }
        });

        let placer: Arc<dyn SessionPlacer> = Arc::clone(self) as Arc<dyn SessionPlacer>;
        let retry = self.queue.spawn_retry_loop(placer, shutdown.clone());

        vec![listener, health, retry]
    }
}

#[async_trait]
impl SessionPlacer for Distributor {
    async fn place(&self, request: &CreateSessionRequest) -> Result<CreateSessionResponse> {
        self.try_place(request).await
    }

    async fn abandon(&self, response: CreateSessionResponse) {
        let id = &response.session.id;
        match self.node_by_uri(&response.session.uri) {
            Some(node) => {
                if let Err(e) = node.stop_session(id).await {
                    tracing::warn!(session_id = %id, error = %e, "failed to stop abandoned session");
                }
            }
            None => tracing::warn!(session_id = %id, "owner of abandoned session is gone"),
        }
        self.sessions.remove(id).await;
    }
}

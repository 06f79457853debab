//! In-process node owning a fixed set of slots

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::Node;
use super::cache::IdleCache;
use super::factory::SessionFactory;
use super::health::{HealthCheck, HealthCheckResult};
use super::slot::SessionSlot;
use crate::data::{
    Availability, Capabilities, CommandRequest, CommandResponse, CreateSessionRequest,
    CreateSessionResponse, NodeId, NodeStatus, OsInfo, Session, SessionId, SlotId,
};
use crate::events::{EventBus, GridEvent};
use crate::{Error, Result};

/// Upper bound on how often idle sessions are looked for
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Default)]
struct DrainState {
    /// Slots that were busy when the drain began and have not freed up yet
    pending: HashSet<SlotId>,
    completed: bool,
}

/// Node serving sessions from slots in this process
pub struct LocalNode {
    id: NodeId,
    uri: Url,
    max_session_count: usize,
    heartbeat_period: Duration,
    version: String,
    os_info: OsInfo,
    slots: Vec<Arc<SessionSlot>>,
    /// Serializes scan-and-reserve against drain bookkeeping
    allocation: Mutex<()>,
    sessions: IdleCache<Arc<SessionSlot>>,
    temp_dirs: IdleCache<Arc<TempDir>>,
    health_checks: Vec<Arc<dyn HealthCheck>>,
    draining: AtomicBool,
    drain: Mutex<DrainState>,
    drain_after: usize,
    created: AtomicUsize,
    bus: EventBus,
    shutdown: CancellationToken,
}

/// Builder for [`LocalNode`]
pub struct LocalNodeBuilder {
    id: NodeId,
    uri: Url,
    bus: EventBus,
    max_sessions: Option<usize>,
    session_timeout: Duration,
    heartbeat_period: Duration,
    drain_after: usize,
    slots: Vec<(Capabilities, Arc<dyn SessionFactory>)>,
    health_checks: Vec<Arc<dyn HealthCheck>>,
}

impl LocalNodeBuilder {
    #[must_use]
    pub const fn id(mut self, id: NodeId) -> Self {
        self.id = id;
        self
    }

    /// Add `count` slots sharing a stereotype and factory
    #[must_use]
    pub fn add_slots(
        mut self,
        stereotype: &Capabilities,
        factory: &Arc<dyn SessionFactory>,
        count: usize,
    ) -> Self {
        for _ in 0..count {
            self.slots.push((stereotype.clone(), Arc::clone(factory)));
        }
        self
    }

    #[must_use]
    pub const fn max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = Some(max);
        self
    }

    #[must_use]
    pub const fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn heartbeat_period(mut self, period: Duration) -> Self {
        self.heartbeat_period = period;
        self
    }

    /// Drain automatically once this many sessions were created (0 = never)
    #[must_use]
    pub const fn drain_after(mut self, sessions: usize) -> Self {
        self.drain_after = sessions;
        self
    }

    #[must_use]
    pub fn health_check(mut self, check: Arc<dyn HealthCheck>) -> Self {
        self.health_checks.push(check);
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<LocalNode> {
        let slots: Vec<Arc<SessionSlot>> = self
            .slots
            .into_iter()
            .map(|(stereotype, factory)| Arc::new(SessionSlot::new(self.id, stereotype, factory)))
            .collect();
        let max_session_count = self.max_sessions.unwrap_or(slots.len()).min(slots.len());

        Arc::new(LocalNode {
            id: self.id,
            uri: self.uri,
            max_session_count,
            heartbeat_period: self.heartbeat_period,
            version: env!("CARGO_PKG_VERSION").to_string(),
            os_info: OsInfo::current(),
            slots,
            allocation: Mutex::new(()),
            sessions: IdleCache::new(self.session_timeout),
            temp_dirs: IdleCache::new(self.session_timeout),
            health_checks: self.health_checks,
            draining: AtomicBool::new(false),
            drain: Mutex::new(DrainState::default()),
            drain_after: self.drain_after,
            created: AtomicUsize::new(0),
            bus: self.bus,
            shutdown: CancellationToken::new(),
        })
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LocalNode {
    #[must_use]
    pub fn builder(uri: Url, bus: EventBus) -> LocalNodeBuilder {
        LocalNodeBuilder {
            id: NodeId::new(),
            uri,
            bus,
            max_sessions: None,
            session_timeout: Duration::from_secs(300),
            heartbeat_period: Duration::from_secs(60),
            drain_after: 0,
            slots: Vec::new(),
            health_checks: Vec::new(),
        }
    }

    #[must_use]
    pub const fn max_session_count(&self) -> usize {
        self.max_session_count
    }

    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Sessions still to finish before a drain completes
    #[must_use]
    pub fn pending_sessions(&self) -> usize {
        lock(&self.drain).pending.len()
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Scan slots in order and reserve the first free one that matches
    fn reserve(&self, capabilities: &Capabilities) -> Result<Arc<SessionSlot>> {
        let _guard = lock(&self.allocation);

        let busy = self.slots.iter().filter(|s| !s.is_available()).count();
        if busy >= self.max_session_count {
            return Err(Error::RetryableCapacity(format!(
                "node {} is at its limit of {} sessions",
                self.id, self.max_session_count
            )));
        }

        if self.is_draining() {
            return Err(Error::RetryableCapacity(format!("node {} is draining", self.id)));
        }

        self.slots
            .iter()
            .find(|slot| slot.is_available() && slot.test(capabilities) && slot.reserve())
            .cloned()
            .ok_or_else(|| {
                Error::RetryableCapacity(format!("node {} has no free matching slot", self.id))
            })
    }

    /// A slot went back to Available; count it toward an ongoing drain
    fn slot_freed(&self, slot: SlotId) {
        if !self.is_draining() {
            return;
        }
        let fire = {
            let mut drain = lock(&self.drain);
            drain.pending.remove(&slot);
            if drain.pending.is_empty() && !drain.completed {
                drain.completed = true;
                true
            } else {
                false
            }
        };
        if fire {
            tracing::info!(node_id = %self.id, "drain complete");
            self.bus.publish(GridEvent::NodeDrainComplete(self.id));
        }
    }

    fn begin_drain(&self) {
        let fire_complete = {
            let _guard = lock(&self.allocation);
            if self.draining.swap(true, Ordering::SeqCst) {
                return;
            }
            let mut drain = lock(&self.drain);
            drain.pending = self
                .slots
                .iter()
                .filter(|s| !s.is_available())
                .map(|s| s.id())
                .collect();
            tracing::info!(node_id = %self.id, pending = drain.pending.len(), "draining node");
            if drain.pending.is_empty() {
                drain.completed = true;
            }
            drain.completed
        };

        self.bus.publish(GridEvent::NodeDrainStarted(self.id));
        if fire_complete {
            tracing::info!(node_id = %self.id, "drain complete");
            self.bus.publish(GridEvent::NodeDrainComplete(self.id));
        }
    }

    /// Tear down a session that has already been taken out of the cache
    async fn close_session(&self, id: &SessionId, slot: &SessionSlot) {
        slot.stop().await;
        self.temp_dirs.invalidate(id);
        self.bus.publish(GridEvent::SessionClosed {
            session_id: id.clone(),
            node_uri: self.uri.clone(),
        });
        self.slot_freed(slot.id());
    }

    /// Evict sessions that have been idle for longer than the timeout
    pub async fn sweep(&self) {
        for (id, slot) in self.sessions.sweep() {
            tracing::info!(node_id = %self.id, session_id = %id, "session idle timeout, stopping");
            self.close_session(&id, &slot).await;
        }
        // Staging dirs of live sessions are touched alongside them; anything
        // left here is orphaned and dropping it deletes the directory
        let orphaned = self.temp_dirs.sweep();
        if !orphaned.is_empty() {
            tracing::debug!(node_id = %self.id, count = orphaned.len(), "removed idle staging directories");
        }
    }

    /// Best-effort stop of every running session
    pub async fn stop_all(&self) {
        for (id, slot) in self.sessions.invalidate_all() {
            tracing::info!(node_id = %self.id, session_id = %id, "stopping session on shutdown");
            self.close_session(&id, &slot).await;
        }
    }

    /// Staging directory for a running session, created on first use
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` for an unknown session, or an IO error if
    /// the directory cannot be created
    pub fn temp_dir(&self, id: &SessionId) -> Result<PathBuf> {
        if !self.sessions.contains(id) {
            return Err(Error::NotFound(format!("no session {id} on node {}", self.id)));
        }
        if let Some(dir) = self.temp_dirs.get(id) {
            return Ok(dir.path().to_path_buf());
        }
        let dir = tempfile::Builder::new()
            .prefix(&format!("grid-{id}-"))
            .tempdir()?;
        let path = dir.path().to_path_buf();
        self.temp_dirs.insert(id.clone(), Arc::new(dir));
        Ok(path)
    }

    async fn run_health_checks(&self) -> HealthCheckResult {
        for check in &self.health_checks {
            let result = check.check().await;
            if result.is_down() {
                return result;
            }
        }
        HealthCheckResult::up(format!("node {} is healthy", self.id))
    }

    async fn snapshot(&self) -> NodeStatus {
        let availability = if self.run_health_checks().await.is_down() {
            Availability::Down
        } else if self.is_draining() {
            Availability::Draining
        } else {
            Availability::Up
        };

        NodeStatus {
            node_id: self.id,
            external_uri: self.uri.clone(),
            max_session_count: self.max_session_count,
            slots: self.slots.iter().map(|s| s.summary()).collect(),
            availability,
            heartbeat_period: self.heartbeat_period,
            version: self.version.clone(),
            os_info: self.os_info.clone(),
            last_touched: Utc::now(),
        }
    }

    fn external_session(&self, slot: &SessionSlot, id: &SessionId) -> Result<Session> {
        let active = slot
            .session()
            .filter(|s| s.id() == id)
            .ok_or_else(|| Error::NotFound(format!("no session {id} on node {}", self.id)))?;
        Ok(Session {
            id: id.clone(),
            uri: self.uri.clone(),
            stereotype: slot.stereotype().clone(),
            capabilities: active.capabilities().clone(),
            start_time: active.start_time(),
        })
    }

    /// Spawn the idle sweep and heartbeat loops
    ///
    /// Both stop when [`LocalNode::shutdown`] is called; every running
    /// session is then stopped.
    #[must_use]
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let sweep_every = (self.sessions.ttl() / 4).clamp(Duration::from_millis(10), MAX_SWEEP_INTERVAL);

        let node = Arc::clone(self);
        let sweeper = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_every);
            loop {
                tokio::select! {
                    () = node.shutdown.cancelled() => break,
                    _ = ticker.tick() => node.sweep().await,
                }
            }
            node.stop_all().await;
            tracing::debug!(node_id = %node.id, "session sweeper stopped");
        });

        let node = Arc::clone(self);
        let heartbeat = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(node.heartbeat_period);
            loop {
                tokio::select! {
                    () = node.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let status = node.snapshot().await;
                        node.bus.publish(GridEvent::NodeHeartbeat(status));
                    }
                }
            }
            tracing::debug!(node_id = %node.id, "heartbeat stopped");
        });

        vec![sweeper, heartbeat]
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl Node for LocalNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn uri(&self) -> &Url {
        &self.uri
    }

    async fn is_supporting(&self, capabilities: &Capabilities) -> bool {
        self.slots.iter().any(|s| s.test(capabilities))
    }

    async fn new_session(&self, request: CreateSessionRequest) -> Result<CreateSessionResponse> {
        let slot = self.reserve(&request.capabilities)?;

        let active = match slot.apply(&request).await {
            Ok(active) => active,
            Err(e) => {
                tracing::warn!(node_id = %self.id, slot = %slot.id(), error = %e, "session creation failed");
                self.slot_freed(slot.id());
                return Err(e);
            }
        };

        let id = active.id().clone();
        self.sessions.insert(id.clone(), Arc::clone(&slot));

        let session = Session {
            id: id.clone(),
            uri: self.uri.clone(),
            stereotype: slot.stereotype().clone(),
            capabilities: request.capabilities.merge(active.capabilities()),
            start_time: active.start_time(),
        };

        tracing::info!(node_id = %self.id, session_id = %id, slot = %slot.id(), "session created");

        let created = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        if self.drain_after > 0 && created >= self.drain_after {
            tracing::info!(node_id = %self.id, created, "session limit reached, draining");
            self.begin_drain();
        }

        Ok(CreateSessionResponse::new(session, request.dialect()))
    }

    async fn execute_command(&self, request: CommandRequest) -> Result<CommandResponse> {
        let id = request
            .session_id()
            .ok_or_else(|| Error::NotFound(format!("no session id in {}", request.path)))?;
        let slot = self
            .sessions
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("no session {id} on node {}", self.id)))?;
        // The slot may have been freed and handed to another session meanwhile
        let active = slot
            .session()
            .filter(|s| s.id() == &id)
            .ok_or_else(|| Error::NotFound(format!("no session {id} on node {}", self.id)))?;
        self.temp_dirs.touch(&id);

        let terminating = request.is_session_delete();
        let response = active.execute(request).await?;

        if terminating {
            if let Some(slot) = self.sessions.invalidate(&id) {
                tracing::info!(node_id = %self.id, session_id = %id, "session deleted by client");
                self.close_session(&id, &slot).await;
            }
        }
        Ok(response)
    }

    async fn session(&self, id: &SessionId) -> Result<Session> {
        let slot = self
            .sessions
            .peek(id)
            .ok_or_else(|| Error::NotFound(format!("no session {id} on node {}", self.id)))?;
        self.external_session(&slot, id)
    }

    async fn is_session_owner(&self, id: &SessionId) -> bool {
        self.sessions.contains(id)
    }

    async fn stop_session(&self, id: &SessionId) -> Result<()> {
        let slot = self
            .sessions
            .invalidate(id)
            .ok_or_else(|| Error::NotFound(format!("no session {id} on node {}", self.id)))?;
        tracing::info!(node_id = %self.id, session_id = %id, "stopping session");
        self.close_session(id, &slot).await;
        Ok(())
    }

    async fn drain(&self) {
        self.begin_drain();
    }

    async fn status(&self) -> Result<NodeStatus> {
        Ok(self.snapshot().await)
    }

    async fn health_check(&self) -> HealthCheckResult {
        self.run_health_checks().await
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::DateTime;

    use super::*;
    use crate::node::ActiveSession;

    struct Echo {
        id: SessionId,
        uri: Url,
        caps: Capabilities,
    }

    #[async_trait]
    impl ActiveSession for Echo {
        fn id(&self) -> &SessionId {
            &self.id
        }
        fn uri(&self) -> &Url {
            &self.uri
        }
        fn capabilities(&self) -> &Capabilities {
            &self.caps
        }
        fn start_time(&self) -> DateTime<Utc> {
            Utc::now()
        }
        async fn execute(&self, _: CommandRequest) -> Result<CommandResponse> {
            Ok(CommandResponse::ok(self.id.to_string()))
        }
        async fn stop(&self) {}
    }

    struct EchoFactory;

    #[async_trait]
    impl SessionFactory for EchoFactory {
        async fn create(&self, request: &CreateSessionRequest) -> Result<Arc<dyn ActiveSession>> {
            Ok(Arc::new(Echo {
                id: SessionId::new(),
                uri: Url::parse("http://localhost:9515").unwrap(),
                caps: request.capabilities.clone(),
            }))
        }
    }

    fn chrome() -> Capabilities {
        Capabilities::new().with("browserName", "chrome")
    }

    #[tokio::test]
    async fn command_for_a_replaced_session_is_not_found() {
        let factory: Arc<dyn SessionFactory> = Arc::new(EchoFactory);
        let node = LocalNode::builder(Url::parse("http://a:5555").unwrap(), EventBus::new())
            .add_slots(&chrome(), &factory, 1)
            .build();

        let old = node.new_session(CreateSessionRequest::new(chrome())).await.unwrap().session.id;
        // Free the slot without going through the session cache
        let slot = node.sessions.get(&old).unwrap();
        assert!(slot.stop().await);
        let new = node.new_session(CreateSessionRequest::new(chrome())).await.unwrap().session.id;

        let stale = node
            .execute_command(CommandRequest::new("GET", format!("/session/{old}/url")))
            .await;
        assert!(matches!(stale, Err(Error::NotFound(_))));

        let live = node
            .execute_command(CommandRequest::new("GET", format!("/session/{new}/url")))
            .await
            .unwrap();
        assert_eq!(live.body, new.to_string());
    }
}

//! Copy-on-write view of registered nodes
//!
//! Placement reads the whole fleet on every request while heartbeats and
//! health checks write a record at a time. Readers grab an `Arc` snapshot
//! and never block writers for longer than a pointer swap.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::time::Instant;
use url::Url;

use crate::data::{Availability, NodeId, NodeStatus};
use crate::node::Node;

/// What the distributor knows about one node
#[derive(Clone)]
pub struct NodeRecord {
    pub node: Arc<dyn Node>,
    pub status: NodeStatus,
    pub last_heartbeat: Instant,
    /// Result of the most recent health probe
    pub healthy: bool,
}

impl NodeRecord {
    #[must_use]
    pub fn new(node: Arc<dyn Node>, status: NodeStatus) -> Self {
        Self {
            node,
            status,
            last_heartbeat: Instant::now(),
            healthy: true,
        }
    }

    /// No heartbeat within `misses_allowed` heartbeat periods
    #[must_use]
    pub fn heartbeat_missed(&self, now: Instant, misses_allowed: u32) -> bool {
        let grace = self
            .status
            .heartbeat_period
            .checked_mul(misses_allowed)
            .unwrap_or(Duration::MAX);
        now.saturating_duration_since(self.last_heartbeat) > grace
    }

    /// Availability after accounting for silence and failed probes
    #[must_use]
    pub fn availability(&self, now: Instant, misses_allowed: u32) -> Availability {
        if !self.healthy || self.heartbeat_missed(now, misses_allowed) {
            Availability::Down
        } else {
            self.status.availability
        }
    }
}

pub type FleetSnapshot = Arc<HashMap<NodeId, NodeRecord>>;

#[derive(Default)]
pub struct Fleet {
    nodes: RwLock<FleetSnapshot>,
}

impl Fleet {
    #[must_use]
    pub fn snapshot(&self) -> FleetSnapshot {
        Arc::clone(&self.nodes.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Apply `f` to a private copy and publish it
    pub fn update<R>(&self, f: impl FnOnce(&mut HashMap<NodeId, NodeRecord>) -> R) -> R {
        let mut guard = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = HashMap::clone(&guard);
        let result = f(&mut next);
        *guard = Arc::new(next);
        result
    }

    #[must_use]
    pub fn get(&self, id: &NodeId) -> Option<NodeRecord> {
        self.snapshot().get(id).cloned()
    }

    #[must_use]
    pub fn by_uri(&self, uri: &Url) -> Option<NodeRecord> {
        self.snapshot()
            .values()
            .find(|r| r.node.uri() == uri)
            .cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

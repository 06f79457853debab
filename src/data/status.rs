//! Node status snapshots

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use super::{Capabilities, NodeId, Session, SlotId};

/// Whether a node takes new work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Availability {
    Up,
    Draining,
    Down,
}

/// Coarse slot state as seen from outside the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotState {
    Available,
    Reserved,
    Occupied,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotSummary {
    pub id: SlotId,
    pub stereotype: Capabilities,
    pub state: SlotState,
    pub last_started: DateTime<Utc>,
    pub session: Option<Session>,
}

impl SlotSummary {
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.state == SlotState::Available
    }
}

/// Host description carried in status reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsInfo {
    pub name: String,
    pub arch: String,
    pub hostname: String,
}

impl OsInfo {
    /// Describe the current host
    #[must_use]
    pub fn current() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        Self {
            name: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            hostname,
        }
    }
}

/// Point-in-time view of a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub node_id: NodeId,
    pub external_uri: Url,
    pub max_session_count: usize,
    pub slots: Vec<SlotSummary>,
    pub availability: Availability,
    pub heartbeat_period: Duration,
    pub version: String,
    pub os_info: OsInfo,
    pub last_touched: DateTime<Utc>,
}

impl NodeStatus {
    /// Slots that are reserved or running a session
    #[must_use]
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_available()).count()
    }

    /// Whether any slot stereotype could ever serve `caps`
    #[must_use]
    pub fn supports(&self, caps: &Capabilities) -> bool {
        self.slots.iter().any(|s| s.stereotype.supports(caps))
    }

    /// Free slots able to serve `caps`, bounded by the session limit
    #[must_use]
    pub fn available_matching(&self, caps: &Capabilities) -> usize {
        let headroom = self.max_session_count.saturating_sub(self.occupied());
        let free = self
            .slots
            .iter()
            .filter(|s| s.is_available() && s.stereotype.supports(caps))
            .count();
        free.min(headroom)
    }

    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.occupied() < self.max_session_count && self.slots.iter().any(SlotSummary::is_available)
    }

    #[must_use]
    pub fn has_capacity_for(&self, caps: &Capabilities) -> bool {
        self.available_matching(caps) > 0
    }

    /// Share of the session limit in use, as a percentage
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn load(&self) -> f64 {
        if self.max_session_count == 0 {
            return 100.0;
        }
        self.occupied() as f64 / self.max_session_count as f64 * 100.0
    }

    /// Most recent session start across all slots
    #[must_use]
    pub fn last_session_created(&self) -> Option<DateTime<Utc>> {
        self.slots
            .iter()
            .filter(|s| s.session.is_some())
            .map(|s| s.last_started)
            .max()
    }
}

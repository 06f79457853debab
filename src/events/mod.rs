//! Grid event bus
//!
//! Nodes publish heartbeats and lifecycle signals here; the distributor and
//! session map subscribe. Publishing is fire-and-forget: an event with no
//! subscribers is simply dropped, and consumers must tolerate duplicates.
//!
//! In node mode the bus is bridged to a remote hub by [`forward`].

pub mod forward;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use url::Url;

use crate::data::{NodeId, NodeStatus, SessionId};

/// Buffered events per subscriber before it starts lagging
const BUS_CAPACITY: usize = 1024;

/// Something that happened on a node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum GridEvent {
    /// Periodic status broadcast
    NodeHeartbeat(NodeStatus),
    NodeDrainStarted(NodeId),
    /// All sessions that were running when the drain began have finished
    NodeDrainComplete(NodeId),
    NodeRemoved(NodeId),
    /// A node let go of a session (stop, delete or idle timeout)
    #[serde(rename_all = "camelCase")]
    SessionClosed { session_id: SessionId, node_uri: Url },
}

impl GridEvent {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::NodeHeartbeat(_) => "node-heartbeat",
            Self::NodeDrainStarted(_) => "node-drain-started",
            Self::NodeDrainComplete(_) => "node-drain-complete",
            Self::NodeRemoved(_) => "node-removed",
            Self::SessionClosed { .. } => "session-closed",
        }
    }
}

/// Cloneable handle onto a broadcast channel of [`GridEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GridEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Publish (best-effort, fire-and-forget)
    pub fn publish(&self, event: GridEvent) {
        tracing::trace!(event = event.name(), "publishing grid event");
        // Err only means nobody is listening
        let _ = self.tx.send(event);
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<GridEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let node = NodeId::new();
        bus.publish(GridEvent::NodeDrainStarted(node));

        match rx.recv().await.unwrap() {
            GridEvent::NodeDrainStarted(id) => assert_eq!(id, node),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        EventBus::new().publish(GridEvent::SessionClosed {
            session_id: SessionId::new(),
            node_uri: Url::parse("http://node:5555").unwrap(),
        });
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(GridEvent::SessionClosed {
            session_id: SessionId::from("s1"),
            node_uri: Url::parse("http://node:5555").unwrap(),
        })
        .unwrap();
        assert_eq!(json["type"], "session-closed");
        assert_eq!(json["data"]["sessionId"], "s1");
    }
}

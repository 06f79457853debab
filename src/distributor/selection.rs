//! Candidate ranking for placement
//!
//! Among nodes with a free slot for the request: most free matching slots
//! first, then lowest load, then lowest node id. The last key only exists
//! to make the order reproducible.

use std::cmp::{Ordering, Reverse};

use crate::data::{Capabilities, NodeId, NodeStatus};

/// Node ids that can take `capabilities` right now, best first
#[must_use]
pub fn rank<'a>(
    candidates: impl IntoIterator<Item = &'a NodeStatus>,
    capabilities: &Capabilities,
) -> Vec<NodeId> {
    let mut scored: Vec<(usize, f64, NodeId)> = candidates
        .into_iter()
        .map(|s| (s.available_matching(capabilities), s.load(), s.node_id))
        .filter(|(free, _, _)| *free > 0)
        .collect();

    scored.sort_by(|a, b| {
        Reverse(a.0)
            .cmp(&Reverse(b.0))
            .then_with(|| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
            .then_with(|| a.2.cmp(&b.2))
    });
    scored.into_iter().map(|(_, _, id)| id).collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use url::Url;
    use uuid::Uuid;

    use super::*;
    use crate::data::{Availability, OsInfo, SlotId, SlotState, SlotSummary};

    fn node(id: u128, states: &[SlotState], browser: &str) -> NodeStatus {
        let node_id = NodeId::from_uuid(Uuid::from_u128(id));
        NodeStatus {
            node_id,
            external_uri: Url::parse(&format!("http://node{id}:5555")).unwrap(),
            max_session_count: states.len(),
            slots: states
                .iter()
                .map(|state| SlotSummary {
                    id: SlotId::new(node_id),
                    stereotype: Capabilities::new().with("browserName", browser),
                    state: *state,
                    last_started: Utc::now(),
                    session: None,
                })
                .collect(),
            availability: Availability::Up,
            heartbeat_period: Duration::from_secs(60),
            version: "test".into(),
            os_info: OsInfo::current(),
            last_touched: Utc::now(),
        }
    }

    fn chrome() -> Capabilities {
        Capabilities::new().with("browserName", "chrome")
    }

    use crate::data::SlotState::{Available as Free, Occupied as Busy};

    #[test]
    fn most_free_matching_slots_wins() {
        let a = node(1, &[Free, Busy, Busy], "chrome");
        let b = node(2, &[Free, Free, Busy], "chrome");
        assert_eq!(rank([&a, &b], &chrome()), vec![b.node_id, a.node_id]);
    }

    #[test]
    fn lower_load_breaks_capacity_ties() {
        let a = node(1, &[Free, Busy, Busy, Busy], "chrome");
        let b = node(2, &[Free, Busy], "chrome");
        assert_eq!(rank([&a, &b], &chrome()), vec![b.node_id, a.node_id]);
    }

    #[test]
    fn node_id_breaks_remaining_ties() {
        let a = node(7, &[Free, Busy], "chrome");
        let b = node(3, &[Free, Busy], "chrome");
        assert_eq!(rank([&a, &b], &chrome()), vec![b.node_id, a.node_id]);
    }

    #[test]
    fn full_and_mismatched_nodes_are_skipped() {
        let full = node(1, &[Busy], "chrome");
        let firefox = node(2, &[Free], "firefox");
        assert!(rank([&full, &firefox], &chrome()).is_empty());
    }
}

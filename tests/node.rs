//! Local node integration tests: allocation, capacity, drain and eviction

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use session_grid::data::{Availability, CommandRequest};
use session_grid::node::SessionFactory;
use session_grid::{Error, EventBus, GridEvent, LocalNode, Node};

mod common;
use common::{FakeFactory, caps, node, node_uri, request};

#[tokio::test]
async fn concurrent_requests_never_share_a_slot() {
    let bus = EventBus::new();
    let factory = FakeFactory::slow(Duration::from_millis(20));
    let node = node("a", &bus, "chrome", 3, &factory);

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let node = Arc::clone(&node);
            tokio::spawn(async move { node.new_session(request("chrome")).await })
        })
        .collect();

    let mut ids = HashSet::new();
    let mut refused = 0;
    for attempt in attempts {
        match attempt.await.expect("task panicked") {
            Ok(resp) => assert!(ids.insert(resp.session.id)),
            Err(e) => {
                assert!(e.is_retryable(), "unexpected error {e}");
                refused += 1;
            }
        }
    }

    assert_eq!(ids.len(), 3);
    assert_eq!(refused, 5);
    assert_eq!(factory.created(), 3);

    let status = node.status().await.expect("status");
    assert_eq!(status.occupied(), 3);
    assert!(status.occupied() <= status.max_session_count);
}

#[tokio::test]
async fn request_beyond_max_sessions_is_retryable() {
    let bus = EventBus::new();
    let factory = FakeFactory::new();
    let dyn_factory: Arc<dyn SessionFactory> = factory.clone();
    let node = LocalNode::builder(node_uri("a"), bus)
        .add_slots(&caps("chrome"), &dyn_factory, 4)
        .max_sessions(2)
        .build();

    assert_eq!(node.max_session_count(), 2);
    node.new_session(request("chrome")).await.expect("first");
    node.new_session(request("chrome")).await.expect("second");

    let err = node.new_session(request("chrome")).await.unwrap_err();
    assert!(matches!(err, Error::RetryableCapacity(_)));
    assert_eq!(factory.created(), 2);
}

#[tokio::test]
async fn max_sessions_never_exceeds_slot_count() {
    let bus = EventBus::new();
    let factory: Arc<dyn SessionFactory> = FakeFactory::new();
    let node = LocalNode::builder(node_uri("a"), bus)
        .add_slots(&caps("chrome"), &factory, 2)
        .max_sessions(16)
        .build();
    assert_eq!(node.max_session_count(), 2);
}

#[tokio::test]
async fn failed_creation_frees_the_slot() {
    let bus = EventBus::new();
    let factory = FakeFactory::failing();
    let node = node("a", &bus, "chrome", 1, &factory);

    let err = node.new_session(request("chrome")).await.unwrap_err();
    assert!(matches!(err, Error::CreationFailed(_)));

    factory.set_failing(false);
    node.new_session(request("chrome")).await.expect("slot is free again");
}

#[tokio::test]
async fn response_uses_external_uri_and_merged_capabilities() {
    let bus = EventBus::new();
    let factory = FakeFactory::new();
    let node = node("a", &bus, "chrome", 1, &factory);

    let resp = node
        .new_session(session_grid::CreateSessionRequest::new(caps("chrome").with("acceptInsecureCerts", true)))
        .await
        .expect("created");

    assert_eq!(resp.session.uri, node_uri("a"));
    assert_eq!(resp.session.capabilities.get("acceptInsecureCerts"), Some(&true.into()));
    assert_eq!(resp.session.capabilities.get("fake:resolved"), Some(&true.into()));
    assert_eq!(resp.payload["value"]["sessionId"], resp.session.id.as_str());
}

#[tokio::test]
async fn drain_refuses_new_work_and_completes_once() {
    let bus = EventBus::new();
    let mut events = bus.subscribe();
    let factory = FakeFactory::new();
    let node = node("a", &bus, "chrome", 2, &factory);

    let first = node.new_session(request("chrome")).await.expect("first");
    let second = node.new_session(request("chrome")).await.expect("second");

    node.drain().await;
    assert!(node.is_draining());
    assert_eq!(node.status().await.expect("status").availability, Availability::Draining);

    let err = node.new_session(request("chrome")).await.unwrap_err();
    assert!(err.is_retryable());

    node.stop_session(&first.session.id).await.expect("stop first");
    assert_eq!(node.pending_sessions(), 1);
    // Draining twice changes nothing
    node.drain().await;
    node.stop_session(&second.session.id).await.expect("stop second");
    assert_eq!(node.pending_sessions(), 0);

    let mut started = 0;
    let mut completed = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            GridEvent::NodeDrainStarted(id) if id == node.id() => started += 1,
            GridEvent::NodeDrainComplete(id) if id == node.id() => completed += 1,
            _ => {}
        }
    }
    assert_eq!(started, 1);
    assert_eq!(completed, 1);
}

#[tokio::test]
async fn idle_node_completes_drain_immediately() {
    let bus = EventBus::new();
    let mut events = bus.subscribe();
    let node = node("a", &bus, "chrome", 1, &FakeFactory::new());

    node.drain().await;

    let mut completed = false;
    while let Ok(event) = events.try_recv() {
        completed |= matches!(event, GridEvent::NodeDrainComplete(id) if id == node.id());
    }
    assert!(completed);
}

#[tokio::test]
async fn drains_itself_after_session_limit() {
    let bus = EventBus::new();
    let factory: Arc<dyn SessionFactory> = FakeFactory::new();
    let node = LocalNode::builder(node_uri("a"), bus)
        .add_slots(&caps("chrome"), &factory, 2)
        .drain_after(1)
        .build();

    node.new_session(request("chrome")).await.expect("single use");
    assert!(node.is_draining());
    assert!(node.new_session(request("chrome")).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn idle_session_is_evicted_and_stopped_once() {
    let bus = EventBus::new();
    let mut events = bus.subscribe();
    let factory = FakeFactory::new();
    let dyn_factory: Arc<dyn SessionFactory> = factory.clone();
    let node = LocalNode::builder(node_uri("a"), bus)
        .add_slots(&caps("chrome"), &dyn_factory, 1)
        .session_timeout(Duration::from_secs(60))
        .build();

    let resp = node.new_session(request("chrome")).await.expect("created");
    let id = resp.session.id.clone();

    tokio::time::advance(Duration::from_secs(45)).await;
    let cmd = CommandRequest::new("GET", format!("/session/{id}/url"));
    node.execute_command(cmd).await.expect("touches the session");

    tokio::time::advance(Duration::from_secs(45)).await;
    node.sweep().await;
    assert!(node.is_session_owner(&id).await, "touched session must survive");

    tokio::time::advance(Duration::from_secs(20)).await;
    node.sweep().await;
    node.sweep().await;

    assert!(!node.is_session_owner(&id).await);
    assert_eq!(factory.stopped(), 1);
    assert!(matches!(node.session(&id).await, Err(Error::NotFound(_))));

    let closed = std::iter::from_fn(|| events.try_recv().ok())
        .filter(|e| matches!(e, GridEvent::SessionClosed { session_id, .. } if *session_id == id))
        .count();
    assert_eq!(closed, 1);

    // The slot is usable again
    node.new_session(request("chrome")).await.expect("slot freed");
}

#[tokio::test]
async fn delete_command_ends_the_session() {
    let bus = EventBus::new();
    let factory = FakeFactory::new();
    let node = node("a", &bus, "chrome", 1, &factory);
    let id = node.new_session(request("chrome")).await.expect("created").session.id;

    let resp = node
        .execute_command(CommandRequest::new("DELETE", format!("/session/{id}")))
        .await
        .expect("deleted");
    assert_eq!(resp.status, 200);
    assert!(!node.is_session_owner(&id).await);
    assert_eq!(factory.stopped(), 1);

    let err = node
        .execute_command(CommandRequest::new("GET", format!("/session/{id}/url")))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn temp_dir_lives_with_the_session() {
    let bus = EventBus::new();
    let node = node("a", &bus, "chrome", 1, &FakeFactory::new());
    let id = node.new_session(request("chrome")).await.expect("created").session.id;

    let dir = node.temp_dir(&id).expect("staging dir");
    assert!(dir.is_dir());
    assert_eq!(node.temp_dir(&id).expect("same dir"), dir);

    node.stop_session(&id).await.expect("stopped");
    assert!(!dir.exists());
    assert!(node.temp_dir(&id).is_err());
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let bus = EventBus::new();
    let node = node("a", &bus, "chrome", 1, &FakeFactory::new());
    let id = session_grid::SessionId::from("missing");
    assert!(matches!(node.stop_session(&id).await, Err(Error::NotFound(_))));
    assert!(!node.is_session_owner(&id).await);
}

#[tokio::test]
async fn shutdown_stops_every_session() {
    let bus = EventBus::new();
    let factory = FakeFactory::new();
    let node = node("a", &bus, "chrome", 2, &factory);
    node.new_session(request("chrome")).await.expect("first");
    node.new_session(request("chrome")).await.expect("second");

    let tasks = node.start();
    node.shutdown();
    for task in tasks {
        task.await.expect("task exits");
    }

    assert_eq!(factory.stopped(), 2);
    assert_eq!(node.session_count(), 0);
}

#[tokio::test]
async fn supports_only_its_stereotypes() {
    let bus = EventBus::new();
    let node = node("a", &bus, "chrome", 1, &FakeFactory::new());
    assert!(node.is_supporting(&caps("chrome")).await);
    assert!(!node.is_supporting(&caps("firefox")).await);
}

//! API endpoint integration tests

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::{Value, json};
use tower::ServiceExt;

use session_grid::api::{ApiServer, ApiState};
use session_grid::config::{DistributorConfig, QueueConfig};
use session_grid::{Distributor, EventBus, LocalNode, LocalSessionMap, NewSessionQueue, NodeStatus};

mod common;
use common::{FakeFactory, node};

struct TestGrid {
    router: axum::Router,
    node: Arc<LocalNode>,
    factory: Arc<FakeFactory>,
}

/// Standalone grid with one local chrome node of two slots
async fn build_test_grid() -> TestGrid {
    let bus = EventBus::new();
    let factory = FakeFactory::new();
    let node = node("localhost", &bus, "chrome", 2, &factory);
    let queue = Arc::new(NewSessionQueue::new(QueueConfig::default()));
    let distributor = Distributor::new(
        DistributorConfig::default(),
        Arc::new(LocalSessionMap::new()),
        queue,
        bus.clone(),
    );
    distributor.add(node.clone()).await.expect("add node");

    let router = ApiServer::builder()
        .grid(ApiState {
            distributor,
            bus,
            client: reqwest::Client::new(),
        })
        .node(Arc::clone(&node))
        .build()
        .router();

    TestGrid { router, node, factory }
}

async fn send(router: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn w3c(browser: &str) -> Value {
    json!({ "capabilities": { "alwaysMatch": { "browserName": browser } } })
}

#[tokio::test]
async fn test_health_endpoint() {
    let grid = build_test_grid().await;
    let (status, json) = send(&grid.router, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_session_lifecycle() {
    let grid = build_test_grid().await;

    let (status, json) = send(&grid.router, post("/session", &w3c("chrome"))).await;
    assert_eq!(status, StatusCode::OK);
    let id = json["value"]["sessionId"].as_str().unwrap().to_string();
    assert_eq!(json["value"]["capabilities"]["browserName"], "chrome");

    let (status, json) = send(&grid.router, post(&format!("/session/{id}/url"), &json!({"url": "about:blank"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["value"]["method"], "POST");
    assert_eq!(json["value"]["path"], format!("/session/{id}/url"));

    let (status, json) = send(&grid.router, get(&format!("/se/grid/sessions/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["value"]["nodeUri"], "http://localhost:5555/");

    let (status, _) = send(&grid.router, delete(&format!("/session/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(grid.factory.stopped(), 1);
    assert_eq!(grid.node.session_count(), 0);

    let (status, json) = send(&grid.router, get(&format!("/session/{id}/title"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["value"]["error"], "invalid session id");
}

#[tokio::test]
async fn test_legacy_payload_gets_legacy_response() {
    let grid = build_test_grid().await;
    let body = json!({ "desiredCapabilities": { "browserName": "chrome" } });

    let (status, json) = send(&grid.router, post("/session", &body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], 0);
    assert!(json["sessionId"].is_string());
    assert_eq!(json["value"]["browserName"], "chrome");
}

#[tokio::test]
async fn test_unsupported_browser_is_rejected() {
    let grid = build_test_grid().await;
    let (status, json) = send(&grid.router, post("/session", &w3c("firefox"))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["value"]["error"], "session not created");
    assert_eq!(grid.factory.created(), 0);
}

#[tokio::test]
async fn test_malformed_payload_is_rejected() {
    let grid = build_test_grid().await;
    let request = Request::builder()
        .method("POST")
        .uri("/session")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, json) = send(&grid.router, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["value"]["error"], "session not created");
}

#[tokio::test]
async fn test_unknown_route() {
    let grid = build_test_grid().await;
    let (status, json) = send(&grid.router, get("/wd/hub/nothing")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["value"]["error"], "unknown command");
}

#[tokio::test]
async fn test_unsupported_method_on_session_is_unknown_command() {
    let grid = build_test_grid().await;
    let (_, json) = send(&grid.router, post("/session", &w3c("chrome"))).await;
    let id = json["value"]["sessionId"].as_str().unwrap().to_string();

    for request in [get(&format!("/session/{id}")), delete("/session")] {
        let (status, json) = send(&grid.router, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["value"]["error"], "unknown command");
    }
    assert_eq!(grid.node.session_count(), 1);
}

#[tokio::test]
async fn test_grid_status() {
    let grid = build_test_grid().await;
    send(&grid.router, post("/session", &w3c("chrome"))).await;

    let (status, json) = send(&grid.router, get("/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["value"]["ready"], true);
    assert_eq!(json["value"]["sessionCount"], 1);
    assert!(json["value"]["lastSessionCreated"].is_string());
    assert_eq!(json["value"]["queueSize"], 0);
    assert_eq!(json["value"]["nodes"].as_array().unwrap().len(), 1);
    assert_eq!(json["value"]["nodes"][0]["availability"], "UP");
}

#[tokio::test]
async fn test_session_listing() {
    let grid = build_test_grid().await;
    send(&grid.router, post("/session", &w3c("chrome"))).await;
    send(&grid.router, post("/session", &w3c("chrome"))).await;

    let (status, json) = send(&grid.router, get("/se/grid/sessions")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["value"]["count"], 2);

    let (status, _) = send(&grid.router, get("/se/grid/sessions/unknown")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_queue_endpoints() {
    let grid = build_test_grid().await;

    let (status, json) = send(&grid.router, get("/se/grid/queue")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["value"], json!([]));

    let (status, json) = send(&grid.router, delete("/se/grid/queue")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["value"], 0);
}

#[tokio::test]
async fn test_drain_and_remove_node() {
    let grid = build_test_grid().await;
    let id = session_grid::Node::id(grid.node.as_ref());

    let (status, _) = send(&grid.router, post(&format!("/se/grid/distributor/node/{id}/drain"), &json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(grid.node.is_draining());

    let (status, _) = send(&grid.router, delete(&format!("/se/grid/distributor/node/{id}"))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = send(&grid.router, delete(&format!("/se/grid/distributor/node/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["value"]["message"].as_str().unwrap().contains("unknown node"));
}

#[tokio::test]
async fn test_node_surface_status_and_errors() {
    let grid = build_test_grid().await;

    let (status, json) = send(&grid.router, get("/se/grid/node/status")).await;
    assert_eq!(status, StatusCode::OK);
    let node_status: NodeStatus = serde_json::from_value(json).unwrap();
    assert_eq!(node_status.slots.len(), 2);

    let (status, json) = send(&grid.router, post("/se/grid/node/supports", &json!({"browserName": "chrome"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["value"], true);

    let request = json!({
        "dialects": ["w3c"],
        "capabilities": { "browserName": "firefox" },
    });
    let (status, json) = send(&grid.router, post("/se/grid/node/session", &request)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["kind"], "retryable_capacity");

    let (status, json) = send(&grid.router, get("/se/grid/node/owner/nobody")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["value"], false);
}

#[tokio::test]
async fn test_forwarded_events_reach_the_bus() {
    let grid = build_test_grid().await;
    let id = session_grid::Node::id(grid.node.as_ref());

    let event = json!({ "type": "node-drain-complete", "data": id });
    let (status, _) = send(&grid.router, post("/se/grid/events", &event)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

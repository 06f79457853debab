//! Shared test utilities
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use url::Url;

use session_grid::data::{CommandRequest, CommandResponse};
use session_grid::node::{ActiveSession, SessionFactory};
use session_grid::{Capabilities, CreateSessionRequest, Error, EventBus, LocalNode, Result, SessionId};

/// Session that answers every command with its path
pub struct FakeSession {
    id: SessionId,
    uri: Url,
    capabilities: Capabilities,
    start_time: DateTime<Utc>,
    stops: Arc<AtomicUsize>,
}

#[async_trait]
impl ActiveSession for FakeSession {
    fn id(&self) -> &SessionId {
        &self.id
    }

    fn uri(&self) -> &Url {
        &self.uri
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    async fn execute(&self, request: CommandRequest) -> Result<CommandResponse> {
        Ok(CommandResponse::ok(format!(
            r#"{{"value":{{"method":"{}","path":"{}"}}}}"#,
            request.method, request.path
        )))
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Factory counting creations and stops
#[derive(Default)]
pub struct FakeFactory {
    created: AtomicUsize,
    stops: Arc<AtomicUsize>,
    failing: AtomicBool,
    /// Simulated driver start-up time
    delay: Option<Duration>,
}

impl FakeFactory {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn failing() -> Arc<Self> {
        let factory = Self::default();
        factory.failing.store(true, Ordering::SeqCst);
        Arc::new(factory)
    }

    #[must_use]
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionFactory for FakeFactory {
    async fn create(&self, request: &CreateSessionRequest) -> Result<Arc<dyn ActiveSession>> {
        match self.delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Config("driver binary not found".to_string()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeSession {
            id: SessionId::new(),
            uri: Url::parse("http://driver.invalid:9515/").expect("valid url"),
            capabilities: request.capabilities.clone().with("fake:resolved", true),
            start_time: Utc::now(),
            stops: Arc::clone(&self.stops),
        }))
    }
}

/// Capabilities asking for `browser`
#[must_use]
pub fn caps(browser: &str) -> Capabilities {
    Capabilities::new().with("browserName", browser)
}

#[must_use]
pub fn request(browser: &str) -> CreateSessionRequest {
    CreateSessionRequest::new(caps(browser))
}

#[must_use]
pub fn node_uri(name: &str) -> Url {
    Url::parse(&format!("http://{name}:5555")).expect("valid url")
}

/// Node at `http://{name}:5555` with `count` slots for `browser`
#[must_use]
pub fn node(name: &str, bus: &EventBus, browser: &str, count: usize, factory: &Arc<FakeFactory>) -> Arc<LocalNode> {
    let factory: Arc<dyn SessionFactory> = factory.clone();
    LocalNode::builder(node_uri(name), bus.clone())
        .add_slots(&caps(browser), &factory, count)
        .build()
}

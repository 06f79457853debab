//! HTTP API for the grid
//!
//! Two surfaces share one server builder:
//!
//! - the client-facing router (new session, command pass-through, status,
//!   grid administration), backed by a [`Distributor`]
//! - the node surface the hub uses to reach a [`LocalNode`] in another
//!   process
//!
//! A standalone grid serves both from one port.

pub mod admin;
pub mod error;
pub mod events;
pub mod health;
pub mod node;
pub mod session;

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::{ApiError, NodeError};

use crate::Result;
use crate::config::DEFAULT_PORT;
use crate::distributor::Distributor;
use crate::events::EventBus;
use crate::node::LocalNode;

/// Shared state for the client-facing handlers
pub struct ApiState {
    pub distributor: Arc<Distributor>,
    /// Bus forwarded node events are published onto
    pub bus: EventBus,
    /// Client used to reach remote nodes
    pub client: reqwest::Client,
}

/// Builder for [`ApiServer`]
pub struct ApiServerBuilder {
    host: String,
    port: u16,
    grid: Option<Arc<ApiState>>,
    node: Option<Arc<LocalNode>>,
}

impl ApiServerBuilder {
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Serve the client-facing router
    #[must_use]
    pub fn grid(mut self, state: ApiState) -> Self {
        self.grid = Some(Arc::new(state));
        self
    }

    /// Serve the node surface for `node`
    #[must_use]
    pub fn node(mut self, node: Arc<LocalNode>) -> Self {
        self.node = Some(node);
        self
    }

    #[must_use]
    pub fn build(self) -> ApiServer {
        ApiServer {
            host: self.host,
            port: self.port,
            grid: self.grid,
            node: self.node,
        }
    }
}

/// API server
pub struct ApiServer {
    host: String,
    port: u16,
    grid: Option<Arc<ApiState>>,
    node: Option<Arc<LocalNode>>,
}

impl ApiServer {
    #[must_use]
    pub fn builder() -> ApiServerBuilder {
        ApiServerBuilder {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            grid: None,
            node: None,
        }
    }

    /// Build the router with all routes
    #[must_use]
    pub fn router(&self) -> Router {
        let mut router = Router::new().merge(health::router());

        if let Some(state) = &self.grid {
            router = router
                .merge(session::router(state.clone()))
                .merge(health::status_router(state.clone()))
                .merge(admin::router(state.clone()))
                .merge(events::router(state.clone()));
        }

        if let Some(node) = &self.node {
            router = router.merge(node::router(node.clone()));
            // With a router in front, in-session commands go through it
            if self.grid.is_none() {
                router = router.merge(node::session_router(node.clone()));
            }
        }

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        router
            .fallback(error::unknown_command)
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the API server until `shutdown` fires
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server on {addr}: {e}")))?;

        tracing::info!(
            addr = %addr,
            router = self.grid.is_some(),
            node = self.node.is_some(),
            "API server listening"
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}

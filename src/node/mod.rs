//! Nodes: hosts offering a fixed pool of session slots
//!
//! [`LocalNode`] owns slots in this process. [`RemoteNode`] speaks to a
//! node process over HTTP. The distributor only sees the [`Node`] trait.

pub mod cache;
pub mod factory;
pub mod health;
pub mod local;
pub mod relay;
pub mod remote;
pub mod slot;

use async_trait::async_trait;
use url::Url;

use crate::Result;
use crate::data::{
    Capabilities, CommandRequest, CommandResponse, CreateSessionRequest, CreateSessionResponse,
    NodeId, NodeStatus, Session, SessionId,
};

pub use factory::{ActiveSession, SessionFactory};
pub use health::{HealthCheck, HealthCheckResult};
pub use local::{LocalNode, LocalNodeBuilder};
pub use relay::{RelayFactory, RelayHealthCheck};
pub use remote::RemoteNode;
pub use slot::SessionSlot;

/// Capacity management and session lifecycle for one host
#[async_trait]
pub trait Node: Send + Sync {
    fn id(&self) -> NodeId;

    /// Address clients and the router use to reach this node
    fn uri(&self) -> &Url;

    /// Whether any slot could ever serve `capabilities`
    async fn is_supporting(&self, capabilities: &Capabilities) -> bool;

    /// Reserve a matching slot and start a session on it
    ///
    /// # Errors
    ///
    /// `RetryableCapacity` when full, draining or without a free matching
    /// slot; `CreationFailed` when the driver could not start
    async fn new_session(&self, request: CreateSessionRequest) -> Result<CreateSessionResponse>;

    /// Forward an in-session command; `DELETE /session/{id}` also frees the slot
    ///
    /// # Errors
    ///
    /// `NotFound` for a session this node does not own
    async fn execute_command(&self, request: CommandRequest) -> Result<CommandResponse>;

    /// # Errors
    ///
    /// `NotFound` for a session this node does not own
    async fn session(&self, id: &SessionId) -> Result<Session>;

    async fn is_session_owner(&self, id: &SessionId) -> bool;

    /// Stop a session and free its slot
    ///
    /// # Errors
    ///
    /// `NotFound` for a session this node does not own
    async fn stop_session(&self, id: &SessionId) -> Result<()>;

    /// Stop taking new sessions and signal once running ones are done
    async fn drain(&self);

    /// # Errors
    ///
    /// Returns error if a remote node cannot be reached
    async fn status(&self) -> Result<NodeStatus>;

    async fn health_check(&self) -> HealthCheckResult;
}

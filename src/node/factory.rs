//! Session-creation collaborator
//!
//! Launching and talking to a real browser driver happens behind these two
//! traits. A slot only ever sees a [`SessionFactory`] and the
//! [`ActiveSession`] handles it produces.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use url::Url;

use crate::Result;
use crate::data::{Capabilities, CommandRequest, CommandResponse, CreateSessionRequest, SessionId};

/// A live session owned by a slot
#[async_trait]
pub trait ActiveSession: Send + Sync {
    fn id(&self) -> &SessionId;

    /// Where the driver serving this session lives
    fn uri(&self) -> &Url;

    /// Capabilities as resolved by the driver
    fn capabilities(&self) -> &Capabilities;

    fn start_time(&self) -> DateTime<Utc>;

    /// Forward an in-session command
    async fn execute(&self, request: CommandRequest) -> Result<CommandResponse>;

    /// Terminate the session. Called exactly once by the owning slot.
    async fn stop(&self);
}

/// Produces sessions for requests a slot has accepted
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// # Errors
    ///
    /// Any error means the driver could not be started; the slot reports it
    /// as a creation failure
    async fn create(&self, request: &CreateSessionRequest) -> Result<Arc<dyn ActiveSession>>;
}

//! A single reservable unit of session capacity

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use super::factory::{ActiveSession, SessionFactory};
use crate::data::{
    Capabilities, CommandRequest, CommandResponse, CreateSessionRequest, NodeId, Session, SlotId,
    SlotState, SlotSummary,
};
use crate::{Error, Result};

enum State {
    Available,
    Reserved,
    Occupied(Arc<dyn ActiveSession>),
}

struct Inner {
    state: State,
    last_started: DateTime<Utc>,
}

/// Slot bound to a stereotype
///
/// `reserve` is only meaningful under the owning node's allocation lock;
/// `apply` runs outside it.
pub struct SessionSlot {
    id: SlotId,
    stereotype: Capabilities,
    factory: Arc<dyn SessionFactory>,
    inner: Mutex<Inner>,
}

impl SessionSlot {
    #[must_use]
    pub fn new(node_id: NodeId, stereotype: Capabilities, factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            id: SlotId::new(node_id),
            stereotype,
            factory,
            inner: Mutex::new(Inner {
                state: State::Available,
                last_started: DateTime::<Utc>::UNIX_EPOCH,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub const fn id(&self) -> SlotId {
        self.id
    }

    #[must_use]
    pub const fn stereotype(&self) -> &Capabilities {
        &self.stereotype
    }

    /// Whether this slot's stereotype can serve `capabilities`
    #[must_use]
    pub fn test(&self, capabilities: &Capabilities) -> bool {
        self.stereotype.supports(capabilities)
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self.lock().state, State::Available)
    }

    /// Available -> Reserved. Returns false if the slot was not available.
    pub fn reserve(&self) -> bool {
        let mut inner = self.lock();
        if matches!(inner.state, State::Available) {
            inner.state = State::Reserved;
            true
        } else {
            false
        }
    }

    /// Roll back a reservation that was never applied
    pub fn release(&self) {
        let mut inner = self.lock();
        if matches!(inner.state, State::Reserved) {
            inner.state = State::Available;
        }
    }

    /// Start a session on a reserved slot
    ///
    /// # Errors
    ///
    /// Returns `Error::CreationFailed` if the factory fails (the slot is
    /// released), or `Error::InvariantViolation` if the slot was not reserved
    pub async fn apply(&self, request: &CreateSessionRequest) -> Result<Arc<dyn ActiveSession>> {
        if !matches!(self.lock().state, State::Reserved) {
            return Err(Error::InvariantViolation(format!(
                "slot {} applied without a reservation",
                self.id
            )));
        }

        match self.factory.create(request).await {
            Ok(session) => {
                let mut inner = self.lock();
                inner.state = State::Occupied(Arc::clone(&session));
                inner.last_started = Utc::now();
                Ok(session)
            }
            Err(e) => {
                self.release();
                Err(match e {
                    Error::CreationFailed(_) => e,
                    other => Error::CreationFailed(other.to_string()),
                })
            }
        }
    }

    /// The running session, if any
    #[must_use]
    pub fn session(&self) -> Option<Arc<dyn ActiveSession>> {
        match &self.lock().state {
            State::Occupied(session) => Some(Arc::clone(session)),
            _ => None,
        }
    }

    /// Forward a command to the running session
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the slot has no session
    pub async fn execute(&self, request: CommandRequest) -> Result<CommandResponse> {
        let session = self
            .session()
            .ok_or_else(|| Error::NotFound(format!("slot {} has no session", self.id)))?;
        session.execute(request).await
    }

    /// Terminate the running session, if any, and free the slot
    ///
    /// Returns whether a session was stopped.
    pub async fn stop(&self) -> bool {
        let Some(session) = self.session() else {
            self.release();
            return false;
        };

        session.stop().await;

        let mut inner = self.lock();
        if matches!(&inner.state, State::Occupied(s) if Arc::ptr_eq(s, &session)) {
            inner.state = State::Available;
        }
        true
    }

    #[must_use]
    pub fn summary(&self) -> SlotSummary {
        let inner = self.lock();
        let (state, session) = match &inner.state {
            State::Available => (SlotState::Available, None),
            State::Reserved => (SlotState::Reserved, None),
            State::Occupied(s) => (
                SlotState::Occupied,
                Some(Session {
                    id: s.id().clone(),
                    uri: s.uri().clone(),
                    stereotype: self.stereotype.clone(),
                    capabilities: s.capabilities().clone(),
                    start_time: s.start_time(),
                }),
            ),
        };
        SlotSummary {
            id: self.id,
            stereotype: self.stereotype.clone(),
            state,
            last_started: inner.last_started,
            session,
        }
    }
}

//! Fleet-wide registry of which node owns which session
//!
//! Written when a session is created, read on every in-session command and
//! cleared when the session ends. A session id maps to at most one node.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;
use url::Url;

use crate::data::SessionId;
use crate::{Error, Result};

/// One live session and its owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    pub session_id: SessionId,
    pub node_uri: Url,
}

/// Ownership registry; storage is pluggable behind this trait
#[async_trait]
pub trait SessionMap: Send + Sync {
    /// Record that `node_uri` owns `id`
    ///
    /// # Errors
    ///
    /// `InvariantViolation` if another node already owns `id`
    async fn add(&self, id: SessionId, node_uri: Url) -> Result<()>;

    /// # Errors
    ///
    /// `NotFound` for an unknown session
    async fn get(&self, id: &SessionId) -> Result<Url>;

    /// Forget a session; unknown ids are ignored
    async fn remove(&self, id: &SessionId);

    async fn count(&self) -> usize;

    async fn entries(&self) -> Vec<SessionEntry>;
}

/// In-memory [`SessionMap`]
#[derive(Debug, Default)]
pub struct LocalSessionMap {
    sessions: RwLock<HashMap<SessionId, Url>>,
}

impl LocalSessionMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionMap for LocalSessionMap {
    async fn add(&self, id: SessionId, node_uri: Url) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        match sessions.entry(id) {
            Entry::Vacant(slot) => {
                tracing::debug!(session_id = %slot.key(), node = %node_uri, "session registered");
                slot.insert(node_uri);
                Ok(())
            }
            Entry::Occupied(existing) if *existing.get() == node_uri => Ok(()),
            Entry::Occupied(existing) => {
                tracing::error!(
                    session_id = %existing.key(),
                    owner = %existing.get(),
                    claimant = %node_uri,
                    "session claimed by two nodes"
                );
                Err(Error::InvariantViolation(format!(
                    "session {} is already owned by {}, refusing {node_uri}",
                    existing.key(),
                    existing.get()
                )))
            }
        }
    }

    async fn get(&self, id: &SessionId) -> Result<Url> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("unknown session {id}")))
    }

    async fn remove(&self, id: &SessionId) {
        if self.sessions.write().await.remove(id).is_some() {
            tracing::debug!(session_id = %id, "session unregistered");
        }
    }

    async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn entries(&self) -> Vec<SessionEntry> {
        let mut entries: Vec<SessionEntry> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, uri)| SessionEntry {
                session_id: id.clone(),
                node_uri: uri.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        entries
    }
}

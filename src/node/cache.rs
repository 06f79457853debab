//! Idle-timeout cache keyed by session
//!
//! Entries carry a last-touch instant. Nothing is evicted implicitly:
//! [`IdleCache::sweep`] removes expired entries and hands them back so the
//! owner can run its own cleanup.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::data::SessionId;

struct Entry<V> {
    value: V,
    touched: Instant,
}

pub struct IdleCache<V> {
    ttl: Duration,
    entries: Mutex<HashMap<SessionId, Entry<V>>>,
}

impl<V: Clone> IdleCache<V> {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Entry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn insert(&self, id: SessionId, value: V) {
        self.lock().insert(
            id,
            Entry {
                value,
                touched: Instant::now(),
            },
        );
    }

    /// Look up and reset the idle timer
    pub fn get(&self, id: &SessionId) -> Option<V> {
        let mut entries = self.lock();
        let entry = entries.get_mut(id)?;
        entry.touched = Instant::now();
        Some(entry.value.clone())
    }

    /// Reset the idle timer; false if absent
    pub fn touch(&self, id: &SessionId) -> bool {
        self.lock()
            .get_mut(id)
            .map(|e| e.touched = Instant::now())
            .is_some()
    }

    /// Look up without touching
    #[must_use]
    pub fn peek(&self, id: &SessionId) -> Option<V> {
        self.lock().get(id).map(|e| e.value.clone())
    }

    #[must_use]
    pub fn contains(&self, id: &SessionId) -> bool {
        self.lock().contains_key(id)
    }

    /// Remove an entry. Only one caller ever gets `Some` for a given entry.
    pub fn invalidate(&self, id: &SessionId) -> Option<V> {
        self.lock().remove(id).map(|e| e.value)
    }

    /// Remove everything
    pub fn invalidate_all(&self) -> Vec<(SessionId, V)> {
        self.lock().drain().map(|(id, e)| (id, e.value)).collect()
    }

    /// Remove and return entries idle for longer than the ttl
    pub fn sweep(&self) -> Vec<(SessionId, V)> {
        let now = Instant::now();
        let mut entries = self.lock();
        let expired: Vec<SessionId> = entries
            .iter()
            .filter(|(_, e)| now.duration_since(e.touched) >= self.ttl)
            .map(|(id, _)| id.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|id| entries.remove(&id).map(|e| (id, e.value)))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

//! Holding area for session requests no node could take right away
//!
//! Each request is owned by exactly one party at a time: either the queue
//! itself (waiting) or the retry sweep (while it is being placed). Whoever
//! holds the entry is the only one that may answer the caller, so a request
//! is never both placed and expired.

pub mod prioritizer;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::data::{Capabilities, CreateSessionRequest, CreateSessionResponse};
use crate::{Error, Result};

pub use prioritizer::{Fifo, ImportantFirst, Prioritizer};

/// Something that can try to place a request right now
#[async_trait]
pub trait SessionPlacer: Send + Sync {
    /// # Errors
    ///
    /// Retryable errors leave the request queued; anything else is final
    async fn place(&self, request: &CreateSessionRequest) -> Result<CreateSessionResponse>;

    /// Undo a placement nobody is waiting for anymore
    async fn abandon(&self, response: CreateSessionResponse);
}

/// A request waiting for capacity
#[derive(Debug, Clone)]
pub struct QueuedRequest {
    pub id: Uuid,
    pub request: CreateSessionRequest,
    pub enqueued_at: DateTime<Utc>,
    pub deadline: Instant,
    /// Arrival order
    pub sequence: u64,
    pub important: bool,
}

/// Read-only view of a queued request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedSummary {
    pub id: Uuid,
    pub capabilities: Capabilities,
    pub enqueued_at: DateTime<Utc>,
    pub important: bool,
}

struct Waiting {
    queued: QueuedRequest,
    /// Clear-all generation the request was enqueued in
    epoch: u64,
    reply: oneshot::Sender<Result<CreateSessionResponse>>,
}

impl Waiting {
    /// Hand the result to the caller; gives it back if the caller is gone
    fn answer(self, result: Result<CreateSessionResponse>) -> Option<Result<CreateSessionResponse>> {
        self.reply.send(result).err()
    }
}

pub struct NewSessionQueue {
    config: QueueConfig,
    prioritizer: Arc<dyn Prioritizer>,
    waiting: Mutex<Vec<Waiting>>,
    sequence: AtomicU64,
    epoch: AtomicU64,
    /// Retry passes currently holding entries outside `waiting`
    passes: AtomicUsize,
    wake: Notify,
}

/// Marks a retry pass as running for as long as it lives
struct PassGuard<'a>(&'a AtomicUsize);

impl<'a> PassGuard<'a> {
    fn enter(passes: &'a AtomicUsize) -> Self {
        passes.fetch_add(1, Ordering::SeqCst);
        Self(passes)
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl NewSessionQueue {
    #[must_use]
    pub fn new(config: QueueConfig) -> Self {
        Self::with_prioritizer(config, Arc::new(ImportantFirst))
    }

    #[must_use]
    pub fn with_prioritizer(config: QueueConfig, prioritizer: Arc<dyn Prioritizer>) -> Self {
        Self {
            config,
            prioritizer,
            waiting: Mutex::new(Vec::new()),
            sequence: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
            passes: AtomicUsize::new(0),
            wake: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Waiting>> {
        self.waiting.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Nothing is waiting and no retry pass is placing a request
    ///
    /// While this is false a new request has to line up behind the others.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.passes.load(Ordering::SeqCst) == 0 && self.is_empty()
    }

    /// Waiting requests in the order they would be tried
    #[must_use]
    pub fn summaries(&self) -> Vec<QueuedSummary> {
        self.ordered()
            .into_iter()
            .map(|q| QueuedSummary {
                id: q.id,
                capabilities: q.request.capabilities,
                enqueued_at: q.enqueued_at,
                important: q.important,
            })
            .collect()
    }

    fn ordered(&self) -> Vec<QueuedRequest> {
        let mut queued: Vec<QueuedRequest> = self.lock().iter().map(|w| w.queued.clone()).collect();
        queued.sort_by(|a, b| self.prioritizer.compare(a, b));
        queued
    }

    /// Ask the retry loop to run now instead of at the next tick
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Queue `request` and wait until it is placed, fails or expires
    ///
    /// # Errors
    ///
    /// `Timeout` once the request has waited longer than the configured
    /// limit, `Cancelled` if the queue was cleared, or any final error from
    /// placement
    pub async fn enqueue(&self, request: CreateSessionRequest) -> Result<CreateSessionResponse> {
        let (tx, mut rx) = oneshot::channel();
        let id = Uuid::new_v4();
        let deadline = Instant::now() + self.config.request_timeout;

        let queued = QueuedRequest {
            id,
            important: request.capabilities.is_important(),
            request,
            enqueued_at: Utc::now(),
            deadline,
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
        };
        tracing::info!(request_id = %id, important = queued.important, "session request queued");

        self.lock().push(Waiting {
            queued,
            epoch: self.epoch.load(Ordering::SeqCst),
            reply: tx,
        });
        self.wake();

        tokio::select! {
            reply = &mut rx => {
                return reply.unwrap_or_else(|_| Err(Error::Cancelled("queue shut down".into())));
            }
            () = tokio::time::sleep_until(deadline) => {}
        }

        if self.take(id).is_some() {
            tracing::warn!(request_id = %id, "session request timed out in queue");
            return Err(timeout_error(&self.config));
        }
        // A placement attempt holds the entry; it answers either way
        rx.await
            .unwrap_or_else(|_| Err(Error::Cancelled("queue shut down".into())))
    }

    fn take(&self, id: Uuid) -> Option<Waiting> {
        let mut waiting = self.lock();
        let pos = waiting.iter().position(|w| w.queued.id == id)?;
        Some(waiting.remove(pos))
    }

    /// Return an entry after a failed attempt, unless it expired or was
    /// cleared meanwhile
    fn put_back(&self, entry: Waiting) {
        if entry.epoch < self.epoch.load(Ordering::SeqCst) {
            entry.answer(Err(Error::Cancelled("queue was cleared".into())));
        } else if Instant::now() >= entry.queued.deadline {
            tracing::warn!(request_id = %entry.queued.id, "session request timed out in queue");
            entry.answer(Err(timeout_error(&self.config)));
        } else if entry.reply.is_closed() {
            tracing::debug!(request_id = %entry.queued.id, "caller went away, dropping request");
        } else {
            self.lock().push(entry);
        }
    }

    /// One pass over every queued request, in priority order
    pub async fn retry_once(&self, placer: &dyn SessionPlacer) {
        let _pass = PassGuard::enter(&self.passes);
        for queued in self.ordered() {
            let Some(entry) = self.take(queued.id) else {
                continue;
            };
            if Instant::now() >= entry.queued.deadline {
                tracing::warn!(request_id = %queued.id, "session request timed out in queue");
                entry.answer(Err(timeout_error(&self.config)));
                continue;
            }
            if entry.reply.is_closed() {
                tracing::debug!(request_id = %queued.id, "caller went away, dropping request");
                continue;
            }

            match placer.place(&entry.queued.request).await {
                Ok(resp) => {
                    tracing::info!(
                        request_id = %queued.id,
                        session_id = %resp.session.id,
                        "queued request placed"
                    );
                    if let Some(Ok(orphan)) = entry.answer(Ok(resp)) {
                        tracing::warn!(session_id = %orphan.session.id, "caller went away, stopping session");
                        placer.abandon(orphan).await;
                    }
                }
                Err(e) if e.is_retryable() => {
                    tracing::debug!(request_id = %queued.id, reason = %e, "still no capacity");
                    self.put_back(entry);
                }
                Err(e) => {
                    tracing::warn!(request_id = %queued.id, error = %e, "queued request failed");
                    entry.answer(Err(e));
                }
            }
        }
    }

    /// Fail every waiting request immediately; returns how many were dropped
    pub fn clear_all(&self) -> usize {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let drained: Vec<Waiting> = self.lock().drain(..).collect();
        let count = drained.len();
        for entry in drained {
            entry.answer(Err(Error::Cancelled("queue was cleared".into())));
        }
        if count > 0 {
            tracing::info!(count, "cleared session queue");
        }
        count
    }

    /// Retry on every interval tick or wake-up until `shutdown` fires, then
    /// clear the queue
    pub fn spawn_retry_loop(
        self: &Arc<Self>,
        placer: Arc<dyn SessionPlacer>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(queue.config.retry_interval);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                    () = queue.wake.notified() => {}
                }
                if !queue.is_empty() {
                    queue.retry_once(placer.as_ref()).await;
                }
            }
            queue.clear_all();
            tracing::debug!("queue retry loop stopped");
        })
    }
}

fn timeout_error(config: &QueueConfig) -> Error {
    Error::Timeout(format!(
        "no node could take the request within {}s",
        config.request_timeout.as_secs()
    ))
}

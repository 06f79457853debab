//! Dequeue ordering for queued session requests

use std::cmp::Ordering;

use super::QueuedRequest;

/// Decides which of two queued requests is served first
pub trait Prioritizer: Send + Sync {
    /// `Less` means `a` goes before `b`
    fn compare(&self, a: &QueuedRequest, b: &QueuedRequest) -> Ordering;
}

/// Requests flagged important first, otherwise arrival order
#[derive(Debug, Clone, Copy, Default)]
pub struct ImportantFirst;

impl Prioritizer for ImportantFirst {
    fn compare(&self, a: &QueuedRequest, b: &QueuedRequest) -> Ordering {
        b.important
            .cmp(&a.important)
            .then_with(|| a.sequence.cmp(&b.sequence))
    }
}

/// Plain arrival order
#[derive(Debug, Clone, Copy, Default)]
pub struct Fifo;

impl Prioritizer for Fifo {
    fn compare(&self, a: &QueuedRequest, b: &QueuedRequest) -> Ordering {
        a.sequence.cmp(&b.sequence)
    }
}

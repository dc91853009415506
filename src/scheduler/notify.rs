//! Progress events fanned out to independent subscribers.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;

/// Buffered events per subscriber before senders wait.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// What changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    /// A task or job changed status without finishing.
    Update,
    /// A task was stored, or (without a task URL) the whole job finished.
    Complete,
    /// The job was stopped because the network was unavailable.
    Stopped,
}

/// One status-change notification.
///
/// Delivery is at-least-once; consumers should treat repeats as no-ops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub job_id: i64,
    /// The chapter concerned, or `None` for job-level events.
    pub task_url: Option<String>,
    pub kind: ProgressKind,
}

impl ProgressEvent {
    #[must_use]
    pub fn job(job_id: i64, kind: ProgressKind) -> Self {
        Self {
            job_id,
            task_url: None,
            kind,
        }
    }

    #[must_use]
    pub fn task(job_id: i64, task_url: impl Into<String>, kind: ProgressKind) -> Self {
        Self {
            job_id,
            task_url: Some(task_url.into()),
            kind,
        }
    }

    /// Returns `true` for the job-level completion event.
    #[must_use]
    pub fn is_job_complete(&self) -> bool {
        self.kind == ProgressKind::Complete && self.task_url.is_none()
    }
}

/// Bounded fan-out of [`ProgressEvent`]s.
///
/// Each [`subscribe`](Self::subscribe) call gets its own channel. A full
/// channel makes [`notify`](Self::notify) wait rather than drop the event;
/// subscribers whose receiver was dropped are pruned.
#[derive(Debug)]
pub struct ProgressNotifier {
    subscribers: DashMap<u64, mpsc::Sender<ProgressEvent>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Default for ProgressNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a notifier whose subscriber channels hold `capacity` events (minimum 1).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(0),
            capacity: capacity.max(1),
        }
    }

    /// Registers a new subscriber.
    pub fn subscribe(&self) -> mpsc::Receiver<ProgressEvent> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.insert(id, tx);
        rx
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Delivers `event` to every subscriber.
    pub async fn notify(&self, event: ProgressEvent) {
        // Senders are cloned out so no map shard lock is held across an await.
        let targets: Vec<(u64, mpsc::Sender<ProgressEvent>)> = self
            .subscribers
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        trace!(job_id = event.job_id, kind = ?event.kind, subscribers = targets.len(), "progress event");
        for (id, sender) in targets {
            if sender.send(event.clone()).await.is_err() {
                self.subscribers.remove(&id);
            }
        }
    }
}

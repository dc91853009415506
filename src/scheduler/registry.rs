//! Jobs currently being run, keyed by job id.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Handle to one in-flight job run.
#[derive(Debug)]
struct JobHandle {
    /// Distinguishes this run from a later run of the same job.
    generation: u64,
    token: CancellationToken,
    abort: Option<AbortHandle>,
}

/// Concurrent map from job id to its running handle.
///
/// [`cancel`](Self::cancel) is cooperative: it fires the run's token so the
/// scheduler stops dispatching, and lets in-flight chapters finish.
/// [`shutdown`](Self::shutdown) also aborts every run.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    jobs: DashMap<i64, JobHandle>,
    next_generation: AtomicU64,
}

impl TaskRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a run for `job_id`, returning its generation, or `None` if one is already active.
    pub fn register(&self, job_id: i64, token: CancellationToken) -> Option<u64> {
        match self.jobs.entry(job_id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                slot.insert(JobHandle {
                    generation,
                    token,
                    abort: None,
                });
                debug!(job_id, generation, "job registered");
                Some(generation)
            }
        }
    }

    /// Attaches the task that runs `job_id`. Ignored if that run already finished.
    pub fn attach(&self, job_id: i64, generation: u64, abort: AbortHandle) {
        if let Some(mut handle) = self.jobs.get_mut(&job_id) {
            if handle.generation == generation {
                handle.abort = Some(abort);
            }
        }
    }

    /// Removes `job_id` if it is still the run identified by `generation`.
    pub fn unregister(&self, job_id: i64, generation: u64) {
        if self
            .jobs
            .remove_if(&job_id, |_, handle| handle.generation == generation)
            .is_some()
        {
            debug!(job_id, generation, "job unregistered");
        }
    }

    /// Asks the run for `job_id` to stop. No-op if nothing is running.
    ///
    /// Returns `true` if a run was signalled.
    pub fn cancel(&self, job_id: i64) -> bool {
        match self.jobs.remove(&job_id) {
            Some((_, handle)) => {
                handle.token.cancel();
                debug!(job_id, generation = handle.generation, "job cancelled");
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn is_active(&self, job_id: i64) -> bool {
        self.jobs.contains_key(&job_id)
    }

    /// Ids of every registered job.
    #[must_use]
    pub fn active_jobs(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.jobs.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Cancels and aborts every run. Returns how many were active.
    pub fn shutdown(&self) -> usize {
        let ids = self.active_jobs();
        let mut stopped = 0;
        for job_id in ids {
            if let Some((_, handle)) = self.jobs.remove(&job_id) {
                handle.token.cancel();
                if let Some(abort) = handle.abort {
                    abort.abort();
                }
                stopped += 1;
            }
        }
        stopped
    }
}

//! Job scheduling: drains a job's queued chapters through the resilience chain.
//!
//! # Overview
//!
//! - [`Scheduler`] - runs jobs with a bounded worker pool per run
//! - [`TaskRegistry`] - jobs currently running, for pause/stop
//! - [`ProgressNotifier`] - fan-out of [`ProgressEvent`]s
//! - [`NetworkProbe`] - reachability check made before each dispatch
//!
//! Cancellation is cooperative. Pausing a job changes its stored status and
//! signals the run; the run stops dispatching at its next check point and
//! lets chapters already in flight finish.

mod engine;
mod network;
mod notify;
mod registry;
mod worker;

use std::path::PathBuf;

use thiserror::Error;

pub use engine::{DEFAULT_CONCURRENCY, MAX_CONCURRENCY, MIN_CONCURRENCY, Scheduler};
pub use network::{
    AlwaysOnline, ConnectivityFlag, DEFAULT_PROBE_INTERVAL, DEFAULT_PROBE_TIMEOUT, NetworkProbe,
    TcpProbe,
};
pub use notify::{DEFAULT_CHANNEL_CAPACITY, ProgressEvent, ProgressKind, ProgressNotifier};
pub use registry::TaskRegistry;

use crate::fetch::FetchError;
use crate::localize::LocalizeError;
use crate::queue::QueueError;

/// How tasks are handed to the worker pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Submit every task without waiting; completion order is not preserved.
    #[default]
    FireAndForget,
    /// Await each task before submitting the next.
    SubmitAndWait,
}

/// How a job run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every chapter is stored; the job record was deleted.
    Completed { fetched: usize },
    /// Some chapters failed and remain queued for the next run.
    Partial {
        fetched: usize,
        failed: usize,
        remaining: i64,
    },
    /// The job was paused, removed or cancelled while running.
    Interrupted { fetched: usize },
    /// The job record disappeared before or during the run.
    Vanished,
}

impl RunOutcome {
    /// Chapters stored by this run.
    #[must_use]
    pub fn fetched(&self) -> usize {
        match self {
            Self::Completed { fetched }
            | Self::Partial { fetched, .. }
            | Self::Interrupted { fetched } => *fetched,
            Self::Vanished => 0,
        }
    }
}

/// Job-level failures. Per-chapter failures are [`TaskError`]s and never surface here.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The network was unreachable; the job and its queued chapters are `Stopped`.
    #[error(
        "network unavailable; job {job_id} stopped\n  Suggestion: Check your connection, then run `novel-downloader resume {job_id}`"
    )]
    NetworkUnavailable { job_id: i64 },

    #[error("queue error: {0}")]
    Store(#[from] QueueError),

    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency { value: usize },

    /// A run for this job is already registered.
    #[error("job {job_id} is already running")]
    AlreadyActive { job_id: i64 },

    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// Why one chapter could not be stored.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error(transparent)]
    Localize(#[from] LocalizeError),

    #[error(transparent)]
    Store(#[from] QueueError),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TaskError {
    // No From<io::Error>: the path is required context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

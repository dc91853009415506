//! Novel Downloader Core Library
//!
//! This library downloads serialized chapters and rewrites them into
//! self-contained documents for offline reading.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`db`] - Database connection and schema management
//! - [`fetch`] - Resilience chain around the HTTP transport (dedup, rate
//!   limiting, retry, challenge bypass, cache annotation)
//! - [`localize`] - Content cleaning and asset localization
//! - [`queue`] - Job and chapter persistence
//! - [`scheduler`] - Job runs, pause/resume, progress events

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod db;
pub mod fetch;
pub mod localize;
pub mod queue;
pub mod scheduler;
mod user_agent;

// Re-export commonly used types
pub use db::Database;
pub use fetch::{FetchError, FetchRequest, FetchResponse, ResilienceChain, Transport};
pub use localize::{ContentLocalizer, LocalizerRegistry};
pub use queue::{ChapterTask, DownloadStatus, Job, Queue, QueueError, QueueStore, TaskCounts};
pub use scheduler::{
    DispatchMode, ProgressEvent, ProgressKind, ProgressNotifier, RunOutcome, Scheduler,
    SchedulerError,
};

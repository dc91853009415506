//! The job scheduler.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use novel_downloader_core::fetch::ResilienceChain;
//! use novel_downloader_core::localize::{ContentLocalizer, LocalizerRegistry};
//! use novel_downloader_core::queue::Queue;
//! use novel_downloader_core::scheduler::Scheduler;
//! use novel_downloader_core::Database;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = Arc::new(Queue::new(Database::new_in_memory().await?));
//! let chain = Arc::new(ResilienceChain::builder().build()?);
//! let localizer = Arc::new(ContentLocalizer::new(
//!     chain.clone(),
//!     Arc::new(LocalizerRegistry::with_builtin()),
//! ));
//! let scheduler = Arc::new(Scheduler::new(queue, chain, localizer, "./novels").with_max_concurrency(4)?);
//! let run = scheduler.spawn_job(1)?;
//! println!("{:?}", run.await??);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::network::{AlwaysOnline, NetworkProbe};
use super::notify::{ProgressEvent, ProgressKind, ProgressNotifier};
use super::registry::TaskRegistry;
use super::worker::TaskWorker;
use super::{DispatchMode, RunOutcome, SchedulerError, TaskError};
use crate::fetch::Transport;
use crate::localize::{ContentLocalizer, work_dir_name};
use crate::queue::{DownloadStatus, QueueError, QueueStore};

/// Minimum allowed concurrency value.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
pub const MAX_CONCURRENCY: usize = 100;

/// Default concurrency if not specified.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Age after which another run's `Running` claim is treated as abandoned.
pub const DEFAULT_CLAIM_LEASE: Duration = Duration::from_secs(15 * 60);

/// Why the dispatch loop ended early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    Interrupted,
    NetworkDown,
}

/// Runs jobs from a [`QueueStore`].
///
/// Each run gets a fresh pool of `min(max_concurrency, queued)` workers. Before
/// every dispatch the run checks its cancellation token, network
/// reachability and the chapter's stored status; any of those stops the
/// scan. Chapter failures are logged and left queued for the next run.
///
/// Claims are recorded under the scheduler's [`claimant`](Self::claimant), so
/// schedulers sharing one database only take back each other's chapters
/// once the claim is older than the lease.
pub struct Scheduler {
    store: Arc<dyn QueueStore>,
    transport: Arc<dyn Transport>,
    localizer: Arc<ContentLocalizer>,
    network: Arc<dyn NetworkProbe>,
    notifier: Arc<ProgressNotifier>,
    registry: Arc<TaskRegistry>,
    output_dir: PathBuf,
    max_concurrency: usize,
    dispatch_mode: DispatchMode,
    claimant: String,
    claim_lease: Duration,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("output_dir", &self.output_dir)
            .field("max_concurrency", &self.max_concurrency)
            .field("dispatch_mode", &self.dispatch_mode)
            .field("claimant", &self.claimant)
            .field("network", &self.network)
            .field("active_jobs", &self.registry.active_jobs())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Creates a scheduler writing documents under `output_dir`.
    ///
    /// Defaults: [`DEFAULT_CONCURRENCY`] workers, fire-and-forget dispatch,
    /// network always reachable.
    pub fn new(
        store: Arc<dyn QueueStore>,
        transport: Arc<dyn Transport>,
        localizer: Arc<ContentLocalizer>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            transport,
            localizer,
            network: Arc::new(AlwaysOnline),
            notifier: Arc::new(ProgressNotifier::new()),
            registry: Arc::new(TaskRegistry::new()),
            output_dir: output_dir.into(),
            max_concurrency: DEFAULT_CONCURRENCY,
            dispatch_mode: DispatchMode::default(),
            claimant: new_claimant(),
            claim_lease: DEFAULT_CLAIM_LEASE,
        }
    }

    /// Sets the worker cap.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidConcurrency`] outside 1-100.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Result<Self, SchedulerError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&max_concurrency) {
            return Err(SchedulerError::InvalidConcurrency {
                value: max_concurrency,
            });
        }
        self.max_concurrency = max_concurrency;
        Ok(self)
    }

    #[must_use]
    pub fn with_dispatch_mode(mut self, mode: DispatchMode) -> Self {
        self.dispatch_mode = mode;
        self
    }

    #[must_use]
    pub fn with_network_probe(mut self, probe: Arc<dyn NetworkProbe>) -> Self {
        self.network = probe;
        self
    }

    /// Sets how old another run's claim must be before recovery takes it back.
    #[must_use]
    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<ProgressNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    #[must_use]
    pub fn notifier(&self) -> &Arc<ProgressNotifier> {
        &self.notifier
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    #[must_use]
    pub fn dispatch_mode(&self) -> DispatchMode {
        self.dispatch_mode
    }

    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Identity recorded on the chapters this scheduler claims.
    #[must_use]
    pub fn claimant(&self) -> &str {
        &self.claimant
    }

    /// Drains every queued chapter of `job_id`.
    ///
    /// A paused job is left alone. `Stopped` chapters are requeued first, as
    /// are `Running` chapters left by an earlier run of this scheduler or
    /// claimed longer ago than the lease. Chapters another live scheduler is
    /// fetching stay with it.
    /// When nothing is pending afterwards the job is marked `Complete`, its
    /// queue record is deleted and a job-level `Complete` event is sent.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NetworkUnavailable`] if the network check
    /// fails; the job and its queued chapters are then `Stopped` and one
    /// `Stopped` event has been sent. Returns [`SchedulerError::Store`] if the
    /// store fails outside a chapter.
    #[instrument(skip(self, cancel))]
    pub async fn run_job(
        &self,
        job_id: i64,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, SchedulerError> {
        let Some(job) = self.store.get_job(job_id).await? else {
            debug!("job vanished before start");
            return Ok(RunOutcome::Vanished);
        };
        if job.status() == DownloadStatus::Paused {
            info!("job is paused; resume it to continue");
            return Ok(RunOutcome::Interrupted { fetched: 0 });
        }
        if !self.network.is_reachable() {
            return Err(self.stop_for_network(job_id).await);
        }

        let recovered = self
            .store
            .recover_tasks(job_id, &self.claimant, self.claim_lease)
            .await?;
        if recovered > 0 {
            info!(recovered, "requeued chapters left running or stopped by an earlier run");
        }
        if let Err(error) = self.store.set_job_status(job_id, DownloadStatus::Running).await {
            return vanished_or(error);
        }

        let tasks = self.store.list_queued_tasks(job_id).await?;
        let pool_size = self.max_concurrency.min(tasks.len()).max(MIN_CONCURRENCY);
        info!(job = %job.name, tasks = tasks.len(), pool_size, mode = ?self.dispatch_mode, "starting job");

        let worker = Arc::new(TaskWorker {
            store: Arc::clone(&self.store),
            transport: Arc::clone(&self.transport),
            localizer: Arc::clone(&self.localizer),
            notifier: Arc::clone(&self.notifier),
            output_dir: self.output_dir.clone(),
            work_dir: work_dir_name(&job.name, job_id),
            cancel: cancel.clone(),
        });
        let semaphore = Arc::new(Semaphore::new(pool_size));
        let mut pool = WorkerPool::default();
        let mut halt = None;

        for task in tasks {
            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    halt = Some(Halt::Interrupted);
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    permit.map_err(|_| SchedulerError::SemaphoreClosed)?
                }
            };
            if cancel.is_cancelled() {
                halt = Some(Halt::Interrupted);
                break;
            }
            if !self.network.is_reachable() {
                halt = Some(Halt::NetworkDown);
                break;
            }
            match self.store.get_task_status(job_id, &task.url).await? {
                Some(status) if status.is_dispatchable() => {}
                status => {
                    debug!(url = %task.url, ?status, "chapter no longer dispatchable; stopping scan");
                    halt = Some(Halt::Interrupted);
                    break;
                }
            }
            if !self.store.claim_task(job_id, &task.url, &self.claimant).await? {
                debug!(url = %task.url, "chapter claimed elsewhere; skipping");
                continue;
            }

            debug!(order_id = task.order_id, url = %task.url, "dispatching chapter");
            let worker = Arc::clone(&worker);
            pool.workers.spawn(async move {
                // Permit is released when the chapter finishes.
                let _permit = permit;
                worker.run(task).await
            });
            if self.dispatch_mode == DispatchMode::SubmitAndWait {
                pool.join_next().await;
            }
        }

        debug!(in_flight = pool.workers.len(), "waiting for dispatched chapters");
        pool.drain().await;
        let (fetched, failed) = (pool.fetched, pool.failed);

        match halt {
            Some(Halt::NetworkDown) => return Err(self.stop_for_network(job_id).await),
            Some(Halt::Interrupted) => return self.interrupted(job_id, fetched).await,
            None => {}
        }

        let remaining = self.store.count_pending(job_id).await?;
        if remaining == 0 {
            return self.finish_job(job_id, fetched).await;
        }
        if cancel.is_cancelled() {
            return self.interrupted(job_id, fetched).await;
        }
        if let Err(error) = self.store.set_job_status(job_id, DownloadStatus::Queued).await {
            return vanished_or(error);
        }
        info!(fetched, failed, remaining, "job incomplete; remaining chapters stay queued");
        Ok(RunOutcome::Partial {
            fetched,
            failed,
            remaining,
        })
    }

    /// Runs `job_id` on a background task registered in the [`TaskRegistry`].
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::AlreadyActive`] if the job is already running.
    pub fn spawn_job(
        self: &Arc<Self>,
        job_id: i64,
    ) -> Result<JoinHandle<Result<RunOutcome, SchedulerError>>, SchedulerError> {
        let token = CancellationToken::new();
        let Some(generation) = self.registry.register(job_id, token.clone()) else {
            return Err(SchedulerError::AlreadyActive { job_id });
        };

        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let result = scheduler.run_job(job_id, &token).await;
            scheduler.registry.unregister(job_id, generation);
            result
        });
        self.registry.attach(job_id, generation, handle.abort_handle());
        Ok(handle)
    }

    /// Parks the job and its pending chapters as `Paused` and signals its run.
    ///
    /// Returns the number of chapters paused.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Store`] if the job does not exist or the update fails.
    #[instrument(skip(self))]
    pub async fn pause_job(&self, job_id: i64) -> Result<u64, SchedulerError> {
        self.store.set_job_status(job_id, DownloadStatus::Paused).await?;
        let paused = self
            .store
            .set_job_tasks_status(
                job_id,
                &[DownloadStatus::Queued, DownloadStatus::Running],
                DownloadStatus::Paused,
            )
            .await?;
        let signalled = self.registry.cancel(job_id);
        info!(paused, signalled, "job paused");
        self.notifier
            .notify(ProgressEvent::job(job_id, ProgressKind::Update))
            .await;
        Ok(paused)
    }

    /// Requeues a paused or stopped job and starts it.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::AlreadyActive`] if it is running, or
    /// [`SchedulerError::Store`] if the job does not exist.
    #[instrument(skip(self))]
    pub async fn resume_job(
        self: &Arc<Self>,
        job_id: i64,
    ) -> Result<JoinHandle<Result<RunOutcome, SchedulerError>>, SchedulerError> {
        if self.registry.is_active(job_id) {
            return Err(SchedulerError::AlreadyActive { job_id });
        }
        self.store.set_job_status(job_id, DownloadStatus::Queued).await?;
        let requeued = self
            .store
            .set_job_tasks_status(
                job_id,
                &[DownloadStatus::Paused, DownloadStatus::Stopped],
                DownloadStatus::Queued,
            )
            .await?;
        info!(requeued, "job resumed");
        self.notifier
            .notify(ProgressEvent::job(job_id, ProgressKind::Update))
            .await;
        self.spawn_job(job_id)
    }

    /// Stops the job if running and deletes it with all of its chapter rows.
    ///
    /// Returns whether a run was signalled.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Store`] if the delete fails.
    #[instrument(skip(self))]
    pub async fn remove_job(&self, job_id: i64) -> Result<bool, SchedulerError> {
        let signalled = self.registry.cancel(job_id);
        self.store.purge_job(job_id).await?;
        info!(signalled, "job removed");
        self.notifier
            .notify(ProgressEvent::job(job_id, ProgressKind::Update))
            .await;
        Ok(signalled)
    }

    /// Cancels and aborts every running job. Chapters left `Running` are
    /// requeued by this scheduler's next run of their job, or by any run once
    /// the claim lease has passed.
    pub fn shutdown(&self) -> usize {
        let stopped = self.registry.shutdown();
        if stopped > 0 {
            info!(stopped, "scheduler shut down");
        }
        stopped
    }

    async fn stop_for_network(&self, job_id: i64) -> SchedulerError {
        warn!(job_id, "network unavailable; stopping job");
        if let Err(error) = self.store.set_job_status(job_id, DownloadStatus::Stopped).await {
            return error.into();
        }
        match self
            .store
            .set_job_tasks_status(
                job_id,
                &[DownloadStatus::Queued, DownloadStatus::Running],
                DownloadStatus::Stopped,
            )
            .await
        {
            Ok(stopped) => debug!(job_id, stopped, "chapters stopped"),
            Err(error) => return error.into(),
        }
        self.notifier
            .notify(ProgressEvent::job(job_id, ProgressKind::Stopped))
            .await;
        SchedulerError::NetworkUnavailable { job_id }
    }

    async fn finish_job(&self, job_id: i64, fetched: usize) -> Result<RunOutcome, SchedulerError> {
        if let Err(error) = self.store.set_job_status(job_id, DownloadStatus::Complete).await {
            return vanished_or(error);
        }
        self.store.delete_job(job_id).await?;
        info!(job_id, fetched, "job complete");
        self.notifier
            .notify(ProgressEvent::job(job_id, ProgressKind::Complete))
            .await;
        Ok(RunOutcome::Completed { fetched })
    }

    async fn interrupted(&self, job_id: i64, fetched: usize) -> Result<RunOutcome, SchedulerError> {
        if self.store.get_job(job_id).await?.is_none() {
            debug!(job_id, "job vanished during run");
            return Ok(RunOutcome::Vanished);
        }
        info!(job_id, fetched, "job interrupted");
        Ok(RunOutcome::Interrupted { fetched })
    }
}

/// `<pid>-<random hex>`: distinct per scheduler, readable in the database.
fn new_claimant() -> String {
    format!("{}-{:08x}", std::process::id(), rand::thread_rng().r#gen::<u32>())
}

/// A deleted job is a silent early exit, not an error.
fn vanished_or(error: QueueError) -> Result<RunOutcome, SchedulerError> {
    match error {
        QueueError::JobNotFound(job_id) => {
            debug!(job_id, "job vanished during run");
            Ok(RunOutcome::Vanished)
        }
        other => Err(other.into()),
    }
}

/// Workers of one run and their tallies.
#[derive(Default)]
struct WorkerPool {
    workers: JoinSet<Result<PathBuf, TaskError>>,
    fetched: usize,
    failed: usize,
}

impl WorkerPool {
    /// Waits for one worker. Returns `false` when none are left.
    async fn join_next(&mut self) -> bool {
        match self.workers.join_next().await {
            None => return false,
            Some(Ok(Ok(_))) => self.fetched += 1,
            // Already logged by the worker.
            Some(Ok(Err(_))) => self.failed += 1,
            Some(Err(error)) => {
                warn!(error = %error, "chapter worker panicked");
                self.failed += 1;
            }
        }
        true
    }

    async fn drain(&mut self) {
        while self.join_next().await {}
    }
}

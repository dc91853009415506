//! Run command handler: drain pending chapters of one or more jobs.

use std::io::{self, IsTerminal};
use std::sync::Arc;

use anyhow::Result;
use novel_downloader_core::{Job, ProgressEvent, RunOutcome, Scheduler, SchedulerError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::ProcessExit;
use crate::app::exit_handler::determine_exit_outcome;
use crate::app::progress_manager::spawn_progress_ui;
use crate::app::runtime::AppContext;
use crate::app::terminal;

type RunHandle = JoinHandle<Result<RunOutcome, SchedulerError>>;

pub async fn run_run_command(ctx: &AppContext, job_ids: &[i64]) -> Result<ProcessExit> {
    let jobs = select_jobs(ctx, job_ids).await?;
    if jobs.is_empty() {
        if !ctx.quiet {
            println!("Nothing to download.");
        }
        return Ok(ProcessExit::Success);
    }

    let scheduler = ctx.scheduler().await?;
    let ctrl_c = spawn_shutdown_on_ctrl_c(Arc::clone(&scheduler));

    let mut outcomes = Vec::with_capacity(jobs.len());
    let mut network_down = false;
    for job in &jobs {
        // The subscription must exist before the run emits its first event.
        let events = scheduler.notifier().subscribe();
        let handle = match scheduler.spawn_job(job.job_id) {
            Ok(handle) => handle,
            Err(error) => {
                warn!(job_id = job.job_id, error = %error, "Job not started");
                continue;
            }
        };
        match await_run(ctx, job, handle, events).await? {
            Ok(outcome) => outcomes.push(outcome),
            Err(error @ SchedulerError::NetworkUnavailable { .. }) => {
                eprintln!("{error}");
                network_down = true;
                break;
            }
            Err(error) => return Err(error.into()),
        }
    }
    ctrl_c.abort();

    if network_down {
        return Ok(ProcessExit::Failure);
    }
    Ok(determine_exit_outcome(&outcomes))
}

async fn select_jobs(ctx: &AppContext, job_ids: &[i64]) -> Result<Vec<Job>> {
    if job_ids.is_empty() {
        return Ok(ctx.queue.list_jobs().await?);
    }
    let mut jobs = Vec::with_capacity(job_ids.len());
    for &job_id in job_ids {
        match ctx.queue.get_job(job_id).await? {
            Some(job) => jobs.push(job),
            None => warn!(job_id, "No such job; skipping"),
        }
    }
    Ok(jobs)
}

/// Awaits one spawned run with a progress bar and prints its summary.
///
/// The outer `Result` carries store failures while preparing the bar; the
/// inner one is the run's own result.
pub(crate) async fn await_run(
    ctx: &AppContext,
    job: &Job,
    handle: RunHandle,
    events: mpsc::Receiver<ProgressEvent>,
) -> Result<Result<RunOutcome, SchedulerError>> {
    let counts = ctx.queue.task_counts(job.job_id).await?;
    let use_bar = terminal::should_use_progress_bar(
        io::stderr().is_terminal(),
        ctx.quiet,
        terminal::is_dumb_terminal(),
    );
    let ui = spawn_progress_ui(
        use_bar,
        events,
        job.job_id,
        &job.name,
        u64::try_from(counts.total()).unwrap_or(0),
        u64::try_from(counts.complete).unwrap_or(0),
    );

    let result = match handle.await {
        Ok(result) => result,
        Err(join_error) if join_error.is_cancelled() => {
            info!(job_id = job.job_id, "Run aborted");
            Ok(RunOutcome::Interrupted { fetched: 0 })
        }
        Err(join_error) => return Err(join_error.into()),
    };
    if let Some(ui) = ui {
        ui.finish().await;
    }

    if let Ok(outcome) = &result
        && !ctx.quiet
    {
        println!("{}", summarize(job, outcome));
    }
    Ok(result)
}

fn summarize(job: &Job, outcome: &RunOutcome) -> String {
    let label = format!("[{}] {}", job.job_id, job.name);
    match outcome {
        RunOutcome::Completed { fetched } => {
            format!("{label}: complete ({fetched} chapters downloaded)")
        }
        RunOutcome::Partial {
            fetched,
            failed,
            remaining,
        } => format!(
            "{label}: {fetched} downloaded, {failed} failed, {remaining} pending (run again to retry)"
        ),
        RunOutcome::Interrupted { fetched } => {
            format!("{label}: interrupted after {fetched} chapters")
        }
        RunOutcome::Vanished => format!("{label}: removed"),
    }
}

/// Shuts the scheduler down on the first Ctrl-C.
pub(crate) fn spawn_shutdown_on_ctrl_c(scheduler: Arc<Scheduler>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let stopped = scheduler.shutdown();
            warn!(stopped, "Interrupted; unfinished chapters resume on the next run");
        }
    })
}

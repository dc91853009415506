//! Pause, resume and remove command handlers.

use std::sync::Arc;

use anyhow::Result;
use novel_downloader_core::{QueueError, SchedulerError};

use super::run::{await_run, spawn_shutdown_on_ctrl_c};
use crate::ProcessExit;
use crate::app::exit_handler::determine_exit_outcome;
use crate::app::runtime::AppContext;

fn job_not_found(job_id: i64) -> anyhow::Error {
    anyhow::anyhow!(
        "Job {job_id} not found\n  Suggestion: Run `novel-downloader status` to list queued jobs"
    )
}

fn map_missing_job(error: SchedulerError, job_id: i64) -> anyhow::Error {
    match error {
        SchedulerError::Store(QueueError::JobNotFound(_)) => job_not_found(job_id),
        other => other.into(),
    }
}

pub async fn run_pause_command(ctx: &AppContext, job_id: i64) -> Result<ProcessExit> {
    let scheduler = ctx.scheduler().await?;
    let paused = scheduler
        .pause_job(job_id)
        .await
        .map_err(|error| map_missing_job(error, job_id))?;
    if !ctx.quiet {
        println!("Paused job {job_id} ({paused} chapters parked)");
    }
    Ok(ProcessExit::Success)
}

pub async fn run_resume_command(ctx: &AppContext, job_id: i64) -> Result<ProcessExit> {
    let Some(job) = ctx.queue.get_job(job_id).await? else {
        return Err(job_not_found(job_id));
    };

    let scheduler = ctx.scheduler().await?;
    let ctrl_c = spawn_shutdown_on_ctrl_c(Arc::clone(&scheduler));
    let events = scheduler.notifier().subscribe();
    let handle = scheduler
        .resume_job(job_id)
        .await
        .map_err(|error| map_missing_job(error, job_id))?;
    let result = await_run(ctx, &job, handle, events).await;
    ctrl_c.abort();

    match result? {
        Ok(outcome) => Ok(determine_exit_outcome(&[outcome])),
        Err(error @ SchedulerError::NetworkUnavailable { .. }) => {
            eprintln!("{error}");
            Ok(ProcessExit::Failure)
        }
        Err(error) => Err(error.into()),
    }
}

pub async fn run_remove_command(ctx: &AppContext, job_id: i64) -> Result<ProcessExit> {
    let Some(job) = ctx.queue.get_job(job_id).await? else {
        return Err(job_not_found(job_id));
    };
    let scheduler = ctx.scheduler().await?;
    scheduler.remove_job(job_id).await?;
    if !ctx.quiet {
        println!("Removed job {job_id}: {}", job.name);
    }
    Ok(ProcessExit::Success)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_job_error_has_suggestion() {
        let error = map_missing_job(SchedulerError::Store(QueueError::JobNotFound(4)), 4);
        let message = error.to_string();
        assert!(message.contains("Job 4 not found"));
        assert!(message.contains("Suggestion"));
    }

    #[test]
    fn test_other_scheduler_errors_pass_through() {
        let error = map_missing_job(SchedulerError::AlreadyActive { job_id: 4 }, 4);
        assert_eq!(error.to_string(), "job 4 is already running");
    }
}

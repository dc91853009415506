//! Status command handler: list jobs with per-status chapter counts.

use std::fmt::Write as _;

use anyhow::Result;
use novel_downloader_core::{DownloadStatus, TaskCounts};
use serde::Serialize;

use crate::ProcessExit;
use crate::app::runtime::AppContext;

/// One row of `status` output.
#[derive(Debug, Serialize)]
pub(crate) struct JobStatusRow {
    pub(crate) job_id: i64,
    pub(crate) name: String,
    pub(crate) source_url: String,
    pub(crate) status: DownloadStatus,
    pub(crate) chapters: TaskCounts,
}

pub async fn run_status_command(ctx: &AppContext, json: bool) -> Result<ProcessExit> {
    let mut rows = Vec::new();
    for job in ctx.queue.list_jobs().await? {
        let chapters = ctx.queue.task_counts(job.job_id).await?;
        rows.push(JobStatusRow {
            job_id: job.job_id,
            status: job.status(),
            name: job.name,
            source_url: job.source_url,
            chapters,
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else if rows.is_empty() {
        println!("No queued jobs.");
    } else {
        print!("{}", render_table(&rows));
    }
    Ok(ProcessExit::Success)
}

pub(crate) fn render_table(rows: &[JobStatusRow]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>5}  {:<8}  {:>6}  {:>6}  {:>6}  {:>7}  {:>5}  NAME",
        "ID", "STATUS", "DONE", "QUEUED", "PAUSED", "STOPPED", "TOTAL"
    );
    for row in rows {
        let counts = &row.chapters;
        let _ = writeln!(
            out,
            "{:>5}  {:<8}  {:>6}  {:>6}  {:>6}  {:>7}  {:>5}  {}",
            row.job_id,
            row.status.as_str(),
            counts.complete,
            counts.queued + counts.running,
            counts.paused,
            counts.stopped,
            counts.total(),
            row.name
        );
    }
    out
}

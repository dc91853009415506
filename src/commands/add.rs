//! Add command handler: queue a work and its chapter list.

use std::collections::HashSet;
use std::io::{self, IsTerminal, Read};

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};
use url::Url;

use crate::ProcessExit;
use crate::app::runtime::AppContext;
use crate::cli::AddArgs;

/// Chapter URLs accepted from the command line and stdin.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ChapterList {
    /// Unique http(s) URLs in order of first appearance.
    pub(crate) urls: Vec<String>,
    /// Non-empty lines that were not http(s) URLs.
    pub(crate) skipped: Vec<String>,
}

/// Parses chapter URLs from `lines`, keeping the first occurrence of each.
pub(crate) fn collect_chapter_urls<'a>(lines: impl IntoIterator<Item = &'a str>) -> ChapterList {
    let mut seen = HashSet::new();
    let mut list = ChapterList::default();
    for line in lines {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match Url::parse(line) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                let url = url.to_string();
                if seen.insert(url.clone()) {
                    list.urls.push(url);
                }
            }
            _ => list.skipped.push(line.to_string()),
        }
    }
    list
}

pub async fn run_add_command(ctx: &AppContext, args: &AddArgs) -> Result<ProcessExit> {
    let source = Url::parse(&args.source_url).with_context(|| {
        format!(
            "Invalid source URL '{}'\n  Suggestion: Pass the full address of the chapter list page",
            args.source_url
        )
    })?;
    if args.name.trim().is_empty() {
        bail!("Work name must not be empty\n  Suggestion: Pass --name \"<title>\"");
    }

    let stdin_text = if args.chapters.is_empty() && !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        String::new()
    };
    let list = collect_chapter_urls(
        args.chapters
            .iter()
            .map(String::as_str)
            .chain(stdin_text.lines()),
    );
    for skipped in &list.skipped {
        warn!(skipped = %skipped, "Skipped input that is not an http(s) URL");
    }
    if list.urls.is_empty() {
        bail!(
            "No chapter URLs given\n  Suggestion: Pass chapter URLs as arguments or pipe them on stdin, one per line"
        );
    }

    let job_id = ctx.queue.create_job(source.as_str(), args.name.trim()).await?;
    // order_id is the position in the full list; known URLs are renumbered.
    let chapters: Vec<(String, i64)> = list
        .urls
        .into_iter()
        .zip(1_i64..)
        .collect();
    let inserted = ctx.queue.add_tasks(job_id, &chapters).await?;
    debug!(job_id, total = chapters.len(), inserted, "chapters queued");
    info!(job_id, name = %args.name.trim(), "Work queued");

    if !ctx.quiet {
        println!(
            "Queued job {job_id}: {} ({inserted} new of {} chapters)",
            args.name.trim(),
            chapters.len()
        );
    }
    Ok(ProcessExit::Success)
}

//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Download serialized chapters and localize them for offline reading.
///
/// Works are queued with `add`, fetched with `run`, and can be paused,
/// resumed or removed while they are pending.
#[derive(Parser, Debug)]
#[command(name = "novel-downloader")]
#[command(author, version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Flags shared by every subcommand. Unset values fall back to the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/novel-downloader/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Queue database file
    #[arg(long = "db", global = true, value_name = "PATH")]
    pub database: Option<PathBuf>,

    /// Root directory for localized documents
    #[arg(short = 'o', long = "output", global = true, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Maximum concurrent chapter fetches per job (1-100)
    #[arg(short = 'c', long, global = true, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// Requests per second across all jobs (1-100)
    #[arg(long = "rps", global = true, value_parser = clap::value_parser!(u32).range(1..=100))]
    pub requests_per_second: Option<u32>,

    /// Maximum retry attempts for transient failures (0-10)
    #[arg(short = 'r', long, global = true, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: Option<u8>,

    /// Netscape cookies.txt file loaded into the session
    #[arg(long = "cookies", global = true, value_name = "FILE")]
    pub cookies_file: Option<PathBuf>,

    /// Await each chapter before dispatching the next
    #[arg(long, global = true)]
    pub wait: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Queue a work and its chapter URLs (also read from stdin, one per line)
    Add(AddArgs),
    /// Fetch pending chapters of the given jobs, or of every job
    Run {
        /// Job ids to run
        job_ids: Vec<i64>,
    },
    /// Pause a job and its pending chapters
    Pause {
        job_id: i64,
    },
    /// Requeue a paused or stopped job and run it
    Resume {
        job_id: i64,
    },
    /// Delete a job and all of its chapter records
    Remove {
        job_id: i64,
    },
    /// List jobs with per-status chapter counts
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug, Clone)]
pub struct AddArgs {
    /// Page the chapter list came from; identifies the work
    pub source_url: String,

    /// Display name, also used as the output directory name
    #[arg(short, long)]
    pub name: String,

    /// Chapter URLs in reading order
    pub chapters: Vec<String>,
}

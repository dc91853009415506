//! Merges CLI flags, the config file and built-in defaults into one runtime config.
//!
//! Precedence: CLI flag > config file > default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use novel_downloader_core::fetch::{
    DEFAULT_BASE_DELAY, DEFAULT_CHALLENGE_TIMEOUT, DEFAULT_DEDUP_CLEANUP, DEFAULT_DEDUP_TTL,
    DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES, DEFAULT_REQUESTS_PER_SECOND, RetryPolicy,
};
use novel_downloader_core::scheduler::{DEFAULT_CONCURRENCY, DispatchMode};

use crate::app_config::FileConfig;
use crate::cli::GlobalArgs;

const DEFAULT_OUTPUT_DIR: &str = "novels";
/// State directory created under the output directory.
const STATE_DIR: &str = ".novel-downloader";
const DATABASE_FILE: &str = "queue.db";

/// Settings consumed when building the chain, localizer and scheduler.
#[derive(Debug, Clone)]
pub(crate) struct RuntimeConfig {
    pub(crate) output_dir: PathBuf,
    pub(crate) database: PathBuf,
    pub(crate) concurrency: usize,
    pub(crate) requests_per_second: u32,
    pub(crate) retry: RetryPolicy,
    pub(crate) dedup_ttl: Duration,
    pub(crate) dedup_cleanup: Duration,
    pub(crate) challenge_timeout: Duration,
    pub(crate) dispatch_mode: DispatchMode,
    pub(crate) cookies_file: Option<PathBuf>,
    pub(crate) strip_directional_links: bool,
    pub(crate) probe_host: Option<String>,
}

impl RuntimeConfig {
    /// Merges `args` over `file` over the defaults.
    pub(crate) fn resolve(args: &GlobalArgs, file: Option<&FileConfig>) -> Result<Self> {
        let file = file.cloned().unwrap_or_default();
        file.validate()?;

        let output_dir = args
            .output_dir
            .clone()
            .or(file.output_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
        let database = args
            .database
            .clone()
            .or(file.database)
            .unwrap_or_else(|| default_database_path(&output_dir));

        let concurrency = args
            .concurrency
            .or(file.concurrency)
            .map_or(DEFAULT_CONCURRENCY, usize::from);
        let requests_per_second = args
            .requests_per_second
            .or(file.requests_per_second)
            .unwrap_or(DEFAULT_REQUESTS_PER_SECOND);

        let max_retries = args
            .max_retries
            .or(file.max_retries)
            .map_or(DEFAULT_MAX_RETRIES, u32::from);
        let base_delay = file
            .retry_base_delay_ms
            .map_or(DEFAULT_BASE_DELAY, Duration::from_millis);
        let max_delay = file
            .retry_max_delay_ms
            .map_or(DEFAULT_MAX_DELAY, Duration::from_millis)
            .max(base_delay);

        let dispatch_mode = if args.wait {
            DispatchMode::SubmitAndWait
        } else {
            file.dispatch_mode.unwrap_or_default()
        };

        Ok(Self {
            output_dir,
            database,
            concurrency,
            requests_per_second,
            retry: RetryPolicy::new(max_retries, base_delay, max_delay),
            dedup_ttl: file.dedup_ttl_ms.map_or(DEFAULT_DEDUP_TTL, Duration::from_millis),
            dedup_cleanup: file
                .dedup_cleanup_ms
                .map_or(DEFAULT_DEDUP_CLEANUP, Duration::from_millis),
            challenge_timeout: file
                .challenge_timeout_secs
                .map_or(DEFAULT_CHALLENGE_TIMEOUT, Duration::from_secs),
            dispatch_mode,
            cookies_file: args.cookies_file.clone().or(file.cookies_file),
            strip_directional_links: file.strip_directional_links.unwrap_or(true),
            probe_host: file.probe_host,
        })
    }
}

fn default_database_path(output_dir: &Path) -> PathBuf {
    output_dir.join(STATE_DIR).join(DATABASE_FILE)
}

/// Maps `-q` / `-v` counts to the default `EnvFilter` directive.
pub(crate) fn resolve_default_log_level(args: &GlobalArgs) -> &'static str {
    if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

//! Builds the queue, resilience chain, localizer and scheduler, then runs a command.

use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use novel_downloader_core::fetch::load_cookie_file;
use novel_downloader_core::scheduler::{DEFAULT_PROBE_INTERVAL, DEFAULT_PROBE_TIMEOUT, TcpProbe};
use novel_downloader_core::{
    ContentLocalizer, Database, LocalizerRegistry, Queue, ResilienceChain, Scheduler, Transport,
};
use tracing::debug;

use crate::app::config_runtime::{self, RuntimeConfig};
use crate::app::terminal;
use crate::app_config;
use crate::cli::{Cli, Command};
use crate::{ProcessExit, commands};

/// Opened queue plus the merged settings; the scheduler is built on demand.
pub(crate) struct AppContext {
    pub(crate) config: RuntimeConfig,
    pub(crate) queue: Arc<Queue>,
    pub(crate) quiet: bool,
}

impl AppContext {
    /// Opens the queue database, creating its directory when needed.
    pub(crate) async fn open(config: RuntimeConfig, quiet: bool) -> Result<Self> {
        if let Some(parent) = config.database.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create state directory '{}'", parent.display())
            })?;
        }
        let db = Database::new(&config.database).await.with_context(|| {
            format!(
                "Failed to open queue database '{}'\n  Suggestion: Check the --db path or remove a corrupted file",
                config.database.display()
            )
        })?;
        debug!(path = %config.database.display(), "queue database opened");

        Ok(Self {
            config,
            queue: Arc::new(Queue::new(db)),
            quiet,
        })
    }

    /// Assembles the resilience chain, localizer and scheduler.
    pub(crate) async fn scheduler(&self) -> Result<Arc<Scheduler>> {
        let config = &self.config;

        let cookies = match &config.cookies_file {
            Some(path) => Arc::new(load_cookie_file(path).with_context(|| {
                format!("Failed to load cookies from '{}'", path.display())
            })?),
            None => Arc::default(),
        };

        let chain = ResilienceChain::builder()
            .cookies(cookies)
            .requests_per_second(Some(config.requests_per_second))
            .retry_policy(config.retry.clone())
            .dedup_timing(config.dedup_ttl, config.dedup_cleanup)
            .challenge_timeout(config.challenge_timeout)
            .build()
            .context("Failed to build HTTP client")?;
        let transport: Arc<dyn Transport> = Arc::new(chain);

        let localizer = ContentLocalizer::new(
            Arc::clone(&transport),
            Arc::new(LocalizerRegistry::with_builtin()),
        )
        .with_directional_links_stripped(config.strip_directional_links);

        let mut scheduler = Scheduler::new(
            self.queue.clone(),
            transport,
            Arc::new(localizer),
            config.output_dir.clone(),
        )
        .with_max_concurrency(config.concurrency)?
        .with_dispatch_mode(config.dispatch_mode);

        if let Some(host) = &config.probe_host {
            let probe = TcpProbe::start(host.clone(), DEFAULT_PROBE_INTERVAL, DEFAULT_PROBE_TIMEOUT)
                .await;
            debug!(address = probe.address(), "network probe started");
            scheduler = scheduler.with_network_probe(Arc::new(probe));
        }

        debug!(?scheduler, "scheduler ready");
        Ok(Arc::new(scheduler))
    }
}

pub(crate) async fn run_downloader() -> Result<ProcessExit> {
    let cli = Cli::parse();

    let loaded = app_config::load_config(cli.global.config.as_deref())?;
    let config = RuntimeConfig::resolve(&cli.global, loaded.config.as_ref())?;

    let default_level = config_runtime::resolve_default_log_level(&cli.global);
    let no_color = terminal::no_color_env_requested() || terminal::is_dumb_terminal();
    terminal::init_tracing(default_level, no_color);

    debug!(?cli, config_path = ?loaded.path, "CLI arguments parsed");
    debug!(?config, "runtime config resolved");

    let ctx = AppContext::open(config, cli.global.quiet).await?;

    match cli.command {
        Command::Add(args) => commands::run_add_command(&ctx, &args).await,
        Command::Run { job_ids } => commands::run_run_command(&ctx, &job_ids).await,
        Command::Pause { job_id } => commands::run_pause_command(&ctx, job_id).await,
        Command::Resume { job_id } => commands::run_resume_command(&ctx, job_id).await,
        Command::Remove { job_id } => commands::run_remove_command(&ctx, job_id).await,
        Command::Status { json } => commands::run_status_command(&ctx, json).await,
    }
}

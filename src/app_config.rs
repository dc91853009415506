//! Application configuration loading for CLI defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use novel_downloader_core::scheduler::DispatchMode;
use serde::Deserialize;

/// TOML-backed file configuration. Every field is optional; unset fields fall
/// back to the built-in defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Root directory for localized documents.
    pub output_dir: Option<PathBuf>,
    /// SQLite queue database path.
    pub database: Option<PathBuf>,
    /// Maximum concurrent chapter fetches per job (1..=100).
    pub concurrency: Option<u8>,
    /// Politeness limit shared by every job (1..=100).
    pub requests_per_second: Option<u32>,
    /// Retries for transient failures of idempotent requests (0..=10).
    pub max_retries: Option<u8>,
    pub retry_base_delay_ms: Option<u64>,
    pub retry_max_delay_ms: Option<u64>,
    /// How long an in-flight request can be joined by duplicates.
    pub dedup_ttl_ms: Option<u64>,
    /// How long a finished request stays joinable.
    pub dedup_cleanup_ms: Option<u64>,
    /// Hard timeout for anti-bot challenge solving (1..=120).
    pub challenge_timeout_secs: Option<u64>,
    pub dispatch_mode: Option<DispatchMode>,
    /// Netscape `cookies.txt` loaded into the session.
    pub cookies_file: Option<PathBuf>,
    /// Remove "Previous/Next Chapter" style links from documents.
    pub strip_directional_links: Option<bool>,
    /// `host:port` probed for reachability; no probing when unset.
    pub probe_host: Option<String>,
}

impl FileConfig {
    /// Validates config values against runtime and CLI constraints.
    pub fn validate(&self) -> Result<()> {
        if let Some(concurrency) = self.concurrency
            && !(1..=100).contains(&concurrency)
        {
            bail!("Invalid config value for `concurrency`: {concurrency}. Expected range: 1..=100");
        }
        if let Some(rps) = self.requests_per_second
            && !(1..=100).contains(&rps)
        {
            bail!(
                "Invalid config value for `requests_per_second`: {rps}. Expected range: 1..=100"
            );
        }
        if let Some(retries) = self.max_retries
            && retries > 10
        {
            bail!("Invalid config value for `max_retries`: {retries}. Expected range: 0..=10");
        }
        validate_millis("retry_base_delay_ms", self.retry_base_delay_ms)?;
        validate_millis("retry_max_delay_ms", self.retry_max_delay_ms)?;
        validate_millis("dedup_ttl_ms", self.dedup_ttl_ms)?;
        validate_millis("dedup_cleanup_ms", self.dedup_cleanup_ms)?;
        if let (Some(base), Some(max)) = (self.retry_base_delay_ms, self.retry_max_delay_ms)
            && base > max
        {
            bail!(
                "Invalid config: `retry_base_delay_ms` ({base}) must not exceed `retry_max_delay_ms` ({max})"
            );
        }
        if let Some(secs) = self.challenge_timeout_secs
            && !(1..=120).contains(&secs)
        {
            bail!(
                "Invalid config value for `challenge_timeout_secs`: {secs}. Expected range: 1..=120"
            );
        }
        if let Some(host) = &self.probe_host
            && !host.contains(':')
        {
            bail!("Invalid config value for `probe_host`: '{host}'. Expected host:port");
        }
        Ok(())
    }
}

fn validate_millis(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=600_000).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=600000");
    }
    Ok(())
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed file config when a config file exists and was valid.
    pub config: Option<FileConfig>,
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/novel-downloader/config.toml`
/// 2. `$HOME/.config/novel-downloader/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("novel-downloader")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("novel-downloader")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads `explicit` if given (it must exist), otherwise the default path if present.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        let config = load_file_config(path)?;
        return Ok(LoadedConfig {
            path: Some(path.to_path_buf()),
            config: Some(config),
        });
    }

    let path = resolve_default_config_path();
    let config = match path.as_deref() {
        Some(path) if path.exists() => Some(load_file_config(path)?),
        _ => None,
    };
    Ok(LoadedConfig { path, config })
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let config: FileConfig = toml::from_str(raw)?;
    config.validate()?;
    Ok(config)
}

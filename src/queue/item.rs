//! Job and chapter task types with their shared status definition.

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle status shared by jobs and chapter tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// Waiting to be fetched.
    Queued,
    /// Claimed by a scheduler run.
    Running,
    /// Paused by the user.
    Paused,
    /// Stopped because the network was unavailable.
    Stopped,
    /// Fetched, localized and stored.
    Complete,
}

impl DownloadStatus {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Complete => "complete",
        }
    }

    /// Returns `true` for statuses the scheduler may still dispatch.
    #[must_use]
    pub fn is_dispatchable(&self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DownloadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "stopped" => Ok(Self::Stopped),
            "complete" => Ok(Self::Complete),
            _ => Err(format!("invalid download status: {s}")),
        }
    }
}

/// One parent work being downloaded.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    /// Stable identifier of the work.
    pub job_id: i64,
    /// Where the work's chapter list came from.
    pub source_url: String,
    /// Display name, also used for the output directory.
    pub name: String,
    /// Stored status text, parsed via `status()`.
    #[sqlx(rename = "status")]
    #[serde(rename = "status")]
    pub status_str: String,
    /// Whether chapter URLs have been recorded for this job.
    pub chapter_urls_cached: bool,
}

impl Job {
    /// Returns the parsed status, treating unknown text as `Queued`.
    #[must_use]
    pub fn status(&self) -> DownloadStatus {
        self.status_str.parse().unwrap_or(DownloadStatus::Queued)
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Job {{ id: {}, name: {}, status: {} }}",
            self.job_id,
            self.name,
            self.status()
        )
    }
}

/// One fetchable chapter document.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ChapterTask {
    /// Owning job.
    pub job_id: i64,
    /// Chapter URL, unique within its job.
    pub url: String,
    /// Position in the work; defines fetch and display order.
    pub order_id: i64,
    /// Stored status text, parsed via `status()`.
    #[sqlx(rename = "status")]
    #[serde(rename = "status")]
    pub status_str: String,
    /// Where the localized document was written. Set once, never re-fetched after.
    pub local_file_path: Option<String>,
    /// Final URL after redirects, when it differs from `url`.
    pub redirected_url: Option<String>,
    /// Document title extracted during localization.
    pub title: Option<String>,
    /// JSON array of extra pages stored with the chapter; see `linked_pages()`.
    #[serde(skip)]
    pub linked_pages: Option<String>,
}

impl ChapterTask {
    /// Returns the parsed status, treating unknown text as `Queued`.
    #[must_use]
    pub fn status(&self) -> DownloadStatus {
        self.status_str.parse().unwrap_or(DownloadStatus::Queued)
    }

    /// Extra pages stored alongside this chapter. Unreadable JSON reads as none.
    #[must_use]
    pub fn linked_pages(&self) -> Vec<String> {
        self.linked_pages
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok())
            .unwrap_or_default()
    }

    /// Returns `true` once the chapter has a stored local file.
    #[must_use]
    pub fn is_downloaded(&self) -> bool {
        self.local_file_path.is_some()
    }
}

impl fmt::Display for ChapterTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ChapterTask {{ job: {}, order: {}, url: {}, status: {} }}",
            self.job_id,
            self.order_id,
            self.url,
            self.status()
        )
    }
}

/// Per-status task counts for one job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub queued: i64,
    pub running: i64,
    pub paused: i64,
    pub stopped: i64,
    pub complete: i64,
}

impl TaskCounts {
    /// Total number of tasks counted.
    #[must_use]
    pub fn total(&self) -> i64 {
        self.queued + self.running + self.paused + self.stopped + self.complete
    }

    pub(crate) fn add(&mut self, status: DownloadStatus, count: i64) {
        match status {
            DownloadStatus::Queued => self.queued += count,
            DownloadStatus::Running => self.running += count,
            DownloadStatus::Paused => self.paused += count,
            DownloadStatus::Stopped => self.stopped += count,
            DownloadStatus::Complete => self.complete += count,
        }
    }
}

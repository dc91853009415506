//! Error types for queue operations.

use thiserror::Error;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// No job record exists for the id.
    #[error(
        "job not found: id {0}\n  Suggestion: The job may have completed or been removed; run `novel-downloader status`"
    )]
    JobNotFound(i64),

    /// No chapter task exists for the job/url pair.
    #[error("chapter not found in job {job_id}: {url}")]
    TaskNotFound {
        /// Owning job id.
        job_id: i64,
        /// Chapter URL that was looked up.
        url: String,
    },

    /// A status value could not be parsed.
    #[error(
        "invalid status '{status}': {reason}\n  Suggestion: Use one of: queued, running, paused, stopped, complete"
    )]
    InvalidStatus {
        /// The invalid status value.
        status: String,
        /// Why it's invalid.
        reason: String,
    },
}

impl QueueError {
    /// Creates an `InvalidStatus` error for an unrecognized status string.
    #[must_use]
    pub fn invalid_status(status: &str) -> Self {
        Self::InvalidStatus {
            status: status.to_string(),
            reason: "unrecognized status value".to_string(),
        }
    }

    /// Creates a `TaskNotFound` error.
    #[must_use]
    pub fn task_not_found(job_id: i64, url: impl Into<String>) -> Self {
        Self::TaskNotFound {
            job_id,
            url: url.into(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn test_queue_error_wraps_sqlx_error_as_source() {
        let err = QueueError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, QueueError::Database(sqlx::Error::RowNotFound)));
        assert!(err.to_string().starts_with("database error:"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_queue_error_job_not_found_message() {
        let err = QueueError::JobNotFound(42);
        let msg = err.to_string();
        assert!(msg.contains("not found"));
        assert!(msg.contains("42"));
        assert!(msg.contains("Suggestion"));
    }

    #[test]
    fn test_queue_error_task_not_found_message() {
        let err = QueueError::task_not_found(7, "https://example.com/c/3");
        let msg = err.to_string();
        assert!(msg.contains("job 7"));
        assert!(msg.contains("https://example.com/c/3"));
    }

    #[test]
    fn test_queue_error_invalid_status_message() {
        let err = QueueError::invalid_status("unknown");
        let msg = err.to_string();
        assert!(msg.contains("invalid status"));
        assert!(msg.contains("unknown"));
        assert!(msg.contains("queued"));
    }
}

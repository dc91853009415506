//! SQLite-backed store for jobs and their chapter tasks.
//!
//! A job moves through `queued → running → complete` while its chapters are
//! claimed, fetched and stored. Pause and network loss park both the job and
//! its pending chapters in `paused` / `stopped` until they are requeued.
//!
//! # Overview
//!
//! - [`Queue`] - SQLite implementation of the store
//! - [`QueueStore`] - async seam the scheduler depends on
//! - [`Job`] / [`ChapterTask`] - persisted rows
//! - [`DownloadStatus`] - lifecycle states shared by both
//!
//! # Example
//!
//! ```no_run
//! use novel_downloader_core::queue::Queue;
//! use novel_downloader_core::Database;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = Queue::new(Database::new_in_memory().await?);
//! let job_id = queue.create_job("https://example.com/novel/42", "Example Novel").await?;
//! queue
//!     .add_tasks(job_id, &[("https://example.com/novel/42/1".to_string(), 0)])
//!     .await?;
//! for task in queue.list_queued_tasks(job_id).await? {
//!     println!("{task}");
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod item;
mod repository;

pub use error::QueueError;
pub use item::{ChapterTask, DownloadStatus, Job, TaskCounts};
pub use repository::QueueStore;

use std::path::Path;
use std::time::Duration;

use sqlx::Row;
use tracing::{debug, instrument};

use crate::db::Database;

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

const JOB_COLUMNS: &str = r"SELECT j.job_id, w.source_url, w.name, j.status, j.chapter_urls_cached
    FROM jobs j JOIN works w ON w.id = j.job_id";

const TASK_COLUMNS: &str = "SELECT job_id, url, order_id, status, local_file_path, redirected_url, title,
    linked_pages FROM chapters";

/// Store for jobs and chapter tasks.
///
/// Every status transition is a single conditional `UPDATE`, so two schedulers
/// sharing one database never both claim the same chapter. A claim records
/// the claiming run and time; recovery only takes back claims that are stale.
#[derive(Debug, Clone)]
pub struct Queue {
    db: Database,
}

impl Queue {
    /// Creates a queue over the given database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Registers a work and (re)creates its job record as `Queued`.
    ///
    /// The same `source_url` always yields the same job id, so chapters stored
    /// by an earlier job stay attached when the work is enqueued again. A job
    /// that is `Paused` stays paused until it is resumed.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if either write fails.
    #[instrument(skip(self), fields(source_url = %source_url))]
    pub async fn create_job(&self, source_url: &str, name: &str) -> Result<i64> {
        let mut tx = self.db.pool().begin().await?;

        let row = sqlx::query(
            r"INSERT INTO works (source_url, name) VALUES (?, ?)
              ON CONFLICT(source_url) DO UPDATE SET name = excluded.name
              RETURNING id",
        )
        .bind(source_url)
        .bind(name)
        .fetch_one(&mut *tx)
        .await?;
        let job_id: i64 = row.get("id");

        sqlx::query(
            r"INSERT INTO jobs (job_id, status) VALUES (?, ?)
              ON CONFLICT(job_id) DO UPDATE SET
                  status = CASE WHEN jobs.status = ? THEN jobs.status ELSE excluded.status END,
                  updated_at = datetime('now')",
        )
        .bind(job_id)
        .bind(DownloadStatus::Queued.as_str())
        .bind(DownloadStatus::Paused.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(job_id, "job queued");
        Ok(job_id)
    }

    /// Inserts chapters as `Queued`, keyed by URL.
    ///
    /// `order_id` is the chapter's position in the full chapter list. Chapters
    /// already known keep their status and take the new position, so a list
    /// that grew in the middle renumbers instead of colliding.
    ///
    /// Returns the number of chapters actually inserted.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if a write fails.
    #[instrument(skip(self, chapters), fields(count = chapters.len()))]
    pub async fn add_tasks(&self, job_id: i64, chapters: &[(String, i64)]) -> Result<u64> {
        let mut tx = self.db.pool().begin().await?;
        let mut inserted = 0;

        for (url, order_id) in chapters {
            let result = sqlx::query(
                r"INSERT INTO chapters (job_id, url, order_id, status) VALUES (?, ?, ?, ?)
                  ON CONFLICT(job_id, url) DO NOTHING",
            )
            .bind(job_id)
            .bind(url)
            .bind(order_id)
            .bind(DownloadStatus::Queued.as_str())
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 1 {
                inserted += 1;
                continue;
            }
            sqlx::query(
                r"UPDATE chapters SET order_id = ?, updated_at = datetime('now')
                  WHERE job_id = ? AND url = ? AND order_id != ?",
            )
            .bind(order_id)
            .bind(job_id)
            .bind(url)
            .bind(order_id)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "UPDATE jobs SET chapter_urls_cached = 1, updated_at = datetime('now') WHERE job_id = ?",
        )
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(inserted)
    }

    /// Gets a job by id.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get_job(&self, job_id: i64) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(&format!("{JOB_COLUMNS} WHERE j.job_id = ?"))
            .bind(job_id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(job)
    }

    /// Lists every job record, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(&format!("{JOB_COLUMNS} ORDER BY j.job_id ASC"))
            .fetch_all(self.db.pool())
            .await?;
        Ok(jobs)
    }

    /// Lists `Queued`/`Running` chapters without a local file, by `order_id`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list_queued_tasks(&self, job_id: i64) -> Result<Vec<ChapterTask>> {
        let tasks = sqlx::query_as::<_, ChapterTask>(&format!(
            "{TASK_COLUMNS} WHERE job_id = ? AND local_file_path IS NULL AND status IN (?, ?)
             ORDER BY order_id ASC"
        ))
        .bind(job_id)
        .bind(DownloadStatus::Queued.as_str())
        .bind(DownloadStatus::Running.as_str())
        .fetch_all(self.db.pool())
        .await?;
        Ok(tasks)
    }

    /// Lists every chapter of a job, by `order_id`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list_tasks(&self, job_id: i64) -> Result<Vec<ChapterTask>> {
        let tasks = sqlx::query_as::<_, ChapterTask>(&format!(
            "{TASK_COLUMNS} WHERE job_id = ? ORDER BY order_id ASC"
        ))
        .bind(job_id)
        .fetch_all(self.db.pool())
        .await?;
        Ok(tasks)
    }

    /// Reads the status of one chapter.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails, or
    /// [`QueueError::InvalidStatus`] if the stored text is not a known status.
    #[instrument(skip(self))]
    pub async fn get_task_status(&self, job_id: i64, url: &str) -> Result<Option<DownloadStatus>> {
        let row = sqlx::query("SELECT status FROM chapters WHERE job_id = ? AND url = ?")
            .bind(job_id)
            .bind(url)
            .fetch_optional(self.db.pool())
            .await?;

        row.map(|row| {
            let status: String = row.get("status");
            status
                .parse::<DownloadStatus>()
                .map_err(|_| QueueError::invalid_status(&status))
        })
        .transpose()
    }

    /// Atomically claims a `Queued` chapter for fetching on behalf of `claimant`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn claim_task(&self, job_id: i64, url: &str, claimant: &str) -> Result<bool> {
        let result = sqlx::query(
            r"UPDATE chapters SET status = ?, claimed_by = ?, claimed_at = datetime('now'),
                  updated_at = datetime('now')
              WHERE job_id = ? AND url = ? AND status = ? AND local_file_path IS NULL",
        )
        .bind(DownloadStatus::Running.as_str())
        .bind(claimant)
        .bind(job_id)
        .bind(url)
        .bind(DownloadStatus::Queued.as_str())
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Returns a chapter that is still `Running` to `Queued`.
    ///
    /// A chapter paused while its fetch was in flight keeps its `Paused` status.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn release_task(&self, job_id: i64, url: &str) -> Result<()> {
        sqlx::query(
            r"UPDATE chapters SET status = ?, claimed_by = NULL, claimed_at = NULL,
                  updated_at = datetime('now')
              WHERE job_id = ? AND url = ? AND status = ?",
        )
        .bind(DownloadStatus::Queued.as_str())
        .bind(job_id)
        .bind(url)
        .bind(DownloadStatus::Running.as_str())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Requeues chapters an earlier run left behind.
    ///
    /// `Stopped` chapters are always requeued. A `Running` chapter is requeued
    /// only when `claimant` itself holds it, when it has no claimant, or when
    /// its claim is older than `lease`. Claims held by other live runs are
    /// left alone.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn recover_tasks(&self, job_id: i64, claimant: &str, lease: Duration) -> Result<u64> {
        let result = sqlx::query(
            r"UPDATE chapters SET status = ?, claimed_by = NULL, claimed_at = NULL,
                  updated_at = datetime('now')
              WHERE job_id = ? AND local_file_path IS NULL
                AND (status = ?
                     OR (status = ? AND (claimed_by IS NULL OR claimed_by = ?
                                         OR claimed_at IS NULL
                                         OR claimed_at <= datetime('now', ?))))",
        )
        .bind(DownloadStatus::Queued.as_str())
        .bind(job_id)
        .bind(DownloadStatus::Stopped.as_str())
        .bind(DownloadStatus::Running.as_str())
        .bind(claimant)
        .bind(format!("-{} seconds", lease.as_secs()))
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// Records the extra pages stored alongside a chapter.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::TaskNotFound`] if the chapter row is gone.
    /// Returns [`QueueError::Database`] if the update fails.
    #[instrument(skip(self, pages), fields(pages = pages.len()))]
    pub async fn set_linked_pages(&self, job_id: i64, url: &str, pages: &[String]) -> Result<()> {
        let encoded = (!pages.is_empty()).then(|| encode_linked_pages(pages));
        let result = sqlx::query(
            "UPDATE chapters SET linked_pages = ?, updated_at = datetime('now') WHERE job_id = ? AND url = ?",
        )
        .bind(encoded)
        .bind(job_id)
        .bind(url)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::task_not_found(job_id, url));
        }
        Ok(())
    }

    /// Records where a chapter was stored and marks it `Complete`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::TaskNotFound`] if the chapter row is gone.
    /// Returns [`QueueError::Database`] if the update fails.
    #[instrument(skip(self, task), fields(job_id = task.job_id, url = %task.url))]
    pub async fn set_task_result(
        &self,
        task: &ChapterTask,
        local_file_path: &Path,
        redirected_url: Option<&str>,
        title: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE chapters
              SET status = ?, local_file_path = ?, redirected_url = ?, title = ?,
                  claimed_by = NULL, claimed_at = NULL, updated_at = datetime('now')
              WHERE job_id = ? AND url = ?",
        )
        .bind(DownloadStatus::Complete.as_str())
        .bind(local_file_path.to_string_lossy().into_owned())
        .bind(redirected_url)
        .bind(title)
        .bind(task.job_id)
        .bind(&task.url)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::task_not_found(task.job_id, &task.url));
        }
        Ok(())
    }

    /// Sets the status of a job record.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::JobNotFound`] if no job record exists.
    /// Returns [`QueueError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn set_job_status(&self, job_id: i64, status: DownloadStatus) -> Result<()> {
        let result = sqlx::query(
            "UPDATE jobs SET status = ?, updated_at = datetime('now') WHERE job_id = ?",
        )
        .bind(status.as_str())
        .bind(job_id)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::JobNotFound(job_id));
        }
        Ok(())
    }

    /// Moves every chapter of a job whose status is in `from` to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn set_job_tasks_status(
        &self,
        job_id: i64,
        from: &[DownloadStatus],
        to: DownloadStatus,
    ) -> Result<u64> {
        if from.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; from.len()].join(", ");
        let sql = format!(
            "UPDATE chapters SET status = ?, updated_at = datetime('now')
             WHERE job_id = ? AND local_file_path IS NULL AND status IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql).bind(to.as_str()).bind(job_id);
        for status in from {
            query = query.bind(status.as_str());
        }

        let result = query.execute(self.db.pool()).await?;
        Ok(result.rows_affected())
    }

    /// Counts chapters of a job without a local file.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn count_pending(&self, job_id: i64) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS pending FROM chapters WHERE job_id = ? AND local_file_path IS NULL",
        )
        .bind(job_id)
        .fetch_one(self.db.pool())
        .await?;
        Ok(row.get("pending"))
    }

    /// Returns per-status chapter counts for a job.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn task_counts(&self, job_id: i64) -> Result<TaskCounts> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM chapters WHERE job_id = ? GROUP BY status",
        )
        .bind(job_id)
        .fetch_all(self.db.pool())
        .await?;

        let mut counts = TaskCounts::default();
        for row in rows {
            let status: String = row.get("status");
            let count: i64 = row.get("count");
            let status = status
                .parse::<DownloadStatus>()
                .map_err(|_| QueueError::invalid_status(&status))?;
            counts.add(status, count);
        }
        Ok(counts)
    }

    /// Deletes a job's queue record, keeping its chapters. Missing jobs are a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the delete fails.
    #[instrument(skip(self))]
    pub async fn delete_job(&self, job_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM jobs WHERE job_id = ?")
            .bind(job_id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Deletes a job's queue record and all of its chapter rows.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if a delete fails.
    #[instrument(skip(self))]
    pub async fn purge_job(&self, job_id: i64) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;
        let chapters = sqlx::query("DELETE FROM chapters WHERE job_id = ?")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM jobs WHERE job_id = ?")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(job_id, chapters = chapters.rows_affected(), "job purged");
        Ok(())
    }
}

/// JSON array text; a list of strings always serializes.
fn encode_linked_pages(pages: &[String]) -> String {
    serde_json::to_string(pages).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const RUN: &str = "run-a";

    async fn setup() -> Queue {
        Queue::new(Database::new_in_memory().await.unwrap())
    }

    fn chapters(urls: &[&str]) -> Vec<(String, i64)> {
        urls.iter()
            .enumerate()
            .map(|(i, url)| ((*url).to_string(), i64::try_from(i).unwrap()))
            .collect()
    }

    // ==================== Job Tests ====================

    #[tokio::test]
    async fn test_create_job_returns_stable_id_per_source_url() {
        let queue = setup().await;
        let first = queue.create_job("https://example.com/n/1", "One").await.unwrap();
        let second = queue.create_job("https://example.com/n/1", "One again").await.unwrap();
        let other = queue.create_job("https://example.com/n/2", "Two").await.unwrap();

        assert_eq!(first, second);
        assert_ne!(first, other);

        let job = queue.get_job(first).await.unwrap().unwrap();
        assert_eq!(job.name, "One again");
        assert_eq!(job.status(), DownloadStatus::Queued);
        assert!(!job.chapter_urls_cached);
    }

    #[tokio::test]
    async fn test_create_job_keeps_paused_job_paused() {
        let queue = setup().await;
        let job_id = queue.create_job("https://example.com/n/1", "One").await.unwrap();
        queue.set_job_status(job_id, DownloadStatus::Paused).await.unwrap();

        queue.create_job("https://example.com/n/1", "One").await.unwrap();
        let job = queue.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status(), DownloadStatus::Paused);

        queue.set_job_status(job_id, DownloadStatus::Stopped).await.unwrap();
        queue.create_job("https://example.com/n/1", "One").await.unwrap();
        let job = queue.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status(), DownloadStatus::Queued);
    }

    #[tokio::test]
    async fn test_set_job_status_missing_job_errors() {
        let queue = setup().await;
        let result = queue.set_job_status(99, DownloadStatus::Running).await;
        assert!(matches!(result, Err(QueueError::JobNotFound(99))));
    }

    #[tokio::test]
    async fn test_delete_job_keeps_chapters_and_purge_removes_them() {
        let queue = setup().await;
        let job_id = queue.create_job("https://example.com/n/1", "One").await.unwrap();
        queue
            .add_tasks(job_id, &chapters(&["https://example.com/c/1"]))
            .await
            .unwrap();

        queue.delete_job(job_id).await.unwrap();
        assert!(queue.get_job(job_id).await.unwrap().is_none());
        assert_eq!(queue.list_tasks(job_id).await.unwrap().len(), 1);

        queue.purge_job(job_id).await.unwrap();
        assert!(queue.list_tasks(job_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_job_is_noop_for_missing_job() {
        let queue = setup().await;
        assert!(queue.delete_job(12345).await.is_ok());
    }

    // ==================== Chapter Tests ====================

    #[tokio::test]
    async fn test_add_tasks_ignores_existing_rows() {
        let queue = setup().await;
        let job_id = queue.create_job("https://example.com/n/1", "One").await.unwrap();

        let inserted = queue
            .add_tasks(job_id, &chapters(&["https://example.com/c/1", "https://example.com/c/2"]))
            .await
            .unwrap();
        assert_eq!(inserted, 2);

        let again = queue
            .add_tasks(job_id, &chapters(&["https://example.com/c/1"]))
            .await
            .unwrap();
        assert_eq!(again, 0);

        let job = queue.get_job(job_id).await.unwrap().unwrap();
        assert!(job.chapter_urls_cached);
    }

    #[tokio::test]
    async fn test_add_tasks_same_position_different_url_is_inserted() {
        let queue = setup().await;
        let job_id = queue.create_job("https://example.com/n/1", "One").await.unwrap();

        queue
            .add_tasks(job_id, &[("https://example.com/c/u1".to_string(), 1)])
            .await
            .unwrap();
        let inserted = queue
            .add_tasks(job_id, &[("https://example.com/c/u2".to_string(), 1)])
            .await
            .unwrap();

        assert_eq!(inserted, 1);
        assert_eq!(queue.list_tasks(job_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_re_add_with_chapter_in_the_middle_queues_it_and_renumbers() {
        let queue = setup().await;
        let job_id = queue.create_job("https://example.com/n/1", "One").await.unwrap();
        queue
            .add_tasks(job_id, &chapters(&["https://example.com/c/1", "https://example.com/c/3"]))
            .await
            .unwrap();
        queue.claim_task(job_id, "https://example.com/c/1", RUN).await.unwrap();

        let inserted = queue
            .add_tasks(
                job_id,
                &chapters(&[
                    "https://example.com/c/1",
                    "https://example.com/c/2",
                    "https://example.com/c/3",
                ]),
            )
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        let tasks = queue.list_tasks(job_id).await.unwrap();
        let order: Vec<(&str, i64)> = tasks.iter().map(|t| (t.url.as_str(), t.order_id)).collect();
        assert_eq!(
            order,
            vec![
                ("https://example.com/c/1", 0),
                ("https://example.com/c/2", 1),
                ("https://example.com/c/3", 2),
            ]
        );
        assert_eq!(tasks[0].status(), DownloadStatus::Running);
        assert_eq!(tasks[1].status(), DownloadStatus::Queued);
        assert_eq!(queue.count_pending(job_id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_list_queued_tasks_orders_by_order_id_and_skips_stored() {
        let queue = setup().await;
        let job_id = queue.create_job("https://example.com/n/1", "One").await.unwrap();
        queue
            .add_tasks(
                job_id,
                &[
                    ("https://example.com/c/c".to_string(), 2),
                    ("https://example.com/c/a".to_string(), 0),
                    ("https://example.com/c/b".to_string(), 1),
                ],
            )
            .await
            .unwrap();

        let stored = queue.list_tasks(job_id).await.unwrap().remove(1);
        queue
            .set_task_result(&stored, Path::new("/tmp/0001-b.html"), None, Some("B"))
            .await
            .unwrap();

        let queued = queue.list_queued_tasks(job_id).await.unwrap();
        let urls: Vec<&str> = queued.iter().map(|t| t.url.as_str()).collect();
        assert_eq!(urls, vec!["https://example.com/c/a", "https://example.com/c/c"]);
    }

    #[tokio::test]
    async fn test_claim_task_is_exclusive() {
        let queue = setup().await;
        let job_id = queue.create_job("https://example.com/n/1", "One").await.unwrap();
        queue
            .add_tasks(job_id, &chapters(&["https://example.com/c/1"]))
            .await
            .unwrap();

        assert!(queue.claim_task(job_id, "https://example.com/c/1", RUN).await.unwrap());
        assert!(!queue.claim_task(job_id, "https://example.com/c/1", RUN).await.unwrap());
        assert_eq!(
            queue.get_task_status(job_id, "https://example.com/c/1").await.unwrap(),
            Some(DownloadStatus::Running)
        );
    }

    #[tokio::test]
    async fn test_recover_tasks_leaves_fresh_foreign_claims_alone() {
        let queue = setup().await;
        let job_id = queue.create_job("https://example.com/n/1", "One").await.unwrap();
        queue
            .add_tasks(
                job_id,
                &chapters(&[
                    "https://example.com/c/mine",
                    "https://example.com/c/theirs",
                    "https://example.com/c/stopped",
                ]),
            )
            .await
            .unwrap();
        queue.claim_task(job_id, "https://example.com/c/mine", RUN).await.unwrap();
        queue
            .claim_task(job_id, "https://example.com/c/theirs", "run-b")
            .await
            .unwrap();
        queue
            .set_job_tasks_status(job_id, &[DownloadStatus::Queued], DownloadStatus::Stopped)
            .await
            .unwrap();

        let recovered = queue
            .recover_tasks(job_id, RUN, Duration::from_secs(600))
            .await
            .unwrap();

        assert_eq!(recovered, 2);
        let status = |url: &'static str| {
            let queue = queue.clone();
            async move { queue.get_task_status(job_id, url).await.unwrap() }
        };
        assert_eq!(status("https://example.com/c/mine").await, Some(DownloadStatus::Queued));
        assert_eq!(status("https://example.com/c/theirs").await, Some(DownloadStatus::Running));
        assert_eq!(status("https://example.com/c/stopped").await, Some(DownloadStatus::Queued));
    }

    #[tokio::test]
    async fn test_recover_tasks_takes_back_expired_claims() {
        let queue = setup().await;
        let job_id = queue.create_job("https://example.com/n/1", "One").await.unwrap();
        queue
            .add_tasks(job_id, &chapters(&["https://example.com/c/1"]))
            .await
            .unwrap();
        queue.claim_task(job_id, "https://example.com/c/1", "run-b").await.unwrap();
        sqlx::query("UPDATE chapters SET claimed_at = datetime('now', '-1 hour')")
            .execute(queue.db.pool())
            .await
            .unwrap();

        let recovered = queue
            .recover_tasks(job_id, RUN, Duration::from_secs(600))
            .await
            .unwrap();

        assert_eq!(recovered, 1);
        assert!(queue.claim_task(job_id, "https://example.com/c/1", RUN).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_linked_pages_round_trips_json() {
        let queue = setup().await;
        let job_id = queue.create_job("https://example.com/n/1", "One").await.unwrap();
        queue
            .add_tasks(job_id, &chapters(&["https://example.com/c/1"]))
            .await
            .unwrap();

        let pages = vec![
            "https://example.com/c/1?page=2".to_string(),
            "https://example.com/c/1?page=3".to_string(),
        ];
        queue
            .set_linked_pages(job_id, "https://example.com/c/1", &pages)
            .await
            .unwrap();

        let task = queue.list_tasks(job_id).await.unwrap().remove(0);
        assert_eq!(task.linked_pages(), pages);
        assert!(matches!(
            queue.set_linked_pages(job_id, "https://example.com/c/9", &pages).await,
            Err(QueueError::TaskNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_release_task_leaves_paused_chapter_alone() {
        let queue = setup().await;
        let job_id = queue.create_job("https://example.com/n/1", "One").await.unwrap();
        queue
            .add_tasks(job_id, &chapters(&["https://example.com/c/1"]))
            .await
            .unwrap();
        queue.claim_task(job_id, "https://example.com/c/1", RUN).await.unwrap();
        queue
            .set_job_tasks_status(job_id, &[DownloadStatus::Running], DownloadStatus::Paused)
            .await
            .unwrap();

        queue.release_task(job_id, "https://example.com/c/1").await.unwrap();

        assert_eq!(
            queue.get_task_status(job_id, "https://example.com/c/1").await.unwrap(),
            Some(DownloadStatus::Paused)
        );
    }

    #[tokio::test]
    async fn test_set_task_result_marks_complete() {
        let queue = setup().await;
        let job_id = queue.create_job("https://example.com/n/1", "One").await.unwrap();
        queue
            .add_tasks(job_id, &chapters(&["https://example.com/c/1"]))
            .await
            .unwrap();
        let task = queue.list_queued_tasks(job_id).await.unwrap().remove(0);

        queue
            .set_task_result(
                &task,
                Path::new("/library/0000-one.html"),
                Some("https://example.com/c/1?redirected"),
                Some("One"),
            )
            .await
            .unwrap();

        let stored = queue.list_tasks(job_id).await.unwrap().remove(0);
        assert_eq!(stored.status(), DownloadStatus::Complete);
        assert_eq!(stored.local_file_path.as_deref(), Some("/library/0000-one.html"));
        assert_eq!(
            stored.redirected_url.as_deref(),
            Some("https://example.com/c/1?redirected")
        );
        assert_eq!(stored.title.as_deref(), Some("One"));
        assert_eq!(queue.count_pending(job_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_set_task_result_missing_row_errors() {
        let queue = setup().await;
        let ghost = ChapterTask {
            job_id: 5,
            url: "https://example.com/ghost".to_string(),
            order_id: 0,
            status_str: "running".to_string(),
            local_file_path: None,
            redirected_url: None,
            title: None,
            linked_pages: None,
        };

        let result = queue
            .set_task_result(&ghost, Path::new("/tmp/x.html"), None, None)
            .await;
        assert!(matches!(result, Err(QueueError::TaskNotFound { job_id: 5, .. })));
    }

    #[tokio::test]
    async fn test_set_job_tasks_status_and_counts() {
        let queue = setup().await;
        let job_id = queue.create_job("https://example.com/n/1", "One").await.unwrap();
        queue
            .add_tasks(
                job_id,
                &chapters(&[
                    "https://example.com/c/1",
                    "https://example.com/c/2",
                    "https://example.com/c/3",
                ]),
            )
            .await
            .unwrap();
        queue.claim_task(job_id, "https://example.com/c/1", RUN).await.unwrap();

        let moved = queue
            .set_job_tasks_status(job_id, &[DownloadStatus::Queued], DownloadStatus::Stopped)
            .await
            .unwrap();
        assert_eq!(moved, 2);

        let counts = queue.task_counts(job_id).await.unwrap();
        assert_eq!(counts.running, 1);
        assert_eq!(counts.stopped, 2);
        assert_eq!(counts.total(), 3);

        let none = queue
            .set_job_tasks_status(job_id, &[], DownloadStatus::Queued)
            .await
            .unwrap();
        assert_eq!(none, 0);
    }
}

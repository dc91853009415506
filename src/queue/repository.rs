//! Store seam consumed by the scheduler.
//!
//! The scheduler only talks to [`QueueStore`], so a run can be driven against
//! the SQLite [`Queue`] or any other store that keeps status transitions atomic.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use super::{ChapterTask, DownloadStatus, Job, Queue, Result};

/// Data-access contract for job and chapter status.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Returns the job record, or `None` once it has been deleted.
    async fn get_job(&self, job_id: i64) -> Result<Option<Job>>;

    /// Lists dispatchable chapters without a local file, ordered by `order_id`.
    async fn list_queued_tasks(&self, job_id: i64) -> Result<Vec<ChapterTask>>;

    /// Re-reads the current status of one chapter.
    async fn get_task_status(&self, job_id: i64, url: &str) -> Result<Option<DownloadStatus>>;

    /// Atomically moves a chapter from `Queued` to `Running` for `claimant`.
    /// Returns `false` if the chapter was not `Queued`.
    async fn claim_task(&self, job_id: i64, url: &str, claimant: &str) -> Result<bool>;

    /// Returns a `Running` chapter to `Queued` after a failed attempt.
    async fn release_task(&self, job_id: i64, url: &str) -> Result<()>;

    /// Requeues `Stopped` chapters and `Running` chapters whose claim is held by
    /// `claimant` or is older than `lease`.
    async fn recover_tasks(&self, job_id: i64, claimant: &str, lease: Duration) -> Result<u64>;

    /// Records the extra pages stored alongside a chapter.
    async fn set_linked_pages(&self, job_id: i64, url: &str, pages: &[String]) -> Result<()>;

    /// Records a stored chapter and marks it `Complete`.
    async fn set_task_result(
        &self,
        task: &ChapterTask,
        local_file_path: &Path,
        redirected_url: Option<&str>,
        title: Option<&str>,
    ) -> Result<()>;

    /// Sets the job status.
    async fn set_job_status(&self, job_id: i64, status: DownloadStatus) -> Result<()>;

    /// Moves every chapter of the job whose status is in `from` to `to`.
    async fn set_job_tasks_status(
        &self,
        job_id: i64,
        from: &[DownloadStatus],
        to: DownloadStatus,
    ) -> Result<u64>;

    /// Counts chapters of the job that have no local file yet.
    async fn count_pending(&self, job_id: i64) -> Result<i64>;

    /// Deletes the job's queue record. Chapter rows are kept.
    async fn delete_job(&self, job_id: i64) -> Result<()>;

    /// Deletes the job's queue record and all of its chapter rows.
    async fn purge_job(&self, job_id: i64) -> Result<()>;
}

#[async_trait]
impl QueueStore for Queue {
    async fn get_job(&self, job_id: i64) -> Result<Option<Job>> {
        Queue::get_job(self, job_id).await
    }

    async fn list_queued_tasks(&self, job_id: i64) -> Result<Vec<ChapterTask>> {
        Queue::list_queued_tasks(self, job_id).await
    }

    async fn get_task_status(&self, job_id: i64, url: &str) -> Result<Option<DownloadStatus>> {
        Queue::get_task_status(self, job_id, url).await
    }

    async fn claim_task(&self, job_id: i64, url: &str, claimant: &str) -> Result<bool> {
        Queue::claim_task(self, job_id, url, claimant).await
    }

    async fn release_task(&self, job_id: i64, url: &str) -> Result<()> {
        Queue::release_task(self, job_id, url).await
    }

    async fn recover_tasks(&self, job_id: i64, claimant: &str, lease: Duration) -> Result<u64> {
        Queue::recover_tasks(self, job_id, claimant, lease).await
    }

    async fn set_linked_pages(&self, job_id: i64, url: &str, pages: &[String]) -> Result<()> {
        Queue::set_linked_pages(self, job_id, url, pages).await
    }

    async fn set_task_result(
        &self,
        task: &ChapterTask,
        local_file_path: &Path,
        redirected_url: Option<&str>,
        title: Option<&str>,
    ) -> Result<()> {
        Queue::set_task_result(self, task, local_file_path, redirected_url, title).await
    }

    async fn set_job_status(&self, job_id: i64, status: DownloadStatus) -> Result<()> {
        Queue::set_job_status(self, job_id, status).await
    }

    async fn set_job_tasks_status(
        &self,
        job_id: i64,
        from: &[DownloadStatus],
        to: DownloadStatus,
    ) -> Result<u64> {
        Queue::set_job_tasks_status(self, job_id, from, to).await
    }

    async fn count_pending(&self, job_id: i64) -> Result<i64> {
        Queue::count_pending(self, job_id).await
    }

    async fn delete_job(&self, job_id: i64) -> Result<()> {
        Queue::delete_job(self, job_id).await
    }

    async fn purge_job(&self, job_id: i64) -> Result<()> {
        Queue::purge_job(self, job_id).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::Database;

    async fn pending(store: &dyn QueueStore, job_id: i64) -> i64 {
        store.count_pending(job_id).await.unwrap()
    }

    #[tokio::test]
    async fn test_queue_store_trait_object_drives_task_lifecycle() {
        let queue = Queue::new(Database::new_in_memory().await.unwrap());
        let job_id = queue
            .create_job("https://example.com/novel", "Novel")
            .await
            .unwrap();
        queue
            .add_tasks(job_id, &[("https://example.com/c/1".to_string(), 0)])
            .await
            .unwrap();

        let store: &dyn QueueStore = &queue;
        assert_eq!(pending(store, job_id).await, 1);

        assert!(store.claim_task(job_id, "https://example.com/c/1", "run").await.unwrap());
        assert!(!store.claim_task(job_id, "https://example.com/c/1", "run").await.unwrap());

        store
            .release_task(job_id, "https://example.com/c/1")
            .await
            .unwrap();
        assert_eq!(
            store
                .get_task_status(job_id, "https://example.com/c/1")
                .await
                .unwrap(),
            Some(DownloadStatus::Queued)
        );
    }
}

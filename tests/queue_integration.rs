//! Integration tests for the queue module.
//!
//! These tests verify Queue operations against a real SQLite database file.

use std::path::Path;

use novel_downloader_core::{Database, DownloadStatus, Queue, QueueError, QueueStore};
use tempfile::TempDir;

/// Helper to create a test database with migrations applied.
async fn setup_test_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.db");

    let db = Database::new(&db_path)
        .await
        .expect("Failed to create database");

    (db, temp_dir)
}

fn chapters(base: &str, count: i64) -> Vec<(String, i64)> {
    (1..=count).map(|n| (format!("{base}/{n}"), n)).collect()
}

// ==================== Persistence ====================

#[tokio::test]
async fn test_database_file_uses_wal() {
    let (db, _temp_dir) = setup_test_db().await;
    assert!(db.is_wal_enabled().await.unwrap());
}

#[tokio::test]
async fn test_jobs_and_chapters_survive_reopen() {
    let (db, temp_dir) = setup_test_db().await;
    let queue = Queue::new(db.clone());
    let job_id = queue.create_job("https://h/novel", "Novel").await.unwrap();
    queue
        .add_tasks(job_id, &chapters("https://h/novel", 3))
        .await
        .unwrap();
    assert!(queue.claim_task(job_id, "https://h/novel/1", "run-a").await.unwrap());
    db.close().await;

    let reopened = Queue::new(Database::new(&temp_dir.path().join("test.db")).await.unwrap());
    let job = reopened.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.name, "Novel");
    assert!(job.chapter_urls_cached);

    let counts = reopened.task_counts(job_id).await.unwrap();
    assert_eq!(counts.queued, 2);
    assert_eq!(counts.running, 1);
    assert_eq!(counts.total(), 3);
}

#[tokio::test]
async fn test_requeued_work_keeps_stored_chapters() {
    let (db, temp_dir) = setup_test_db().await;
    let queue = Queue::new(db);
    let job_id = queue.create_job("https://h/novel", "Novel").await.unwrap();
    queue
        .add_tasks(job_id, &chapters("https://h/novel", 2))
        .await
        .unwrap();

    let task = queue
        .list_tasks(job_id)
        .await
        .unwrap()
        .into_iter()
        .next()
        .unwrap();
    let stored = temp_dir.path().join("0001-One.html");
    queue
        .set_task_result(&task, &stored, None, Some("One"))
        .await
        .unwrap();
    queue.delete_job(job_id).await.unwrap();
    assert!(queue.get_job(job_id).await.unwrap().is_none());

    let again = queue.create_job("https://h/novel", "Novel (Revised)").await.unwrap();
    assert_eq!(again, job_id);
    let inserted = queue
        .add_tasks(job_id, &chapters("https://h/novel", 3))
        .await
        .unwrap();
    assert_eq!(inserted, 1);

    let tasks = queue.list_tasks(job_id).await.unwrap();
    let first = &tasks[0];
    assert_eq!(first.order_id, 1);
    assert_eq!(
        first.local_file_path.as_deref().map(Path::new),
        Some(stored.as_path())
    );
    assert_eq!(queue.count_pending(job_id).await.unwrap(), 2);
    assert_eq!(
        queue.get_job(job_id).await.unwrap().unwrap().name,
        "Novel (Revised)"
    );
}

// ==================== Concurrency ====================

#[tokio::test]
async fn test_two_queues_on_one_file_never_claim_the_same_chapter() {
    let (db, temp_dir) = setup_test_db().await;
    let first = Queue::new(db);
    let second = Queue::new(Database::new(&temp_dir.path().join("test.db")).await.unwrap());

    let job_id = first.create_job("https://h/novel", "Novel").await.unwrap();
    first
        .add_tasks(job_id, &chapters("https://h/novel", 1))
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        first.claim_task(job_id, "https://h/novel/1", "run-a"),
        second.claim_task(job_id, "https://h/novel/1", "run-b"),
    );
    assert!(a.unwrap() ^ b.unwrap(), "exactly one claim must win");
}

// ==================== Store Trait ====================

#[tokio::test]
async fn test_queue_store_trait_object_dispatch() {
    let (db, _temp_dir) = setup_test_db().await;
    let queue = std::sync::Arc::new(Queue::new(db));
    let job_id = queue.create_job("https://h/novel", "Novel").await.unwrap();
    queue
        .add_tasks(job_id, &chapters("https://h/novel", 2))
        .await
        .unwrap();

    let store: std::sync::Arc<dyn QueueStore> = queue.clone();
    let moved = store
        .set_job_tasks_status(job_id, &[DownloadStatus::Queued], DownloadStatus::Paused)
        .await
        .unwrap();
    assert_eq!(moved, 2);
    assert_eq!(
        store
            .get_task_status(job_id, "https://h/novel/2")
            .await
            .unwrap(),
        Some(DownloadStatus::Paused)
    );
    assert!(store.list_queued_tasks(job_id).await.unwrap().is_empty());

    store.purge_job(job_id).await.unwrap();
    assert!(queue.list_tasks(job_id).await.unwrap().is_empty());
    let err = store
        .set_job_status(job_id, DownloadStatus::Queued)
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::JobNotFound(id) if id == job_id));
}

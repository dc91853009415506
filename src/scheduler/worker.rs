//! Fetch, localize and store one chapter.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::TaskError;
use super::notify::{ProgressEvent, ProgressKind, ProgressNotifier};
use crate::fetch::{FetchError, FetchRequest, FetchResponse, Transport};
use crate::localize::{
    ContentLocalizer, LocalizedDocument, document_name, linked_document_name,
    sanitize_filename_component, write_if_absent,
};
use crate::queue::{ChapterTask, QueueStore};

/// Directory used when a chapter URL has no host.
const UNKNOWN_HOST_DIR: &str = "unknown-host";

/// Everything a worker needs for the chapters of one job.
pub(crate) struct TaskWorker {
    pub(crate) store: Arc<dyn QueueStore>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) localizer: Arc<ContentLocalizer>,
    pub(crate) notifier: Arc<ProgressNotifier>,
    pub(crate) output_dir: PathBuf,
    /// Directory name of the work under each host directory.
    pub(crate) work_dir: String,
    /// Token of the run; bound to every request the worker makes.
    pub(crate) cancel: CancellationToken,
}

impl TaskWorker {
    /// Runs one claimed chapter to completion.
    ///
    /// Failures never escape as panics or job errors: the chapter is released
    /// back to `Queued` for the next run and an `Update` event is emitted.
    #[instrument(skip(self, task), fields(job_id = task.job_id, order_id = task.order_id, url = %task.url))]
    pub(crate) async fn run(&self, task: ChapterTask) -> Result<PathBuf, TaskError> {
        match self.fetch_and_store(&task).await {
            Ok(path) => {
                info!(path = %path.display(), "chapter stored");
                self.notifier
                    .notify(ProgressEvent::task(task.job_id, &task.url, ProgressKind::Complete))
                    .await;
                Ok(path)
            }
            Err(error) => {
                warn!(error = %error, "chapter failed; it will be retried on the next run");
                if let Err(release_error) = self.store.release_task(task.job_id, &task.url).await {
                    warn!(error = %release_error, "failed to release chapter");
                }
                self.notifier
                    .notify(ProgressEvent::task(task.job_id, &task.url, ProgressKind::Update))
                    .await;
                Err(error)
            }
        }
    }

    async fn fetch_and_store(&self, task: &ChapterTask) -> Result<PathBuf, TaskError> {
        let url = Url::parse(&task.url).map_err(|_| FetchError::invalid_url(&task.url))?;
        let response = self.fetch(&url).await?;

        let final_url = response.url().clone();
        let redirected = (final_url != url).then(|| final_url.to_string());
        let host_dir = self.host_dir(&url);
        let item_dir = host_dir.join(&self.work_dir);

        let document = self.localize(&response, &host_dir, &item_dir).await?;
        debug!(report = ?document.report, "chapter localized");

        let path = item_dir.join(document_name(task.order_id, document.title.as_deref(), &url));
        write_document(&path, &document.html).await?;

        let linked = self
            .store_linked_pages(task, &document, &host_dir, &item_dir)
            .await?;
        if !linked.is_empty() {
            self.store
                .set_linked_pages(task.job_id, &task.url, &linked)
                .await?;
        }

        self.store
            .set_task_result(task, &path, redirected.as_deref(), document.title.as_deref())
            .await?;
        Ok(path)
    }

    /// Fetches `url` under the run's token. Non-2xx statuses are errors.
    async fn fetch(&self, url: &Url) -> Result<FetchResponse, TaskError> {
        let request = FetchRequest::get(url.clone()).with_cancellation(self.cancel.clone());
        let response = self.transport.execute(request).await?;
        if !response.is_success() {
            return Err(TaskError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }

    /// Localizes a fetched page. A run cancelled meanwhile stores nothing.
    async fn localize(
        &self,
        response: &FetchResponse,
        host_dir: &Path,
        item_dir: &Path,
    ) -> Result<LocalizedDocument, TaskError> {
        let document = self
            .localizer
            .localize_with_cancellation(
                &response.text(),
                response.url(),
                host_dir,
                item_dir,
                &self.cancel,
            )
            .await?;
        if self.cancel.is_cancelled() {
            return Err(FetchError::cancelled(response.url().as_str()).into());
        }
        Ok(document)
    }

    /// Fetches, localizes and writes the chapter's further pages next to it.
    ///
    /// A page that fails is logged and skipped; cancellation fails the chapter.
    /// Returns the URLs of the pages stored.
    async fn store_linked_pages(
        &self,
        task: &ChapterTask,
        document: &LocalizedDocument,
        host_dir: &Path,
        item_dir: &Path,
    ) -> Result<Vec<String>, TaskError> {
        let mut stored = Vec::new();
        for (index, page_url) in document.linked_pages.iter().enumerate() {
            let page = match self.fetch(page_url).await {
                Ok(response) => self.localize(&response, host_dir, item_dir).await,
                Err(error) => Err(error),
            };
            let page = match page {
                Ok(page) => page,
                Err(TaskError::Fetch(error)) if error.is_cancelled() => {
                    return Err(TaskError::Fetch(error));
                }
                Err(error) => {
                    warn!(url = %page_url, error = %error, "linked page skipped");
                    continue;
                }
            };
            let name =
                linked_document_name(task.order_id, index + 2, page.title.as_deref(), page_url);
            write_document(&item_dir.join(name), &page.html).await?;
            stored.push(page_url.to_string());
        }
        if !stored.is_empty() {
            debug!(pages = stored.len(), "linked pages stored");
        }
        Ok(stored)
    }

    fn host_dir(&self, url: &Url) -> PathBuf {
        let host = url
            .host_str()
            .map(sanitize_filename_component)
            .filter(|host| !host.is_empty())
            .unwrap_or_else(|| UNKNOWN_HOST_DIR.to_string());
        self.output_dir.join(host)
    }
}

/// Writes the document unless a file is already there; the existing file wins.
async fn write_document(path: &Path, html: &str) -> Result<(), TaskError> {
    let written = write_if_absent(path, html.as_bytes())
        .await
        .map_err(|source| TaskError::io(path, source))?;
    if !written {
        debug!(path = %path.display(), "document already on disk; keeping it");
    }
    Ok(())
}

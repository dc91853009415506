//! Progress UI (bar) for job runs, fed by the scheduler's progress events.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use novel_downloader_core::{ProgressEvent, ProgressKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A running progress bar task. Call [`ProgressUi::finish`] once the run ends.
pub(crate) struct ProgressUi {
    handle: JoinHandle<()>,
    stop: CancellationToken,
}

impl ProgressUi {
    pub(crate) async fn finish(self) {
        self.stop.cancel();
        let _ = self.handle.await;
    }
}

/// Spawns a bar for `job_id` when `enabled`; otherwise returns `None`.
///
/// `done` chapters are already stored out of `total`.
pub(crate) fn spawn_progress_ui(
    enabled: bool,
    events: mpsc::Receiver<ProgressEvent>,
    job_id: i64,
    label: &str,
    total: u64,
    done: u64,
) -> Option<ProgressUi> {
    if !enabled {
        return None;
    }
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template("{spinner} {prefix} [{bar:30}] {pos}/{len} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.set_prefix(label.to_string());
    bar.set_position(done);
    bar.enable_steady_tick(Duration::from_millis(100));

    let stop = CancellationToken::new();
    let handle = tokio::spawn(drive_bar(bar, events, job_id, stop.clone()));
    Some(ProgressUi { handle, stop })
}

async fn drive_bar(
    bar: ProgressBar,
    mut events: mpsc::Receiver<ProgressEvent>,
    job_id: i64,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => apply_event(&bar, job_id, &event),
                None => break,
            },
        }
    }
    bar.finish_and_clear();
}

/// Updates `bar` for one event. Events of other jobs are ignored.
pub(crate) fn apply_event(bar: &ProgressBar, job_id: i64, event: &ProgressEvent) {
    if event.job_id != job_id {
        return;
    }
    match (event.kind, event.task_url.as_deref()) {
        (ProgressKind::Complete, Some(_)) => bar.inc(1),
        (ProgressKind::Complete, None) => bar.set_message("done"),
        (ProgressKind::Update, Some(url)) => bar.set_message(format!("will retry {url}")),
        (ProgressKind::Update, None) => {}
        (ProgressKind::Stopped, _) => bar.set_message("stopped: network unavailable"),
    }
}

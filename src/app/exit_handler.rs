//! Exit code logic for the downloader process.
//!
//! Single responsibility: map run outcomes to the process exit outcome.

use novel_downloader_core::RunOutcome;

use crate::ProcessExit;

/// Folds the outcomes of every job run in one invocation.
///
/// Any chapter still pending after a run makes the invocation `Partial`;
/// a run that stored nothing while chapters failed makes it `Failure`.
pub(crate) fn determine_exit_outcome(outcomes: &[RunOutcome]) -> ProcessExit {
    let mut fetched = 0;
    let mut failed = 0;
    for outcome in outcomes {
        fetched += outcome.fetched();
        if let RunOutcome::Partial { failed: count, .. } = outcome {
            failed += count;
        }
    }

    if failed == 0 {
        ProcessExit::Success
    } else if fetched > 0 {
        ProcessExit::Partial
    } else {
        ProcessExit::Failure
    }
}

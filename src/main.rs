//! CLI entry point for the novel downloader.

use std::process::ExitCode;

mod app;
mod app_config;
mod cli;
mod commands;

/// Process exit outcome of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// Everything requested finished.
    Success,
    /// Some chapters were stored and some remain pending.
    Partial,
    /// Nothing was stored, or the run could not proceed.
    Failure,
}

impl ProcessExit {
    fn exit_code(self) -> ExitCode {
        match self {
            Self::Success => ExitCode::SUCCESS,
            Self::Partial => ExitCode::from(1),
            Self::Failure => ExitCode::from(2),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match app::runtime::run_downloader().await {
        Ok(exit) => exit.exit_code(),
        Err(error) => {
            eprintln!("Error: {error:#}");
            ProcessExit::Failure.exit_code()
        }
    }
}

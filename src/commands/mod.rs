//! CLI command handlers.

mod add;
mod control;
mod run;
mod status;

pub use add::run_add_command;
pub use control::{run_pause_command, run_remove_command, run_resume_command};
pub use run::run_run_command;
pub use status::run_status_command;

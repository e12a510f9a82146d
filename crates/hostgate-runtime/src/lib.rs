//! Execution layer for hostgate.
//!
//! This crate runs the external automation: the streaming `ProcessRunner`
//! (shell subprocess, fan-in of stdout/stderr into one line sink, deadlines
//! and process-group termination), playbook selection for a host group,
//! the per-request inventory artifact, and the Ansible command lines.

pub mod automation;
pub mod deadline;
pub mod inventory;
pub mod recipe;
pub mod runner;

pub use automation::AutomationCommands;
pub use deadline::Deadline;
pub use inventory::{playbook_log_path, write_inventory};
pub use recipe::{select_recipe, RecipeError, RecipeSelection, RecipeWarning};
pub use runner::{LineSink, ProcessRunner, RunError, Stream};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to write {}: {source}", path.display())]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Recipe(#[from] RecipeError),
    #[error(transparent)]
    Run(#[from] RunError),
}

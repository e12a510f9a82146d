use crate::CoreError;
use std::fmt;

/// Steps of one registration, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Validating,
    Locking,
    SelectingRecipe,
    WritingArtifact,
    RenamingHost,
    ApplyingRecipe,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Validating => "validating",
            Stage::Locking => "locking",
            Stage::SelectingRecipe => "playbook selection",
            Stage::WritingArtifact => "inventory",
            Stage::RenamingHost => "hostname step",
            Stage::ApplyingRecipe => "playbook step",
            Stage::Done => "done",
        })
    }
}

/// Registration is strictly linear: each stage may only advance to the next.
pub fn validate_transition(from: Stage, to: Stage) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (Stage::Validating, Stage::Locking)
            | (Stage::Locking, Stage::SelectingRecipe)
            | (Stage::SelectingRecipe, Stage::WritingArtifact)
            | (Stage::WritingArtifact, Stage::RenamingHost)
            | (Stage::RenamingHost, Stage::ApplyingRecipe)
            | (Stage::ApplyingRecipe, Stage::Done)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition { from, to })
    }
}

/// Current stage of an in-flight registration.
#[derive(Debug)]
pub struct StageTracker {
    current: Stage,
}

impl Default for StageTracker {
    fn default() -> Self {
        Self {
            current: Stage::Validating,
        }
    }
}

impl StageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> Stage {
        self.current
    }

    pub fn advance(&mut self, to: Stage) -> Result<(), CoreError> {
        validate_transition(self.current, to)?;
        self.current = to;
        Ok(())
    }
}

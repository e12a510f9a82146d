//! Registration orchestrator for hostgate.
//!
//! This crate ties the schema, lock store, and runtime crates together into
//! the `Gateway`: validate a request, claim the hostname lock, pick the
//! playbook, write the inventory, then rename the host and apply the
//! playbook while every step and every line of output is written to a
//! `ProgressSink`. It also owns the stage state machine and the TOML
//! configuration the server is started with.

pub mod config;
pub mod gateway;
pub mod lifecycle;

pub use config::{
    AutomationSection, ConfigError, GatewayConfig, ServerSection, StoreBackend, StoreSection,
};
pub use gateway::{open_store, Gateway, ProgressSink, RegistrationReport, Unregistered};
pub use lifecycle::{validate_transition, Stage, StageTracker};

use hostgate_runtime::{RecipeError, RunError, RuntimeError};
use hostgate_schema::{OwnerToken, ValidationError};
use hostgate_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("already registered by \"{stored}\", incoming=\"{incoming}\"")]
    Conflict {
        stored: OwnerToken,
        incoming: OwnerToken,
    },
    #[error("mismatch: stored=\"{stored}\" incoming=\"{incoming}\"")]
    OwnerMismatch { stored: OwnerToken, incoming: String },
    #[error("not registered: {0}")]
    NotRegistered(String),
    #[error("playbook select error: {0}")]
    Recipe(#[from] RecipeError),
    #[error("lock store error: {0}")]
    Store(#[from] StoreError),
    #[error("{0}")]
    Execution(RunError),
    #[error("{0}")]
    Timeout(String),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("client disconnected: {0}")]
    Disconnected(#[source] std::io::Error),
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: Stage, to: Stage },
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Coarse classification of a [`CoreError`], used to pick a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Client,
    Conflict,
    NotFound,
    PreconditionFailed,
    Store,
    Execution,
    Timeout,
    Io,
    Disconnected,
    Internal,
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Invalid(_) => ErrorKind::Client,
            CoreError::Conflict { .. } => ErrorKind::Conflict,
            CoreError::OwnerMismatch { .. } => ErrorKind::PreconditionFailed,
            CoreError::NotRegistered(_) | CoreError::Recipe(RecipeError::NotFound { .. }) => {
                ErrorKind::NotFound
            }
            CoreError::Store(_) => ErrorKind::Store,
            CoreError::Execution(_) => ErrorKind::Execution,
            CoreError::Timeout(_) => ErrorKind::Timeout,
            CoreError::Runtime(_) => ErrorKind::Io,
            CoreError::Disconnected(_) => ErrorKind::Disconnected,
            CoreError::Recipe(RecipeError::Ambiguous { .. })
            | CoreError::InvalidTransition { .. }
            | CoreError::Config(_) => ErrorKind::Internal,
        }
    }
}

impl From<RunError> for CoreError {
    fn from(e: RunError) -> Self {
        match e {
            RunError::Timeout { .. } => CoreError::Timeout(e.to_string()),
            RunError::Disconnected(io) => CoreError::Disconnected(io),
            other => CoreError::Execution(other),
        }
    }
}

/// A registration that stopped before `Done`.
#[derive(Debug, Error)]
#[error("{stage} failed: {error}")]
pub struct Failure {
    pub stage: Stage,
    #[source]
    pub error: CoreError,
}

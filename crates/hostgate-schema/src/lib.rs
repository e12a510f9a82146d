//! Request model and validation rules for hostgate.
//!
//! This crate defines the schema layer: the registration and unregistration
//! request bodies, the structural validation applied to them, and the
//! identifiers derived from a valid request (`HostGroup`, `OwnerToken`,
//! `LockKey`) that the lock and provisioning layers key on.

pub mod request;
pub mod types;

pub use request::{
    validate_address, validate_hostname, validate_id, RegistrationRequest, UnregisterRequest,
};
pub use types::{HostGroup, LockKey, OwnerToken, LOCK_KEY_PREFIX, OWNER_FIELD};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing {0}")]
    Missing(String),
    #[error("invalid id: {0}")]
    InvalidId(String),
    #[error("invalid hostname: {0} (expected <name>-<name>...-NNN)")]
    InvalidHostname(String),
    #[error("invalid ip: {0}")]
    InvalidAddress(String),
    #[error("id and ip must be supplied together")]
    PartialOwner,
    #[error("invalid json: {0}")]
    Json(String),
}

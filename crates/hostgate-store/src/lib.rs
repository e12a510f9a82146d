//! Distributed hostname locks for hostgate.
//!
//! A lock is a single hash field in a key-value store: the key is
//! `LOCK__<hostname>`, the value is the owner token. Presence of the key is
//! the lock. `LockStore` exposes exactly two primitives, both of which must
//! be atomic in the backend: set-if-absent and conditional remove.
//! `LockManager` builds the register/verify/release protocol on top of them.
//!
//! Backends: `MemoryStore` for a single process (development and tests) and
//! `RedisStore` for a shared Redis instance.

pub mod lock;
pub mod memory;
pub mod redis_backend;

pub use lock::{Acquire, LockManager, Release};
pub use memory::MemoryStore;
pub use redis_backend::RedisStore;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("lock store unavailable: {0}")]
    Unavailable(String),
    #[error("unexpected reply from lock store: {0}")]
    Protocol(String),
    #[error("lock store state poisoned: {0}")]
    Poisoned(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.kind() == redis::ErrorKind::TypeError {
            StoreError::Protocol(e.to_string())
        } else {
            StoreError::Unavailable(e.to_string())
        }
    }
}

/// Result of a conditional remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    Missing,
    /// The field holds a different value; nothing was removed.
    Mismatch(String),
}

/// Atomic primitives a lock backend must provide.
///
/// Each call is a single round trip to the backend. Implementations must not
/// split either operation into a read followed by a write.
pub trait LockStore: Send + Sync {
    fn name(&self) -> &str;

    /// Store `value` under `key`/`field` unless the key already exists.
    ///
    /// Returns `None` when the value was stored, or the value already held.
    fn set_if_absent(&self, key: &str, field: &str, value: &str)
        -> Result<Option<String>, StoreError>;

    /// Delete `key` if `field` holds `expected`, or unconditionally when
    /// `expected` is `None`.
    fn remove(
        &self,
        key: &str,
        field: &str,
        expected: Option<&str>,
    ) -> Result<RemoveOutcome, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display_unavailable() {
        let e = StoreError::Unavailable("connection refused".to_owned());
        assert_eq!(e.to_string(), "lock store unavailable: connection refused");
    }

    #[test]
    fn redis_io_error_maps_to_unavailable() {
        let e: StoreError =
            redis::RedisError::from(std::io::Error::from(std::io::ErrorKind::ConnectionRefused))
                .into();
        assert!(matches!(e, StoreError::Unavailable(_)));
    }
}

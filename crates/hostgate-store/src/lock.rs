use crate::{LockStore, RemoveOutcome, StoreError};
use hostgate_schema::{LockKey, OwnerToken, OWNER_FIELD};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of [`LockManager::try_acquire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquire {
    Acquired,
    /// The hostname is already locked; carries the stored owner token.
    AlreadyHeld(OwnerToken),
}

/// Outcome of [`LockManager::release`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Release {
    Released,
    /// The stored owner differs from the expected one; the lock is untouched.
    Mismatch(OwnerToken),
    NotFound,
}

/// Register/verify/release protocol for hostname locks.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn LockStore>,
}

impl LockManager {
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self { store }
    }

    pub fn backend(&self) -> &str {
        self.store.name()
    }

    /// Claim `hostname` for `owner` with a single set-if-absent.
    pub fn try_acquire(&self, hostname: &str, owner: &OwnerToken) -> Result<Acquire, StoreError> {
        let key = LockKey::for_hostname(hostname);
        match self.store.set_if_absent(&key, OWNER_FIELD, owner)? {
            None => {
                info!("lock {key} acquired by {owner}");
                Ok(Acquire::Acquired)
            }
            Some(stored) => {
                debug!("lock {key} already held by {stored}");
                Ok(Acquire::AlreadyHeld(OwnerToken::new(stored)))
            }
        }
    }

    /// A second registration may proceed only when it comes from the owner
    /// already holding the lock.
    pub fn is_idempotent_retry(stored: &OwnerToken, owner: &OwnerToken) -> bool {
        stored == owner
    }

    /// Delete the lock for `hostname`. With `expected` set the delete only
    /// happens if the stored owner matches; with `None` it is unconditional.
    pub fn release(
        &self,
        hostname: &str,
        expected: Option<&OwnerToken>,
    ) -> Result<Release, StoreError> {
        let key = LockKey::for_hostname(hostname);
        if expected.is_none() {
            warn!("forced release of {key} without owner check");
        }
        let outcome = self
            .store
            .remove(&key, OWNER_FIELD, expected.map(OwnerToken::as_str))?;
        Ok(match outcome {
            RemoveOutcome::Removed => {
                info!("lock {key} released");
                Release::Released
            }
            RemoveOutcome::Missing => Release::NotFound,
            RemoveOutcome::Mismatch(stored) => Release::Mismatch(OwnerToken::new(stored)),
        })
    }
}

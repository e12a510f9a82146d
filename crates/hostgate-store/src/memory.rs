use crate::{LockStore, RemoveOutcome, StoreError};
use std::collections::HashMap;
use std::sync::Mutex;

/// In-process lock store. Every operation runs under one mutex, which gives
/// it the same atomicity as the Redis scripts within a single process.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a field directly. Only used for inspection; locking goes through
    /// [`LockStore`].
    pub fn get(&self, key: &str, field: &str) -> Option<String> {
        let entries = self.entries.lock().ok()?;
        entries.get(key).and_then(|h| h.get(field)).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LockStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn set_if_absent(
        &self,
        key: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<String>, StoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        let hash = entries.entry(key.to_owned()).or_default();
        if let Some(stored) = hash.get(field) {
            return Ok(Some(stored.clone()));
        }
        hash.insert(field.to_owned(), value.to_owned());
        Ok(None)
    }

    fn remove(
        &self,
        key: &str,
        field: &str,
        expected: Option<&str>,
    ) -> Result<RemoveOutcome, StoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        let Some(hash) = entries.get(key) else {
            return Ok(RemoveOutcome::Missing);
        };
        if let Some(expected) = expected {
            let stored = hash.get(field).cloned().unwrap_or_default();
            if stored != expected {
                return Ok(RemoveOutcome::Mismatch(stored));
            }
        }
        entries.remove(key);
        Ok(RemoveOutcome::Removed)
    }
}

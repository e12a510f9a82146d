use crate::{LockStore, RemoveOutcome, StoreError};
use std::time::Duration;
use tracing::debug;

/// `HSETNX`, and on failure the current owner, in one atomic step.
const ACQUIRE_SCRIPT: &str = r"
if redis.call('HSETNX', KEYS[1], ARGV[1], ARGV[2]) == 1 then
  return false
end
return redis.call('HGET', KEYS[1], ARGV[1]) or ''
";

/// Compare-and-delete. Reply is `{status, stored}`:
/// 0 = key missing, 1 = deleted, 2 = owner mismatch (nothing deleted).
const REMOVE_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return {0, ''}
end
local stored = redis.call('HGET', KEYS[1], ARGV[1]) or ''
if ARGV[3] == '1' and stored ~= ARGV[2] then
  return {2, stored}
end
redis.call('DEL', KEYS[1])
return {1, ''}
";

/// Lock store backed by a Redis server.
///
/// A fresh connection is opened per operation.
pub struct RedisStore {
    client: redis::Client,
    timeout: Option<Duration>,
    acquire: redis::Script,
    remove: redis::Script,
}

impl RedisStore {
    /// Build a store for `redis://[:password@]addr/db`. No connection is made
    /// until the first operation.
    pub fn open(
        addr: &str,
        password: Option<&str>,
        db: i64,
        timeout: Option<Duration>,
    ) -> Result<Self, StoreError> {
        let client = redis::Client::open(connection_url(addr, password, db))?;
        Ok(Self {
            client,
            timeout,
            acquire: redis::Script::new(ACQUIRE_SCRIPT),
            remove: redis::Script::new(REMOVE_SCRIPT),
        })
    }

    fn connection(&self) -> Result<redis::Connection, StoreError> {
        let con = match self.timeout {
            Some(t) => self.client.get_connection_with_timeout(t)?,
            None => self.client.get_connection()?,
        };
        con.set_read_timeout(self.timeout)?;
        con.set_write_timeout(self.timeout)?;
        Ok(con)
    }
}

fn connection_url(addr: &str, password: Option<&str>, db: i64) -> String {
    match password.filter(|p| !p.is_empty()) {
        Some(pw) => format!("redis://:{pw}@{addr}/{db}"),
        None => format!("redis://{addr}/{db}"),
    }
}

impl LockStore for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn set_if_absent(
        &self,
        key: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<String>, StoreError> {
        let mut con = self.connection()?;
        let held: Option<String> = self
            .acquire
            .key(key)
            .arg(field)
            .arg(value)
            .invoke(&mut con)?;
        debug!("redis set_if_absent {key}: held={held:?}");
        Ok(held)
    }

    fn remove(
        &self,
        key: &str,
        field: &str,
        expected: Option<&str>,
    ) -> Result<RemoveOutcome, StoreError> {
        let mut con = self.connection()?;
        let guarded = if expected.is_some() { "1" } else { "0" };
        let (status, stored): (i64, String) = self
            .remove
            .key(key)
            .arg(field)
            .arg(expected.unwrap_or_default())
            .arg(guarded)
            .invoke(&mut con)?;
        debug!("redis remove {key}: status={status}");
        match status {
            0 => Ok(RemoveOutcome::Missing),
            1 => Ok(RemoveOutcome::Removed),
            2 => Ok(RemoveOutcome::Mismatch(stored)),
            other => Err(StoreError::Protocol(format!(
                "remove script returned status {other}"
            ))),
        }
    }
}

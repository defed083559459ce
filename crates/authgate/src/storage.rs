//! Key-value storage with expiry.
//!
//! Transactions and the refresh record live behind [`KvStore`]. The engine
//! only relies on this contract, so any backend with per-key expiry works:
//! [`MemoryKvStore`] here, or the SQLite store in `authgate-store`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Error, Result};
use crate::time::{Clock, SystemClock};

/// Prefix of transaction records.
pub const TRANSACTION_PREFIX: &str = "transaction.";

/// Prefix of refresh records.
pub const REFRESH_PREFIX: &str = "refresh.";

/// Storage key of a transaction.
#[must_use]
pub fn transaction_key(state: &str) -> String {
    format!("{TRANSACTION_PREFIX}{state}")
}

/// Storage key of the refresh record of a client.
#[must_use]
pub fn refresh_key(client_id: &str) -> String {
    format!("{REFRESH_PREFIX}{client_id}")
}

/// Key-value store whose entries expire.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Stores `value` under `key` until `expires_at`.
    ///
    /// # Errors
    ///
    /// Returns an error if `expires_at` is not in the future or the backend
    /// fails.
    async fn set(&self, key: &str, value: Value, expires_at: DateTime<Utc>) -> Result<()>;

    /// Returns the live value under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Removes `key`; removing an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Removes every key starting with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn clear_all(&self, prefix: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: DateTime<Utc>,
}

/// In-process [`KvStore`].
pub struct MemoryKvStore {
    entries: RwLock<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryKvStore").finish_non_exhaustive()
    }
}

impl MemoryKvStore {
    /// Creates an empty store on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty store that reads expiry against `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .read()
            .await
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    /// Returns true if no live entries remain.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn set(&self, key: &str, value: Value, expires_at: DateTime<Utc>) -> Result<()> {
        if expires_at <= self.clock.now() {
            return Err(Error::Storage(format!(
                "cannot store {key} with an expiry in the past ({expires_at})"
            )));
        }
        debug!("Storing {key} until {expires_at}");
        self.entries
            .write()
            .await
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Ok(Some(entry.value.clone())),
            Some(_) => {
                debug!("Dropping expired {key}");
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn clear_all(&self, prefix: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }
}

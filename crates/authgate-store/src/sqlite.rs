//! `SQLite` key-value repository.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use authgate::KvStore;
use authgate::time::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use crate::{Error, Result};

/// File name of the database under the platform data directory.
pub const DATABASE_FILE: &str = "authgate.db";

/// Durable [`KvStore`] on a `SQLite` database.
///
/// Expired rows are dropped lazily when read; [`Self::purge_expired`] sweeps
/// the rest.
pub struct SqliteKvStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SqliteKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteKvStore").finish_non_exhaustive()
    }
}

impl SqliteKvStore {
    /// Create a new store with the given database path.
    ///
    /// Creates the database and table if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn new(database_path: &str) -> Result<Self> {
        let url = format!("sqlite:{database_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let store = Self {
            pool,
            clock: Arc::new(SystemClock),
        };
        store.initialize().await?;
        Ok(store)
    }

    /// Create an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = Self {
            pool,
            clock: Arc::new(SystemClock),
        };
        store.initialize().await?;
        Ok(store)
    }

    /// Open the store at [`Self::default_path`], creating the directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory is unknown or cannot be
    /// created, or if the database cannot be opened.
    pub async fn open_default() -> Result<Self> {
        let path = Self::default_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let path = path
            .to_str()
            .ok_or_else(|| Error::Config(format!("non UTF-8 path {}", path.display())))?;
        info!("Opening session store at {path}");
        Self::new(path).await
    }

    /// `<data dir>/authgate/authgate.db`.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform has no data directory.
    pub fn default_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| Error::Config("no platform data directory".to_string()))?;
        Ok(data_dir.join("authgate").join(DATABASE_FILE))
    }

    /// Reads expiry against `clock` instead of the system clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Initialize database schema.
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS kv_entries (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_kv_entries_expires ON kv_entries(expires_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    async fn put(&self, key: &str, value: &Value, expires_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO kv_entries (key, value, expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at
            ",
        )
        .bind(key)
        .bind(serde_json::to_string(value)?)
        .bind(expires_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch(&self, key: &str) -> Result<Option<Value>> {
        let row = sqlx::query("SELECT value, expires_at FROM kv_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let expires_at: i64 = row.try_get("expires_at")?;
        if expires_at <= self.now_millis() {
            debug!("Dropping expired {key}");
            self.remove(key).await?;
            return Ok(None);
        }
        let value: String = row.try_get("value")?;
        Ok(Some(serde_json::from_str(&value)?))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<u64> {
        // substr instead of LIKE: prefixes may contain '%' or '_'
        let result = sqlx::query("DELETE FROM kv_entries WHERE substr(key, 1, length(?)) = ?")
            .bind(prefix)
            .bind(prefix)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete every expired row; returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM kv_entries WHERE expires_at <= ?")
            .bind(self.now_millis())
            .execute(&self.pool)
            .await?;
        let purged = result.rows_affected();
        if purged > 0 {
            info!("Purged {purged} expired entries");
        }
        Ok(purged)
    }

    /// Number of live rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn len(&self) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM kv_entries WHERE expires_at > ?")
            .bind(self.now_millis())
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("count")?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Returns true if no live rows remain.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn set(&self, key: &str, value: Value, expires_at: DateTime<Utc>) -> authgate::Result<()> {
        if expires_at <= self.clock.now() {
            return Err(authgate::Error::Storage(format!(
                "cannot store {key} with an expiry in the past ({expires_at})"
            )));
        }
        debug!("Storing {key} until {expires_at}");
        Ok(self.put(key, &value, expires_at).await?)
    }

    async fn get(&self, key: &str) -> authgate::Result<Option<Value>> {
        Ok(self.fetch(key).await?)
    }

    async fn delete(&self, key: &str) -> authgate::Result<()> {
        Ok(self.remove(key).await?)
    }

    async fn clear_all(&self, prefix: &str) -> authgate::Result<()> {
        let removed = self.remove_prefix(prefix).await?;
        debug!("Cleared {removed} entries under {prefix}");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use authgate::random::SystemRandom;
    use authgate::storage::{TRANSACTION_PREFIX, refresh_key};
    use authgate::time::MockClock;
    use authgate::{RefreshStore, Sign, TransactionStore};
    use chrono::Duration;
    use serde_json::json;

    async fn store() -> (Arc<MockClock>, SqliteKvStore) {
        let clock = MockClock::shared();
        let store = SqliteKvStore::in_memory()
            .await
            .unwrap()
            .with_clock(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let (clock, store) = store().await;
        let expires = clock.now() + Duration::hours(1);

        store.set("a", json!({"x": 1}), expires).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(json!({"x": 1})));

        store.set("a", json!("replaced"), expires).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(json!("replaced")));

        store.delete("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
        store.delete("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_entries_expire_lazily() {
        let (clock, store) = store().await;
        store
            .set("a", json!(1), clock.now() + Duration::seconds(10))
            .await
            .unwrap();
        assert_eq!(store.len().await.unwrap(), 1);

        clock.advance(Duration::seconds(10));
        assert_eq!(store.get("a").await.unwrap(), None);
        assert!(store.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_past_expiry() {
        let (clock, store) = store().await;
        let err = store
            .set("a", json!(1), clock.now() - Duration::seconds(1))
            .await
            .unwrap_err();
        assert!(matches!(err, authgate::Error::Storage(_)));
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (clock, store) = store().await;
        let now = clock.now();
        store.set("short", json!(1), now + Duration::seconds(5)).await.unwrap();
        store.set("long", json!(2), now + Duration::hours(5)).await.unwrap();

        assert_eq!(store.purge_expired().await.unwrap(), 0);
        clock.advance(Duration::minutes(1));
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.get("long").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_clear_all_matches_prefix_literally() {
        let (clock, store) = store().await;
        let expires = clock.now() + Duration::hours(1);
        for key in ["transaction.a", "transaction.b", "transactionXc", "refresh_token.id"] {
            store.set(key, json!(key), expires).await.unwrap();
        }

        store.clear_all(TRANSACTION_PREFIX).await.unwrap();
        assert_eq!(store.get("transaction.a").await.unwrap(), None);
        assert_eq!(store.get("transaction.b").await.unwrap(), None);
        assert!(store.get("transactionXc").await.unwrap().is_some());
        assert!(store.get("refresh_token.id").await.unwrap().is_some());

        store.set("50%_off", json!(1), expires).await.unwrap();
        store.set("50xyoff", json!(2), expires).await.unwrap();
        store.clear_all("50%_").await.unwrap();
        assert_eq!(store.get("50%_off").await.unwrap(), None);
        assert!(store.get("50xyoff").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_transactions_round_trip() {
        let (clock, store) = store().await;
        let kv: Arc<dyn KvStore> = Arc::new(store);
        let transactions =
            TransactionStore::new(kv.clone(), Arc::new(SystemRandom::default()), clock.clone());

        let created = transactions
            .create(Sign::Signin, "openid email profile", Some("fr"), None)
            .await
            .unwrap();
        let loaded = transactions.get(created.state()).await.unwrap().unwrap();
        assert_eq!(loaded, created);

        clock.advance(Duration::hours(25));
        assert!(transactions.get(created.state()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refresh_record_round_trip() {
        let (clock, store) = store().await;
        let now = clock.now();
        let record = RefreshStore {
            refresh_token: "acme.rt".into(),
            access_token_expiration_date: now.timestamp_millis() + 3_600_000,
            refresh_expiration_date: now.timestamp_millis() + 86_400_000,
            refresh_leeway: Some(30),
            refresh_retry: None,
        };

        record.save(&store, "client", now).await.unwrap();
        assert!(store.get(&refresh_key("client")).await.unwrap().is_some());
        assert_eq!(RefreshStore::load(&store, "client").await.unwrap(), Some(record));

        RefreshStore::clear(&store, "client").await.unwrap();
        assert_eq!(RefreshStore::load(&store, "client").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let path = std::env::temp_dir().join(format!("authgate-store-{}.db", std::process::id()));
        let path = path.to_str().unwrap().to_string();
        let expires = Utc::now() + Duration::hours(1);

        {
            let store = SqliteKvStore::new(&path).await.unwrap();
            store.set("k", json!({"kept": true}), expires).await.unwrap();
            store.pool.close().await;
        }

        let store = SqliteKvStore::new(&path).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!({"kept": true})));
        store.pool.close().await;
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_default_path_ends_with_database_file() {
        if let Ok(path) = SqliteKvStore::default_path() {
            assert!(path.ends_with(format!("authgate/{DATABASE_FILE}")));
        }
    }
}

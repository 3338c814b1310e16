//! Relational store on SQLite via `sqlx`.

use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::error::CacheError;
use crate::store::Store;
use crate::utils::now_secs;

/// Configuration for SqliteStore.
#[derive(Debug, Clone)]
pub struct SqliteStoreConfig {
    /// Connection URL, e.g. `sqlite://cache.db?mode=rwc` or `sqlite::memory:`.
    pub url: String,

    /// Table holding the entries. Letters, digits and `_` only.
    pub table: String,

    /// Pool size. In-memory databases are per connection, so keep this at 1
    /// for `sqlite::memory:`.
    pub max_connections: u32,

    /// Create the table and its expiry index on connect.
    pub auto_create: bool,
}

impl Default for SqliteStoreConfig {
    fn default() -> Self {
        SqliteStoreConfig {
            url: "sqlite::memory:".to_string(),
            table: "easycache".to_string(),
            max_connections: 1,
            auto_create: true,
        }
    }
}

/// SQLite-backed cache store.
///
/// Rows are `(k, payload, expires_at)` with `expires_at == 0` meaning never.
/// Expired rows are hidden and deleted on read, and `prune` deletes them in
/// bulk.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    table: String,
}

impl SqliteStore {
    /// Connect and, if configured, create the table.
    pub async fn new(config: SqliteStoreConfig) -> Result<Self, CacheError> {
        let valid_table = !config.table.is_empty()
            && config
                .table
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_');
        if !valid_table {
            return Err(CacheError::Config(format!(
                "illegal table name '{}'",
                config.table
            )));
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect(&config.url)
            .await
            .map_err(|e| {
                CacheError::operation(
                    "sqlite",
                    "",
                    format!("Failed to connect to SQLite database: {}", e),
                )
            })?;

        let store = SqliteStore {
            pool,
            table: config.table,
        };
        if config.auto_create {
            store.ensure_table().await?;
        }
        Ok(store)
    }

    /// Create the cache table and its expiry index if missing.
    pub async fn ensure_table(&self) -> Result<(), CacheError> {
        let create = format!(
            "CREATE TABLE IF NOT EXISTS {} (k TEXT PRIMARY KEY NOT NULL, payload BLOB NOT NULL, expires_at INTEGER NOT NULL)",
            self.table
        );
        let index = format!(
            "CREATE INDEX IF NOT EXISTS idx_{0}_expires ON {0}(expires_at)",
            self.table
        );

        for sql in [create, index] {
            sqlx::query(&sql)
                .execute(&self.pool)
                .await
                .map_err(|e| self.error("", "CREATE", e))?;
        }
        Ok(())
    }

    fn error(&self, key: &str, action: &str, e: sqlx::Error) -> CacheError {
        CacheError::operation("sqlite", key, format!("{} failed: {}", action, e))
    }
}

#[async_trait]
impl Store for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let row = sqlx::query(&format!(
            "SELECT payload, expires_at FROM {} WHERE k = ?1",
            self.table
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| self.error(key, "SELECT", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let expires_at: i64 = row
            .try_get("expires_at")
            .map_err(|e| self.error(key, "SELECT", e))?;
        let now = now_secs() as i64;
        if expires_at > 0 && expires_at < now {
            // Conditional so a row rewritten since the SELECT survives.
            sqlx::query(&format!(
                "DELETE FROM {} WHERE k = ?1 AND expires_at > 0 AND expires_at < ?2",
                self.table
            ))
            .bind(key)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| self.error(key, "DELETE", e))?;
            return Ok(None);
        }

        let payload: Vec<u8> = row
            .try_get("payload")
            .map_err(|e| self.error(key, "SELECT", e))?;
        Ok(Some(payload))
    }

    async fn set(&self, key: &str, payload: &[u8], ttl: u64) -> Result<(), CacheError> {
        let expires_at = if ttl == 0 {
            0
        } else {
            i64::try_from(now_secs().saturating_add(ttl)).unwrap_or(i64::MAX)
        };

        sqlx::query(&format!(
            "INSERT INTO {} (k, payload, expires_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(k) DO UPDATE SET payload = excluded.payload, expires_at = excluded.expires_at",
            self.table
        ))
        .bind(key)
        .bind(payload)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| self.error(key, "UPSERT", e))?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        sqlx::query(&format!("DELETE FROM {} WHERE k = ?1", self.table))
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| self.error(key, "DELETE", e))?;
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool, CacheError> {
        let row = sqlx::query(&format!(
            "SELECT 1 FROM {} WHERE k = ?1 AND (expires_at = 0 OR expires_at >= ?2)",
            self.table
        ))
        .bind(key)
        .bind(now_secs() as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| self.error(key, "SELECT", e))?;
        Ok(row.is_some())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        sqlx::query(&format!("DELETE FROM {}", self.table))
            .execute(&self.pool)
            .await
            .map_err(|e| self.error("*", "DELETE", e))?;
        Ok(())
    }

    async fn prune(&self) -> Result<u64, CacheError> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE expires_at > 0 AND expires_at < ?1",
            self.table
        ))
        .bind(now_secs() as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| self.error("*", "DELETE", e))?;
        Ok(result.rows_affected())
    }
}

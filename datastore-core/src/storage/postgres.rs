//! PostgresStorage - Durable Storage
//!
//! TigerStyle: Pooled connections, lazy idempotent schema, JSONB values.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     PostgresStorage                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Pool: sqlx::PgPool (lazy, bounded, acquire timeout)         │
//! │  Table: datastore_values (id, key, value, timestamps)        │
//! │  Schema: created on first use, guarded by a OnceCell         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS datastore_values (
//!     id SERIAL PRIMARY KEY,
//!     key VARCHAR(255) UNIQUE NOT NULL,
//!     value JSONB NOT NULL,
//!     created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
//!     updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
//! );
//! CREATE INDEX IF NOT EXISTS idx_datastore_key ON datastore_values(key);
//! ```

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use tokio::sync::OnceCell;

use super::backend::{validate_key, DataStore};
use super::config::{PostgresConfig, StorageKey};
use super::error::{ConfigResult, StorageError, StorageResult};
use crate::constants::{POOL_ACQUIRE_TIMEOUT_MS, POOL_IDLE_TIMEOUT_MS};

const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS datastore_values (
        id SERIAL PRIMARY KEY,
        key VARCHAR(255) UNIQUE NOT NULL,
        value JSONB NOT NULL,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )
"#;

const CREATE_INDEX_SQL: &str =
    "CREATE INDEX IF NOT EXISTS idx_datastore_key ON datastore_values(key)";

const UPSERT_SQL: &str = r#"
    INSERT INTO datastore_values (key, value, updated_at)
    VALUES ($1, $2, CURRENT_TIMESTAMP)
    ON CONFLICT (key)
    DO UPDATE SET value = EXCLUDED.value, updated_at = CURRENT_TIMESTAMP
"#;

// =============================================================================
// PostgresStorage
// =============================================================================

/// PostgreSQL storage backend.
///
/// Each operation leases one pooled connection for one statement. The pool
/// returns the connection when the lease is dropped, so it is released on
/// every exit path, including errors.
pub struct PostgresStorage {
    pool: PgPool,
    identity: StorageKey,
    schema: OnceCell<()>,
}

impl PostgresStorage {
    /// Build a backend from connection parameters.
    ///
    /// No connection is opened here; the pool connects on first use. Must be
    /// called from within a Tokio runtime.
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` if the configuration fails validation.
    pub fn new(config: &PostgresConfig) -> ConfigResult<Self> {
        config.validate()?;

        let ssl_mode = if config.ssl {
            PgSslMode::Require
        } else {
            PgSslMode::Disable
        };

        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password)
            .ssl_mode(ssl_mode);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_millis(POOL_ACQUIRE_TIMEOUT_MS))
            .idle_timeout(Duration::from_millis(POOL_IDLE_TIMEOUT_MS))
            .connect_lazy_with(options);

        tracing::info!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            user = %config.user,
            max_connections = config.max_connections,
            "created postgres pool"
        );

        Ok(Self::from_pool(pool, config.identity()))
    }

    /// Wrap an existing pool.
    ///
    /// The schema is still created lazily on first use.
    #[must_use]
    pub fn from_pool(pool: PgPool, identity: StorageKey) -> Self {
        Self {
            pool,
            identity,
            schema: OnceCell::new(),
        }
    }

    /// Get the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Identity key this instance was created for.
    #[must_use]
    pub fn identity(&self) -> &StorageKey {
        &self.identity
    }

    /// Close all connections in the pool.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::debug!(identity = %self.identity, "closed postgres pool");
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Whether the schema has been created by this instance.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.schema.initialized()
    }

    /// Create the table and index if missing, once per instance.
    ///
    /// Both statements run on one leased connection. Concurrent first use is
    /// serialized by the cell; the statements are idempotent regardless. A
    /// failure leaves the cell empty so the next operation retries.
    async fn ensure_schema(&self) -> StorageResult<()> {
        self.schema
            .get_or_try_init(|| async {
                let mut conn = self.pool.acquire().await.map_err(|e| {
                    StorageError::from_sqlx(
                        "failed to acquire connection",
                        e,
                        StorageError::Internal,
                    )
                })?;

                sqlx::query(CREATE_TABLE_SQL)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| {
                        StorageError::from_sqlx("failed to create table", e, StorageError::Internal)
                    })?;

                sqlx::query(CREATE_INDEX_SQL)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| {
                        StorageError::from_sqlx("failed to create index", e, StorageError::Internal)
                    })?;

                tracing::debug!(identity = %self.identity, "datastore schema ready");
                Ok::<(), StorageError>(())
            })
            .await?;

        Ok(())
    }

    /// Count all rows in the table.
    ///
    /// # Errors
    /// Returns `StorageError` if the medium is unreachable.
    pub async fn count(&self) -> StorageResult<usize> {
        self.ensure_schema().await?;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM datastore_values")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::from_sqlx("failed to count values", e, StorageError::Read))?;

        // Postcondition
        assert!(count >= 0, "count cannot be negative");

        Ok(usize::try_from(count).unwrap_or(usize::MAX))
    }

    /// When `key` was last written, `None` if absent.
    ///
    /// # Errors
    /// Returns `StorageError` if the medium is unreachable.
    pub async fn updated_at(&self, key: &str) -> StorageResult<Option<NaiveDateTime>> {
        validate_key(key)?;
        self.ensure_schema().await?;

        sqlx::query_scalar::<_, Option<NaiveDateTime>>(
            "SELECT updated_at FROM datastore_values WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map(Option::flatten)
        .map_err(|e| StorageError::from_sqlx("failed to read timestamp", e, StorageError::Read))
    }
}

impl fmt::Debug for PostgresStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresStorage")
            .field("identity", &self.identity)
            .field("initialized", &self.is_initialized())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// DataStore Implementation
// =============================================================================

#[async_trait]
impl DataStore for PostgresStorage {
    /// Upsert: insert, or overwrite value and refresh `updated_at`.
    async fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        validate_key(key)?;
        self.ensure_schema().await?;

        sqlx::query(UPSERT_SQL)
            .bind(key)
            .bind(&value)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::from_sqlx("failed to set value", e, StorageError::Write))?;

        Ok(())
    }

    /// The JSONB column is decoded exactly once, straight into a `Value`.
    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        validate_key(key)?;
        self.ensure_schema().await?;

        sqlx::query_scalar::<_, Value>("SELECT value FROM datastore_values WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::from_sqlx("failed to get value", e, StorageError::Read))
    }

    async fn has(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        self.ensure_schema().await?;

        let row = sqlx::query("SELECT 1 FROM datastore_values WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::from_sqlx("failed to probe key", e, StorageError::Read))?;

        Ok(row.is_some())
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        self.ensure_schema().await?;

        let result = sqlx::query("DELETE FROM datastore_values WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                StorageError::from_sqlx("failed to delete value", e, StorageError::Write)
            })?;

        // Postcondition: key is unique
        assert!(result.rows_affected() <= 1, "key must match at most one row");

        Ok(result.rows_affected() > 0)
    }

    async fn clear(&self) -> StorageResult<()> {
        self.ensure_schema().await?;

        sqlx::query("DELETE FROM datastore_values")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                StorageError::from_sqlx("failed to clear values", e, StorageError::Write)
            })?;

        Ok(())
    }
}

// =============================================================================
// Tests (live tests require a running Postgres)
// =============================================================================

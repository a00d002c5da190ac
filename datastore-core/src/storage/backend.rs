//! The storage contract and the closed set of backends implementing it.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::config::BackendKind;
use super::error::{StorageError, StorageResult};
use super::memory::MemoryStorage;
use super::postgres::PostgresStorage;
use crate::constants::KEY_CHARS_MAX;

// =============================================================================
// DataStore Trait
// =============================================================================

/// Single-value-per-key storage with exact, case-sensitive key matching.
///
/// Every backend has the same observable semantics:
/// - `has(k)` is true iff `get(k)` returns `Some`
/// - a missing key is `None`/`false`, never an error
/// - `delete` reports whether a row was actually removed
/// - `clear` on an empty store is a no-op
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Store or overwrite the value for `key`.
    async fn set(&self, key: &str, value: Value) -> StorageResult<()>;

    /// Get the value for `key`, `None` if absent.
    async fn get(&self, key: &str) -> StorageResult<Option<Value>>;

    /// Whether `key` currently has a value.
    async fn has(&self, key: &str) -> StorageResult<bool>;

    /// Remove `key`, returning whether an entry was removed.
    async fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Remove all entries.
    async fn clear(&self) -> StorageResult<()>;
}

/// Typed helpers over any [`DataStore`].
#[async_trait]
pub trait DataStoreExt: DataStore {
    /// Serialize `value` to JSON and store it.
    ///
    /// # Errors
    /// `StorageError::Serialization` if `value` has no JSON representation.
    async fn set_as<T>(&self, key: &str, value: &T) -> StorageResult<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let value = serde_json::to_value(value)?;
        self.set(key, value).await
    }

    /// Get the value for `key` decoded into `T`.
    ///
    /// # Errors
    /// `StorageError::Serialization` if the stored JSON does not fit `T`.
    async fn get_as<T>(&self, key: &str) -> StorageResult<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }
}

impl<S: DataStore + ?Sized> DataStoreExt for S {}

/// Reject keys no backend can store.
///
/// Both backends apply the same rule so that a key accepted by one is
/// accepted by the other.
///
/// # Errors
/// `StorageError::InvalidKey` for an empty key or one longer than
/// [`KEY_CHARS_MAX`] characters.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::invalid_key("key cannot be empty"));
    }
    let chars = key.chars().count();
    if chars > KEY_CHARS_MAX {
        return Err(StorageError::invalid_key(format!(
            "key has {chars} characters, max is {KEY_CHARS_MAX}"
        )));
    }
    Ok(())
}

// =============================================================================
// Backend
// =============================================================================

/// A live backend instance, dispatched by kind.
#[derive(Debug)]
pub enum Backend {
    /// In-process map
    Memory(MemoryStorage),
    /// Pooled PostgreSQL table
    Postgres(PostgresStorage),
}

impl Backend {
    /// Which kind of backend this is.
    #[must_use]
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Memory(_) => BackendKind::Memory,
            Self::Postgres(_) => BackendKind::Postgres,
        }
    }

    /// Release held resources. The memory backend holds none.
    ///
    /// Operations after `close` fail; callers must discard the instance.
    pub async fn close(&self) {
        match self {
            Self::Memory(_) => {}
            Self::Postgres(pg) => pg.close().await,
        }
    }

    /// The memory backend, if this is one.
    #[must_use]
    pub fn as_memory(&self) -> Option<&MemoryStorage> {
        match self {
            Self::Memory(m) => Some(m),
            Self::Postgres(_) => None,
        }
    }

    /// The relational backend, if this is one.
    #[must_use]
    pub fn as_postgres(&self) -> Option<&PostgresStorage> {
        match self {
            Self::Memory(_) => None,
            Self::Postgres(pg) => Some(pg),
        }
    }
}

#[async_trait]
impl DataStore for Backend {
    async fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        match self {
            Self::Memory(m) => m.set(key, value).await,
            Self::Postgres(pg) => pg.set(key, value).await,
        }
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        match self {
            Self::Memory(m) => m.get(key).await,
            Self::Postgres(pg) => pg.get(key).await,
        }
    }

    async fn has(&self, key: &str) -> StorageResult<bool> {
        match self {
            Self::Memory(m) => m.has(key).await,
            Self::Postgres(pg) => pg.has(key).await,
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        match self {
            Self::Memory(m) => m.delete(key).await,
            Self::Postgres(pg) => pg.delete(key).await,
        }
    }

    async fn clear(&self) -> StorageResult<()> {
        match self {
            Self::Memory(m) => m.clear().await,
            Self::Postgres(pg) => pg.clear().await,
        }
    }
}

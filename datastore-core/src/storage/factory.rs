//! StorageFactory - Backend Registry
//!
//! TigerStyle: One live instance per identity key, explicit teardown.
//!
//! Relational connections are expensive; callers resolving a backend once
//! per record must reuse the same pool. Instances are keyed by endpoint and
//! user, so configurations that differ only in password, SSL or pool size
//! still share one instance.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::backend::Backend;
use super::config::{BackendKind, PostgresConfig, StorageKey};
use super::error::{ConfigError, ConfigResult};
use super::memory::MemoryStorage;
use super::postgres::PostgresStorage;

/// Registry of live backend instances.
///
/// Owned by whoever drives the storage (there is no global instance). Must
/// be used from within a Tokio runtime since relational backends spawn pool
/// maintenance tasks.
#[derive(Debug, Default)]
pub struct StorageFactory {
    instances: Mutex<HashMap<StorageKey, Arc<Backend>>>,
}

impl StorageFactory {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn instances(&self) -> MutexGuard<'_, HashMap<StorageKey, Arc<Backend>>> {
        self.instances.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve a backend, reusing the cached instance for its identity.
    ///
    /// The lookup and insert happen under one lock, so concurrent callers
    /// never build two pools for the same identity.
    ///
    /// # Errors
    /// - `ConfigError::MissingPostgresConfig` for the relational kind without
    ///   a config
    /// - `ConfigError::Invalid` if the config fails validation
    pub fn create_storage(
        &self,
        kind: BackendKind,
        config: Option<&PostgresConfig>,
    ) -> ConfigResult<Arc<Backend>> {
        let key = match kind {
            BackendKind::Memory => StorageKey::Memory,
            BackendKind::Postgres => config
                .ok_or(ConfigError::MissingPostgresConfig)?
                .identity(),
        };

        let mut instances = self.instances();
        if let Some(existing) = instances.get(&key) {
            tracing::debug!(identity = %key, "reusing storage backend");
            return Ok(Arc::clone(existing));
        }

        let backend = match (kind, config) {
            (BackendKind::Memory, _) => Backend::Memory(MemoryStorage::new()),
            (BackendKind::Postgres, Some(config)) => {
                Backend::Postgres(PostgresStorage::new(config)?)
            }
            (BackendKind::Postgres, None) => return Err(ConfigError::MissingPostgresConfig),
        };

        let backend = Arc::new(backend);
        instances.insert(key.clone(), Arc::clone(&backend));

        // Postcondition
        assert!(instances.contains_key(&key), "new backend must be cached");

        tracing::debug!(identity = %key, "created storage backend");
        Ok(backend)
    }

    /// Resolve a backend from its selector name (`memory`, `postgresql`).
    ///
    /// # Errors
    /// `ConfigError::UnknownBackend` for an unrecognised name, otherwise as
    /// [`create_storage`](Self::create_storage).
    pub fn create_storage_named(
        &self,
        kind: &str,
        config: Option<&PostgresConfig>,
    ) -> ConfigResult<Arc<Backend>> {
        self.create_storage(kind.parse()?, config)
    }

    /// Shut down every cached instance and empty the cache.
    ///
    /// Instances without resources to release (memory) are simply dropped
    /// from the cache. Later calls to `create_storage` build fresh instances.
    pub async fn close_all(&self) {
        let drained: Vec<(StorageKey, Arc<Backend>)> = self.instances().drain().collect();

        tracing::info!(count = drained.len(), "closing storage backends");

        for (key, backend) in drained {
            backend.close().await;
            tracing::debug!(identity = %key, kind = %backend.kind(), "closed storage backend");
        }
    }

    /// Number of cached instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances().len()
    }

    /// Whether no instance is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances().is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DataStore;
    use serde_json::json;

    fn pg_config(database: &str, password: &str) -> PostgresConfig {
        // Port 1: nothing listens, and nothing here connects.
        PostgresConfig::new(database, "test_user", password).with_port(1)
    }

    #[tokio::test]
    async fn test_memory_is_singleton() {
        let factory = StorageFactory::new();
        let a = factory.create_storage(BackendKind::Memory, None).unwrap();
        let b = factory.create_storage(BackendKind::Memory, None).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.kind(), BackendKind::Memory);
        assert_eq!(factory.len(), 1);

        // Shared entries
        a.set("k", json!("v")).await.unwrap();
        assert_eq!(b.get("k").await.unwrap(), Some(json!("v")));
    }

    #[tokio::test]
    async fn test_memory_ignores_config() {
        let factory = StorageFactory::new();
        let config = pg_config("test_db", "pw");
        let a = factory.create_storage(BackendKind::Memory, Some(&config)).unwrap();
        let b = factory.create_storage(BackendKind::Memory, None).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_postgres_same_identity_shares_instance() {
        let factory = StorageFactory::new();
        let a = factory
            .create_storage(BackendKind::Postgres, Some(&pg_config("test_db", "one")))
            .unwrap();
        let b = factory
            .create_storage(
                BackendKind::Postgres,
                Some(&pg_config("test_db", "two").with_max_connections(2)),
            )
            .unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.kind(), BackendKind::Postgres);
        assert_eq!(factory.len(), 1);

        factory.close_all().await;
    }

    #[tokio::test]
    async fn test_postgres_distinct_database_distinct_instance() {
        let factory = StorageFactory::new();
        let a = factory
            .create_storage(BackendKind::Postgres, Some(&pg_config("test_db1", "pw")))
            .unwrap();
        let b = factory
            .create_storage(BackendKind::Postgres, Some(&pg_config("test_db2", "pw")))
            .unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(factory.len(), 2);

        factory.close_all().await;
    }

    #[tokio::test]
    async fn test_postgres_requires_config() {
        let factory = StorageFactory::new();
        let err = factory.create_storage(BackendKind::Postgres, None).unwrap_err();
        assert_eq!(err, ConfigError::MissingPostgresConfig);
        assert!(factory.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_is_not_cached() {
        let factory = StorageFactory::new();
        let config = pg_config("", "pw");
        let err = factory
            .create_storage(BackendKind::Postgres, Some(&config))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "database", .. }));
        assert!(factory.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_backend() {
        let factory = StorageFactory::new();
        let err = factory.create_storage_named("bogus", None).unwrap_err();
        assert_eq!(err, ConfigError::UnknownBackend("bogus".to_string()));

        let err = factory.create_storage_named("postgresql", None).unwrap_err();
        assert_eq!(err, ConfigError::MissingPostgresConfig);

        assert!(factory.create_storage_named("memory", None).is_ok());
    }

    #[tokio::test]
    async fn test_close_all() {
        let factory = StorageFactory::new();
        let memory = factory.create_storage(BackendKind::Memory, None).unwrap();
        let pg = factory
            .create_storage(BackendKind::Postgres, Some(&pg_config("test_db", "pw")))
            .unwrap();

        memory.set("k", json!(1)).await.unwrap();

        factory.close_all().await;

        assert!(factory.is_empty());
        assert!(pg.as_postgres().unwrap().is_closed());

        // Fresh memory backend after the sweep
        let fresh = factory.create_storage(BackendKind::Memory, None).unwrap();
        assert!(!Arc::ptr_eq(&memory, &fresh));
        assert!(!fresh.has("k").await.unwrap());

        // Fresh pool after the sweep
        let pg_fresh = factory
            .create_storage(BackendKind::Postgres, Some(&pg_config("test_db", "pw")))
            .unwrap();
        assert!(!Arc::ptr_eq(&pg, &pg_fresh));
        assert!(!pg_fresh.as_postgres().unwrap().is_closed());

        factory.close_all().await;
    }

    #[tokio::test]
    async fn test_close_all_on_empty_factory() {
        let factory = StorageFactory::new();
        factory.close_all().await;
        assert!(factory.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_create_builds_one_instance() {
        let factory = Arc::new(StorageFactory::new());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let factory = Arc::clone(&factory);
            handles.push(tokio::spawn(async move {
                factory
                    .create_storage(BackendKind::Postgres, Some(&pg_config("test_db", "pw")))
                    .unwrap()
            }));
        }

        let mut backends = Vec::new();
        for handle in handles {
            backends.push(handle.await.unwrap());
        }

        assert_eq!(factory.len(), 1);
        assert!(backends.iter().all(|b| Arc::ptr_eq(b, &backends[0])));

        factory.close_all().await;
    }
}

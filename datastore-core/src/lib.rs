//! Datastore Core - Pluggable Key-Value Storage
//!
//! TigerStyle: one storage contract, interchangeable backends, explicit limits.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              StorageFactory                  │
//! │   identity key → Arc<Backend> (cached)       │
//! ├─────────────────────────────────────────────┤
//! │  DataStore trait   │ set/get/has/delete/clear│
//! ├──────────────────────┬──────────────────────┤
//! │  MemoryStorage       │  PostgresStorage     │
//! │  (process lifetime)  │  (PgPool, JSONB)     │
//! └──────────────────────┴──────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use datastore_core::{BackendKind, DataStore, StorageFactory};
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let factory = StorageFactory::new();
//! let store = factory.create_storage(BackendKind::Memory, None)?;
//!
//! store.set("user:1", json!({"name": "a", "age": 3})).await?;
//! assert_eq!(store.get("user:1").await?, Some(json!({"name": "a", "age": 3})));
//! assert!(store.delete("user:1").await?);
//!
//! factory.close_all().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod constants;
pub mod storage;

// Re-export common types
pub use constants::*;
pub use storage::{
    Backend, BackendKind, ConfigError, ConfigResult, DataStore, DataStoreExt, MemoryStorage,
    PostgresConfig, PostgresStorage, StorageError, StorageFactory, StorageKey, StorageResult,
};

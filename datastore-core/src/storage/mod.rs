//! Storage - Contract, Backends and Factory
//!
//! TigerStyle: Abstract storage, closed set of backends, explicit lifecycle.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      DataStore Trait                         │
//! └─────────────────────────────────────────────────────────────┘
//!          ↑                              ↑
//!          │                              │
//! ┌────────┴────────┐           ┌────────┴────────┐
//! │  MemoryStorage  │           │ PostgresStorage │
//! │   (volatile)    │           │    (durable)    │
//! └─────────────────┘           └─────────────────┘
//!          ↑                              ↑
//!          └──────────── Backend ─────────┘
//!                          ↑
//!                   StorageFactory
//! ```

mod backend;
mod config;
mod error;
mod factory;
mod memory;
mod postgres;

pub use backend::{validate_key, Backend, DataStore, DataStoreExt};
pub use config::{BackendKind, PostgresConfig, StorageKey};
pub use error::{ConfigError, ConfigResult, StorageError, StorageResult};
pub use factory::StorageFactory;
pub use memory::MemoryStorage;
pub use postgres::PostgresStorage;

//! Datastore - Configurable Key-Value Datastore Node
//!
//! A workflow node that sets, gets and clears values in a pluggable
//! key-value store, backed by process memory or PostgreSQL.
//!
//! Features:
//! - One storage contract over interchangeable backends (`datastore-core`)
//! - Pools shared across items addressing the same database
//! - Array batching for multi-item `Set`
//! - Configurable output shapes and continue-on-fail

pub mod node;

pub use datastore_core as storage;
pub use node::{
    Batch, DatastoreNode, InputItem, ItemParams, NodeError, Operation, OutputItem, OutputMode,
    ValueInput,
};

// =============================================================================
// TigerStyle Constants
// =============================================================================

/// Application name
pub const APP_NAME: &str = "datastore";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable prefix for PostgreSQL settings
pub const POSTGRES_ENV_PREFIX: &str = "DATASTORE_PG";

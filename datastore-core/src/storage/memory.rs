//! MemoryStorage - Volatile In-Process Store
//!
//! TigerStyle: No I/O, no serialization, process lifetime only.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::backend::{validate_key, DataStore};
use super::error::StorageResult;

/// An in-process key-value map.
///
/// The factory hands out one instance per registry, so every caller asking
/// for the memory backend shares the same entries. Values are kept as given;
/// nothing is serialized.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl DataStore for MemoryStorage {
    async fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        validate_key(key)?;
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        validate_key(key)?;
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn has(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        Ok(self.entries.read().await.contains_key(key))
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn clear(&self) -> StorageResult<()> {
        let mut entries = self.entries.write().await;
        entries.clear();

        // Postcondition
        debug_assert!(entries.is_empty(), "store should be empty after clear");

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

//! Datastore Node
//!
//! TigerStyle: Per-item orchestration over the storage contract.
//!
//! A node runs one operation over a batch of input items. Each item carries
//! its own storage selection and key; the node resolves backends through a
//! shared [`StorageFactory`], so a batch addressing one database uses one
//! pool.
//!
//! Flow:
//! 1. `ClearAll` clears the store once, up front
//! 2. `Set` over several items sharing one key stores them as one array
//! 3. Otherwise each item is processed on its own
//! 4. Per-item failures abort the batch, or become `{error}` outputs when
//!    `continue_on_fail` is set

use std::path::Path;
use std::sync::Arc;

use datastore_core::{
    Backend, BackendKind, ConfigError, DataStore, PostgresConfig, StorageError, StorageFactory,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

// =============================================================================
// Types
// =============================================================================

/// What the node does with each item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    /// Store a value under a key
    #[default]
    Set,
    /// Retrieve a value by key
    Get,
    /// Remove one key
    Clear,
    /// Remove every key
    ClearAll,
}

impl Operation {
    /// Get string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Get => "get",
            Self::Clear => "clear",
            Self::ClearAll => "clearAll",
        }
    }
}

/// Shape of the output for `Set`, `Clear` and `ClearAll`.
///
/// `Get` always emits `{key, value, found}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputMode {
    /// Emit the input item unchanged
    #[default]
    PassThrough,
    /// Emit `{success, operation, key}`
    Status,
    /// Emit the stored (or removed) value with status fields
    AffectedValue,
    /// Emit `{<key>: value}` only
    AffectedValueOnly,
}

/// Value supplied with a `Set` item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ValueInput {
    /// Stored as a JSON string
    String(String),
    /// Parsed as JSON text before storing
    Json(String),
}

impl Default for ValueInput {
    fn default() -> Self {
        Self::String(String::new())
    }
}

impl ValueInput {
    fn same_type(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    /// Convert to the value to store.
    fn to_value(&self, key: &str, item: usize) -> Result<Value, NodeError> {
        match self {
            Self::String(s) => Ok(Value::String(s.clone())),
            Self::Json(text) => serde_json::from_str(text).map_err(|e| NodeError::InvalidJson {
                key: key.to_string(),
                item,
                reason: e.to_string(),
            }),
        }
    }
}

/// Per-item parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemParams {
    /// Storage backend
    #[serde(default)]
    pub backend: BackendKind,
    /// Connection parameters, required for the relational backend
    #[serde(default)]
    pub postgres: Option<PostgresConfig>,
    /// Key to operate on (unused by `ClearAll`)
    #[serde(default)]
    pub key: String,
    /// Value for `Set`
    #[serde(default)]
    pub value: ValueInput,
}

impl ItemParams {
    /// Parameters addressing `key` on the memory backend.
    #[must_use]
    pub fn memory(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    /// Set the value.
    #[must_use]
    pub fn with_value(mut self, value: ValueInput) -> Self {
        self.value = value;
        self
    }

    /// Address the relational backend.
    #[must_use]
    pub fn with_postgres(mut self, config: PostgresConfig) -> Self {
        self.backend = BackendKind::Postgres;
        self.postgres = Some(config);
        self
    }
}

/// An input record and its parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputItem {
    /// Record payload, emitted unchanged in pass-through mode
    #[serde(default)]
    pub json: Value,
    /// Parameters for this record
    #[serde(default)]
    pub params: ItemParams,
}

impl InputItem {
    /// Create an item with an empty payload.
    #[must_use]
    pub fn new(params: ItemParams) -> Self {
        Self {
            json: Value::Object(Map::new()),
            params,
        }
    }
}

/// An output record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputItem {
    /// Record payload
    pub json: Value,
    /// Index of the input item that produced this output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paired_item: Option<usize>,
}

impl OutputItem {
    fn paired(json: Value, item: usize) -> Self {
        Self {
            json,
            paired_item: Some(item),
        }
    }

    fn unpaired(json: Value) -> Self {
        Self {
            json,
            paired_item: None,
        }
    }
}

/// Errors raised while executing a node.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Key Name is required for \"{operation}\" operation (item {item})")]
    MissingKey {
        operation: &'static str,
        item: usize,
    },

    #[error("Invalid JSON provided for key \"{key}\" in item {item}: {reason}")]
    InvalidJson {
        key: String,
        item: usize,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid batch file: {0}")]
    Batch(#[from] serde_json::Error),
}

// =============================================================================
// Node
// =============================================================================

/// Executes one operation over batches of items.
#[derive(Debug, Clone)]
pub struct DatastoreNode {
    factory: Arc<StorageFactory>,
    operation: Operation,
    output: OutputMode,
    continue_on_fail: bool,
    defaults: ItemParams,
}

impl DatastoreNode {
    /// Create a node over a shared factory.
    #[must_use]
    pub fn new(factory: Arc<StorageFactory>, operation: Operation) -> Self {
        Self {
            factory,
            operation,
            output: OutputMode::default(),
            continue_on_fail: false,
            defaults: ItemParams::default(),
        }
    }

    /// Set the output shape.
    #[must_use]
    pub fn with_output(mut self, output: OutputMode) -> Self {
        self.output = output;
        self
    }

    /// Turn per-item failures into `{error}` outputs.
    #[must_use]
    pub fn with_continue_on_fail(mut self, continue_on_fail: bool) -> Self {
        self.continue_on_fail = continue_on_fail;
        self
    }

    /// Storage selection used when a batch has no items.
    #[must_use]
    pub fn with_defaults(mut self, defaults: ItemParams) -> Self {
        self.defaults = defaults;
        self
    }

    /// The operation this node runs.
    #[must_use]
    pub fn operation(&self) -> Operation {
        self.operation
    }

    fn storage(&self, params: &ItemParams) -> Result<Arc<Backend>, NodeError> {
        Ok(self
            .factory
            .create_storage(params.backend, params.postgres.as_ref())?)
    }

    fn reports_status(&self) -> bool {
        self.output != OutputMode::PassThrough
    }

    /// Run the operation over `items`.
    ///
    /// # Errors
    /// Returns the first failure unless `continue_on_fail` is set; failures
    /// outside the per-item loop (resolving the batch backend, `ClearAll`,
    /// batched `Set`) always abort.
    #[tracing::instrument(
        skip_all,
        fields(operation = self.operation.as_str(), items = items.len())
    )]
    pub async fn execute(&self, items: &[InputItem]) -> Result<Vec<OutputItem>, NodeError> {
        let mut out = Vec::with_capacity(items.len());
        let first = items.first().map_or(&self.defaults, |item| &item.params);

        if self.operation == Operation::ClearAll {
            self.storage(first)?.clear().await?;
            if items.is_empty() {
                if self.reports_status() {
                    out.push(OutputItem::unpaired(
                        json!({"success": true, "operation": "clearAll"}),
                    ));
                }
                return Ok(out);
            }
        }

        if self.operation == Operation::Set && items.len() > 1 {
            if let Some(batched) = self.set_batched(items).await? {
                return Ok(batched);
            }
        }

        for (i, item) in items.iter().enumerate() {
            match self.execute_item(i, item).await {
                Ok(outputs) => out.extend(outputs),
                Err(e) if self.continue_on_fail => {
                    tracing::warn!(item = i, error = %e, "item failed, continuing");
                    out.push(OutputItem::paired(json!({"error": e.to_string()}), i));
                }
                Err(e) => return Err(e),
            }
        }

        Ok(out)
    }

    /// Store every item's JSON as one array when all items share a key.
    ///
    /// Returns `None` if the batch does not qualify.
    async fn set_batched(&self, items: &[InputItem]) -> Result<Option<Vec<OutputItem>>, NodeError> {
        let first = &items[0].params;
        if first.key.is_empty() {
            return Err(NodeError::MissingKey {
                operation: "Set",
                item: 0,
            });
        }

        let uniform = items[1..]
            .iter()
            .all(|item| item.params.key == first.key && item.params.value.same_type(&first.value));
        if !uniform || !matches!(first.value, ValueInput::Json(_)) {
            return Ok(None);
        }

        let values = items
            .iter()
            .enumerate()
            .map(|(i, item)| item.params.value.to_value(&first.key, i))
            .collect::<Result<Vec<_>, _>>()?;
        let array = Value::Array(values);

        self.storage(first)?.set(&first.key, array.clone()).await?;
        tracing::debug!(key = %first.key, count = items.len(), "stored batch as array");

        let out = match self.output {
            OutputMode::Status => vec![OutputItem::unpaired(json!({
                "success": true,
                "operation": "set",
                "key": first.key,
                "itemCount": items.len(),
            }))],
            OutputMode::AffectedValue => vec![OutputItem::unpaired(json!({
                "success": true,
                "operation": "set",
                "value": array,
            }))],
            OutputMode::AffectedValueOnly => {
                vec![OutputItem::unpaired(single_entry(&first.key, array))]
            }
            OutputMode::PassThrough => items
                .iter()
                .map(|item| OutputItem::unpaired(item.json.clone()))
                .collect(),
        };

        Ok(Some(out))
    }

    async fn execute_item(&self, i: usize, item: &InputItem) -> Result<Vec<OutputItem>, NodeError> {
        let params = &item.params;
        let key = params.key.as_str();
        let storage = self.storage(params)?;

        let json = match self.operation {
            Operation::Set => {
                require_key(key, "Set", i)?;
                let value = params.value.to_value(key, i)?;
                storage.set(key, value.clone()).await?;

                match self.output {
                    OutputMode::Status => json!({"success": true, "operation": "set", "key": key}),
                    OutputMode::AffectedValue => {
                        json!({"success": true, "operation": "set", "value": value})
                    }
                    OutputMode::AffectedValueOnly => single_entry(key, value),
                    OutputMode::PassThrough => item.json.clone(),
                }
            }
            Operation::Get => {
                require_key(key, "Get", i)?;
                return Ok(match storage.get(key).await? {
                    Some(Value::Array(values)) => values
                        .into_iter()
                        .map(|value| {
                            let json = json!({"key": key, "value": value, "found": true});
                            OutputItem::paired(json, i)
                        })
                        .collect(),
                    Some(value) => vec![OutputItem::paired(
                        json!({"key": key, "value": value, "found": true}),
                        i,
                    )],
                    None => vec![OutputItem::paired(
                        json!({"key": key, "value": null, "found": false}),
                        i,
                    )],
                });
            }
            Operation::Clear => {
                require_key(key, "Clear", i)?;
                let previous = match self.output {
                    OutputMode::AffectedValue | OutputMode::AffectedValueOnly => {
                        storage.get(key).await?
                    }
                    OutputMode::Status | OutputMode::PassThrough => None,
                };
                let cleared = storage.delete(key).await?;
                let previous = previous.unwrap_or(Value::Null);

                match self.output {
                    OutputMode::Status => json!({
                        "success": true,
                        "operation": "clear",
                        "key": key,
                        "cleared": cleared,
                    }),
                    OutputMode::AffectedValue => json!({
                        "operation": "clear",
                        "key": key,
                        "value": previous,
                        "cleared": cleared,
                    }),
                    OutputMode::AffectedValueOnly => single_entry(key, previous),
                    OutputMode::PassThrough => item.json.clone(),
                }
            }
            Operation::ClearAll => {
                if self.reports_status() {
                    json!({"success": true, "operation": "clearAll"})
                } else {
                    item.json.clone()
                }
            }
        };

        Ok(vec![OutputItem::paired(json, i)])
    }
}

fn require_key(key: &str, operation: &'static str, item: usize) -> Result<(), NodeError> {
    if key.is_empty() {
        return Err(NodeError::MissingKey { operation, item });
    }
    Ok(())
}

fn single_entry(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Value::Object(map)
}

// =============================================================================
// Batch Files
// =============================================================================

/// A node invocation read from a JSON file.
///
/// ```json
/// {
///   "operation": "set",
///   "output": "status",
///   "continue_on_fail": true,
///   "items": [{"params": {"key": "a", "value": {"type": "json", "value": "[1]"}}}]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Operation to run
    #[serde(default)]
    pub operation: Operation,
    /// Output shape
    #[serde(default)]
    pub output: OutputMode,
    /// Turn per-item failures into `{error}` outputs
    #[serde(default)]
    pub continue_on_fail: bool,
    /// Input items
    #[serde(default)]
    pub items: Vec<InputItem>,
}

impl Batch {
    /// Read a batch from a JSON file.
    ///
    /// # Errors
    /// Returns `NodeError::Io` if the file cannot be read and
    /// `NodeError::Batch` if it is not a valid batch.
    pub async fn load(path: &Path) -> Result<Self, NodeError> {
        let text = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Build a node for this batch over `factory`.
    #[must_use]
    pub fn node(&self, factory: Arc<StorageFactory>) -> DatastoreNode {
        DatastoreNode::new(factory, self.operation)
            .with_output(self.output)
            .with_continue_on_fail(self.continue_on_fail)
    }

    /// Run the batch.
    ///
    /// # Errors
    /// As [`DatastoreNode::execute`].
    pub async fn run(&self, factory: Arc<StorageFactory>) -> Result<Vec<OutputItem>, NodeError> {
        self.node(factory).execute(&self.items).await
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn node(operation: Operation, output: OutputMode) -> (Arc<StorageFactory>, DatastoreNode) {
        let factory = Arc::new(StorageFactory::new());
        let node = DatastoreNode::new(Arc::clone(&factory), operation).with_output(output);
        (factory, node)
    }

    fn json_item(key: &str, text: &str) -> InputItem {
        InputItem::new(ItemParams::memory(key).with_value(ValueInput::Json(text.to_string())))
    }

    #[test]
    fn test_operation_serde_names() {
        let op: Operation = serde_json::from_str("\"clearAll\"").unwrap();
        assert_eq!(op, Operation::ClearAll);
        let mode: OutputMode = serde_json::from_str("\"affectedValueOnly\"").unwrap();
        assert_eq!(mode, OutputMode::AffectedValueOnly);
    }

    #[test]
    fn test_value_input_serde() {
        let value: ValueInput =
            serde_json::from_str(r#"{"type": "json", "value": "[1]"}"#).unwrap();
        assert_eq!(value, ValueInput::Json("[1]".to_string()));
    }

    #[test]
    fn test_value_input_to_value() {
        assert_eq!(
            ValueInput::String("42".into()).to_value("k", 0).unwrap(),
            json!("42")
        );
        assert_eq!(ValueInput::Json("42".into()).to_value("k", 0).unwrap(), json!(42));

        let err = ValueInput::Json("{".into()).to_value("k", 3).unwrap_err();
        assert!(matches!(err, NodeError::InvalidJson { item: 3, .. }));
        assert!(err.to_string().starts_with("Invalid JSON provided for key \"k\" in item 3"));
    }

    #[tokio::test]
    async fn test_set_status_then_get() {
        let (factory, set) = node(Operation::Set, OutputMode::Status);
        let out = set
            .execute(&[json_item("user:1", r#"{"name": "a", "age": 3}"#)])
            .await
            .unwrap();
        assert_eq!(
            out,
            vec![OutputItem::paired(
                json!({"success": true, "operation": "set", "key": "user:1"}),
                0
            )]
        );

        let get = DatastoreNode::new(Arc::clone(&factory), Operation::Get);
        let out = get
            .execute(&[InputItem::new(ItemParams::memory("user:1"))])
            .await
            .unwrap();
        assert_eq!(
            out[0].json,
            json!({"key": "user:1", "value": {"name": "a", "age": 3}, "found": true})
        );
    }

    #[tokio::test]
    async fn test_get_missing_and_array_fan_out() {
        let (factory, get) = node(Operation::Get, OutputMode::PassThrough);

        let out = get
            .execute(&[InputItem::new(ItemParams::memory("nope"))])
            .await
            .unwrap();
        assert_eq!(out[0].json, json!({"key": "nope", "value": null, "found": false}));

        let store = factory.create_storage(BackendKind::Memory, None).unwrap();
        store.set("list", json!([1, 2, 3])).await.unwrap();

        let out = get
            .execute(&[InputItem::new(ItemParams::memory("list"))])
            .await
            .unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[2].json, json!({"key": "list", "value": 3, "found": true}));
        assert!(out.iter().all(|o| o.paired_item == Some(0)));
    }

    #[tokio::test]
    async fn test_set_pass_through_and_string_value() {
        let (factory, set) = node(Operation::Set, OutputMode::PassThrough);
        let mut item = InputItem::new(
            ItemParams::memory("greeting").with_value(ValueInput::String("hi".into())),
        );
        item.json = json!({"id": 7});

        let out = set.execute(&[item]).await.unwrap();
        assert_eq!(out[0].json, json!({"id": 7}));

        let store = factory.create_storage(BackendKind::Memory, None).unwrap();
        assert_eq!(store.get("greeting").await.unwrap(), Some(json!("hi")));
    }

    #[tokio::test]
    async fn test_set_batched_as_array() {
        let (factory, set) = node(Operation::Set, OutputMode::Status);
        let items = [json_item("list", "1"), json_item("list", r#"{"a": 2}"#)];

        let out = set.execute(&items).await.unwrap();
        assert_eq!(
            out,
            vec![OutputItem::unpaired(json!({
                "success": true,
                "operation": "set",
                "key": "list",
                "itemCount": 2,
            }))]
        );

        let store = factory.create_storage(BackendKind::Memory, None).unwrap();
        assert_eq!(store.get("list").await.unwrap(), Some(json!([1, {"a": 2}])));
    }

    #[tokio::test]
    async fn test_set_mixed_keys_not_batched() {
        let (factory, set) = node(Operation::Set, OutputMode::AffectedValueOnly);
        let items = [json_item("a", "1"), json_item("b", "2")];

        let out = set.execute(&items).await.unwrap();
        assert_eq!(out[0].json, json!({"a": 1}));
        assert_eq!(out[1].json, json!({"b": 2}));

        let store = factory.create_storage(BackendKind::Memory, None).unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_set_batch_requires_key() {
        let (_factory, set) = node(Operation::Set, OutputMode::Status);
        let err = set
            .execute(&[json_item("", "1"), json_item("", "2")])
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::MissingKey { item: 0, .. }));
    }

    #[tokio::test]
    async fn test_clear_affected_value() {
        let (factory, clear) = node(Operation::Clear, OutputMode::AffectedValue);
        let store = factory.create_storage(BackendKind::Memory, None).unwrap();
        store.set("k", json!({"v": 1})).await.unwrap();

        let out = clear
            .execute(&[
                InputItem::new(ItemParams::memory("k")),
                InputItem::new(ItemParams::memory("k")),
            ])
            .await
            .unwrap();

        assert_eq!(
            out[0].json,
            json!({"operation": "clear", "key": "k", "value": {"v": 1}, "cleared": true})
        );
        assert_eq!(
            out[1].json,
            json!({"operation": "clear", "key": "k", "value": null, "cleared": false})
        );
    }

    #[tokio::test]
    async fn test_clear_affected_value_only() {
        let (factory, clear) = node(Operation::Clear, OutputMode::AffectedValueOnly);
        let store = factory.create_storage(BackendKind::Memory, None).unwrap();
        store.set("k", json!({"v": 1})).await.unwrap();

        let out = clear
            .execute(&[
                InputItem::new(ItemParams::memory("k")),
                InputItem::new(ItemParams::memory("k")),
            ])
            .await
            .unwrap();

        // Previous value captured before the delete
        assert_eq!(out[0].json, json!({"k": {"v": 1}}));
        assert_eq!(out[0].paired_item, Some(0));
        assert_eq!(out[1].json, json!({"k": null}));
        assert!(!store.has("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_all_without_items() {
        let (factory, clear_all) = node(Operation::ClearAll, OutputMode::Status);
        let store = factory.create_storage(BackendKind::Memory, None).unwrap();
        store.set("a", json!(1)).await.unwrap();

        let out = clear_all.execute(&[]).await.unwrap();
        assert_eq!(
            out,
            vec![OutputItem::unpaired(json!({"success": true, "operation": "clearAll"}))]
        );
        assert!(!store.has("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_all_pass_through_without_items() {
        let (_factory, clear_all) = node(Operation::ClearAll, OutputMode::PassThrough);
        assert!(clear_all.execute(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_key_aborts() {
        let (_factory, get) = node(Operation::Get, OutputMode::PassThrough);
        let err = get
            .execute(&[InputItem::new(ItemParams::memory(""))])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Key Name is required for \"Get\" operation (item 0)");
    }

    #[tokio::test]
    async fn test_continue_on_fail() {
        let (_factory, set) = node(Operation::Set, OutputMode::Status);
        let set = set.with_continue_on_fail(true);

        let items = [
            json_item("bad", "{not json"),
            InputItem::new(ItemParams {
                backend: BackendKind::Postgres,
                ..ItemParams::memory("pg")
            }),
            json_item("good", "true"),
        ];

        let out = set.execute(&items).await.unwrap();
        assert_eq!(out.len(), 3);
        assert!(out[0].json["error"].as_str().unwrap().contains("Invalid JSON"));
        assert_eq!(
            out[1].json["error"],
            json!("PostgreSQL configuration is required for PostgreSQL backend")
        );
        assert_eq!(out[2].json["key"], json!("good"));
        assert_eq!(out[2].paired_item, Some(2));
    }
}

//! Storage layer: the shared single-table entity store.
//!
//! All entity types are plain attribute maps keyed by `(id, sk)`. The store
//! performs no field-level merging; callers that need partial updates
//! read, merge and write back (optionally under a [`WriteCondition`]).

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub mod keys;
pub mod mock;
pub mod schema;

#[cfg(feature = "dynamo")]
pub mod dynamo;

pub use keys::ItemKey;
pub use mock::{MockEntityStore, MockTableAdmin};
pub use schema::{SchemaCatalog, CATALOG};

#[cfg(feature = "dynamo")]
pub use dynamo::{DynamoEntityStore, DynamoTableAdmin};

/// One stored row: attribute name to JSON-shaped value.
pub type Item = serde_json::Map<String, serde_json::Value>;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during item-level storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Item is missing key attribute '{0}'")]
    MissingKey(&'static str),

    #[error("Invalid {field}: {reason}")]
    InvalidKey { field: &'static str, reason: String },

    #[error("Attribute '{0}' is an index key and must be a non-empty string")]
    NonStringKeyAttribute(String),

    #[error("Write condition failed for {key}")]
    ConditionFailed { key: ItemKey },

    #[error("Unknown index: {0}")]
    UnknownIndex(String),

    #[error("Invalid page token: {0}")]
    InvalidPageToken(String),

    #[error("Invalid item: {0}")]
    InvalidItem(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("DynamoDB error: {0}")]
    Dynamo(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Precondition attached to a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteCondition {
    /// Unconditional overwrite (last write wins).
    #[default]
    Always,
    /// Only create; fail if a row with the same key exists.
    MustNotExist,
    /// Only replace a row whose `version` equals the given value.
    /// `VersionEquals(0)` also matches an existing row without a `version`.
    VersionEquals(u64),
}

/// What a query runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuerySource<'a> {
    /// The base table, partitioned by `id`, sorted by `sk`.
    Table,
    /// A global secondary index from the catalog.
    Index(&'a str),
}

/// Opaque continuation point returned with a partial page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageToken(pub(crate) Item);

/// Query parameters.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Maximum number of items to return.
    pub limit: Option<usize>,
    /// Restrict to sort-key values starting with this prefix.
    pub sort_key_prefix: Option<String>,
    /// Resume after a previous page.
    pub start_after: Option<PageToken>,
}

impl QueryOptions {
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.sort_key_prefix = Some(prefix.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn starting_after(mut self, token: PageToken) -> Self {
        self.start_after = Some(token);
        self
    }
}

/// One page of query results, in ascending sort-key order.
#[derive(Debug, Clone, Default)]
pub struct QueryPage {
    pub items: Vec<Item>,
    /// Present when more items may follow.
    pub next: Option<PageToken>,
}

/// Interface for single-table persistence.
///
/// Implementations:
/// - `DynamoEntityStore`: Amazon DynamoDB
/// - `MockEntityStore`: in-memory, emulates index projections
///
/// Index queries are eventually consistent with writes on DynamoDB; callers
/// must not assume a `put` is visible to an index query right away.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Write one item, replacing any previous value for its `(id, sk)`.
    async fn put(&self, item: Item) -> Result<()> {
        self.put_conditional(item, WriteCondition::Always).await
    }

    /// Write one item if `condition` holds.
    ///
    /// Fails with `StorageError::ConditionFailed` otherwise.
    async fn put_conditional(&self, item: Item, condition: WriteCondition) -> Result<()>;

    /// Point read. Absence is `Ok(None)`, not an error.
    async fn get_one(&self, id: &str, sk: &str) -> Result<Option<Item>>;

    /// Remove one item. Removing an absent item succeeds.
    async fn delete(&self, id: &str, sk: &str) -> Result<()>;

    /// Fetch one page of a base-table or index query.
    async fn query_page(
        &self,
        source: QuerySource<'_>,
        partition_value: &str,
        options: &QueryOptions,
    ) -> Result<QueryPage>;
}

struct QueryState {
    buffer: VecDeque<Item>,
    next: Option<PageToken>,
    remaining: Option<usize>,
    prefix: Option<String>,
    exhausted: bool,
}

/// Lazily page through a query, yielding items in sort-key order.
///
/// Pages are fetched on demand; `options.limit` caps the total number of
/// items across pages.
pub fn query_stream<'a>(
    store: &'a dyn EntityStore,
    source: QuerySource<'a>,
    partition_value: &'a str,
    options: QueryOptions,
) -> BoxStream<'a, Result<Item>> {
    let state = QueryState {
        buffer: VecDeque::new(),
        next: options.start_after,
        remaining: options.limit,
        prefix: options.sort_key_prefix,
        exhausted: false,
    };

    futures::stream::try_unfold(state, move |state| {
        next_query_item(store, source, partition_value, state)
    })
    .boxed()
}

async fn next_query_item(
    store: &dyn EntityStore,
    source: QuerySource<'_>,
    partition_value: &str,
    mut state: QueryState,
) -> Result<Option<(Item, QueryState)>> {
    loop {
        if state.remaining == Some(0) {
            return Ok(None);
        }
        if let Some(item) = state.buffer.pop_front() {
            state.remaining = state.remaining.map(|r| r - 1);
            return Ok(Some((item, state)));
        }
        if state.exhausted {
            return Ok(None);
        }

        let page_options = QueryOptions {
            limit: state.remaining,
            sort_key_prefix: state.prefix.clone(),
            start_after: state.next.take(),
        };
        let page = store
            .query_page(source, partition_value, &page_options)
            .await?;
        state.exhausted = page.next.is_none();
        state.next = page.next;
        state.buffer.extend(page.items);
    }
}

/// Collect every item of a query.
pub async fn query_all(
    store: &dyn EntityStore,
    source: QuerySource<'_>,
    partition_value: &str,
    options: QueryOptions,
) -> Result<Vec<Item>> {
    query_stream(store, source, partition_value, options)
        .try_collect()
        .await
}

/// Check key attributes before a write and return the item's primary key.
///
/// `id` and `sk` are mandatory. Any other index key attribute is optional
/// (indexes are sparse) but must be a non-empty string when present.
pub fn validate_item(item: &Item) -> Result<ItemKey> {
    let id = required_string(item, schema::ATTR_ID)?;
    let sk = required_string(item, schema::ATTR_SK)?;

    for attr in CATALOG.attributes {
        if let Some(value) = item.get(*attr) {
            match value.as_str() {
                Some(s) if !s.is_empty() => {}
                _ => return Err(StorageError::NonStringKeyAttribute(attr.to_string())),
            }
        }
    }

    Ok(ItemKey::new(id, sk))
}

fn required_string(item: &Item, attr: &'static str) -> Result<String> {
    match item.get(attr).and_then(|v| v.as_str()) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(StorageError::MissingKey(attr)),
    }
}

/// Current `version` of an item; rows written without one count as 0.
pub fn item_version(item: &Item) -> u64 {
    item.get(schema::ATTR_VERSION)
        .and_then(|v| v.as_u64())
        .unwrap_or(0)
}

/// Serialize a typed record into an item.
pub fn to_item<T: Serialize>(value: &T) -> Result<Item> {
    match serde_json::to_value(value)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(StorageError::InvalidItem(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

/// Deserialize an item into a typed record.
pub fn from_item<T: DeserializeOwned>(item: Item) -> Result<T> {
    Ok(serde_json::from_value(serde_json::Value::Object(item))?)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn item(value: serde_json::Value) -> Item {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_validate_item_requires_id_and_sk() {
        assert!(matches!(
            validate_item(&item(json!({"sk": "X"}))),
            Err(StorageError::MissingKey("id"))
        ));
        assert!(matches!(
            validate_item(&item(json!({"id": "r1", "sk": ""}))),
            Err(StorageError::MissingKey("sk"))
        ));
        let key = validate_item(&item(json!({"id": "r1", "sk": "X"}))).unwrap();
        assert_eq!(key, ItemKey::new("r1", "X"));
    }

    #[test]
    fn test_validate_item_rejects_non_string_index_keys() {
        let err = validate_item(&item(json!({"id": "r1", "sk": "X", "participantId": 7})));
        assert!(matches!(err, Err(StorageError::NonStringKeyAttribute(a)) if a == "participantId"));
    }

    #[test]
    fn test_item_version_defaults_to_zero() {
        assert_eq!(item_version(&item(json!({"id": "a"}))), 0);
        assert_eq!(item_version(&item(json!({"id": "a", "version": 4}))), 4);
    }

    #[test]
    fn test_to_item_rejects_scalars() {
        assert!(matches!(to_item(&5), Err(StorageError::InvalidItem(_))));
    }
}

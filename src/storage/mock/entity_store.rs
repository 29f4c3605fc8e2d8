//! In-memory entity store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::storage::schema::{self, CATALOG};
use crate::storage::{
    item_version, validate_item, EntityStore, Item, ItemKey, PageToken, QueryOptions, QueryPage,
    QuerySource, Result, StorageError, WriteCondition,
};

/// Mock entity store that keeps items in memory.
///
/// Index queries are answered by scanning the base items and projecting
/// the ones carrying both key attributes of the index, so sparse indexes
/// behave as they do on DynamoDB. Index views are always up to date.
#[derive(Default)]
pub struct MockEntityStore {
    items: RwLock<BTreeMap<ItemKey, Item>>,
    fail_on_put: RwLock<bool>,
    fail_on_get: RwLock<bool>,
    fail_on_query: RwLock<bool>,
    injected_conflicts: AtomicUsize,
    put_count: AtomicUsize,
}

impl MockEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_put(&self, fail: bool) {
        *self.fail_on_put.write().await = fail;
    }

    pub async fn set_fail_on_get(&self, fail: bool) {
        *self.fail_on_get.write().await = fail;
    }

    pub async fn set_fail_on_query(&self, fail: bool) {
        *self.fail_on_query.write().await = fail;
    }

    /// Make the next `n` conditional writes fail with `ConditionFailed`,
    /// as if a concurrent writer got there first. Unconditional writes are
    /// not affected.
    pub fn inject_conflicts(&self, n: usize) {
        self.injected_conflicts.store(n, Ordering::SeqCst);
    }

    /// Number of successful writes.
    pub fn put_count(&self) -> usize {
        self.put_count.load(Ordering::SeqCst)
    }

    /// Number of stored items.
    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    /// Insert an item bypassing validation and counters. For seeding
    /// legacy or malformed rows in tests.
    pub async fn insert_raw(&self, key: ItemKey, item: Item) {
        self.items.write().await.insert(key, item);
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Position of an item within one index partition.
type SortPosition = (String, String, String);

fn attr_str<'a>(item: &'a Item, attr: &str) -> Option<&'a str> {
    item.get(attr).and_then(Value::as_str)
}

fn position(item: &Item, sort_attr: &str) -> SortPosition {
    (
        attr_str(item, sort_attr).unwrap_or_default().to_string(),
        attr_str(item, schema::ATTR_ID).unwrap_or_default().to_string(),
        attr_str(item, schema::ATTR_SK).unwrap_or_default().to_string(),
    )
}

fn token_position(token: &PageToken, sort_attr: &str) -> Result<SortPosition> {
    let get = |attr: &str| {
        attr_str(&token.0, attr)
            .map(str::to_string)
            .ok_or_else(|| StorageError::InvalidPageToken(format!("missing '{attr}'")))
    };
    Ok((get(sort_attr)?, get(schema::ATTR_ID)?, get(schema::ATTR_SK)?))
}

fn token_for(item: &Item, sort_attr: &str) -> PageToken {
    let mut token = Item::new();
    for attr in [sort_attr, schema::ATTR_ID, schema::ATTR_SK] {
        if let Some(value) = item.get(attr) {
            token.insert(attr.to_string(), value.clone());
        }
    }
    PageToken(token)
}

#[async_trait]
impl EntityStore for MockEntityStore {
    async fn put_conditional(&self, item: Item, condition: WriteCondition) -> Result<()> {
        if *self.fail_on_put.read().await {
            return Err(StorageError::Unavailable("Mock put failure".to_string()));
        }

        let key = validate_item(&item)?;

        if condition != WriteCondition::Always && self.take_injected_conflict() {
            return Err(StorageError::ConditionFailed { key });
        }

        let mut items = self.items.write().await;
        let holds = match condition {
            WriteCondition::Always => true,
            WriteCondition::MustNotExist => !items.contains_key(&key),
            WriteCondition::VersionEquals(expected) => items
                .get(&key)
                .is_some_and(|existing| item_version(existing) == expected),
        };
        if !holds {
            return Err(StorageError::ConditionFailed { key });
        }

        items.insert(key, item);
        self.put_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_one(&self, id: &str, sk: &str) -> Result<Option<Item>> {
        if *self.fail_on_get.read().await {
            return Err(StorageError::Unavailable("Mock get failure".to_string()));
        }
        Ok(self.items.read().await.get(&ItemKey::new(id, sk)).cloned())
    }

    async fn delete(&self, id: &str, sk: &str) -> Result<()> {
        if *self.fail_on_put.read().await {
            return Err(StorageError::Unavailable("Mock delete failure".to_string()));
        }
        self.items.write().await.remove(&ItemKey::new(id, sk));
        Ok(())
    }

    async fn query_page(
        &self,
        source: QuerySource<'_>,
        partition_value: &str,
        options: &QueryOptions,
    ) -> Result<QueryPage> {
        if *self.fail_on_query.read().await {
            return Err(StorageError::Unavailable("Mock query failure".to_string()));
        }

        let key_schema = match source {
            QuerySource::Table => CATALOG.key_schema,
            QuerySource::Index(name) => {
                CATALOG
                    .index(name)
                    .ok_or_else(|| StorageError::UnknownIndex(name.to_string()))?
                    .key_schema
            }
        };
        let sort_attr = key_schema.sort_key;

        let after = options
            .start_after
            .as_ref()
            .map(|token| token_position(token, sort_attr))
            .transpose()?;

        let items = self.items.read().await;
        let mut matching: Vec<(SortPosition, &Item)> = items
            .values()
            .filter(|item| attr_str(item, key_schema.partition_key) == Some(partition_value))
            .filter(|item| match attr_str(item, sort_attr) {
                Some(sort_value) => options
                    .sort_key_prefix
                    .as_deref()
                    .map_or(true, |prefix| sort_value.starts_with(prefix)),
                None => false,
            })
            .map(|item| (position(item, sort_attr), item))
            .filter(|(pos, _)| after.as_ref().map_or(true, |after| pos > after))
            .collect();
        matching.sort_by(|a, b| a.0.cmp(&b.0));

        let limit = options.limit.unwrap_or(usize::MAX);
        let has_more = matching.len() > limit;
        let page: Vec<Item> = matching
            .into_iter()
            .take(limit)
            .map(|(_, item)| item.clone())
            .collect();

        let next = match page.last() {
            Some(last) if has_more => Some(token_for(last, sort_attr)),
            _ => None,
        };

        Ok(QueryPage { items: page, next })
    }
}

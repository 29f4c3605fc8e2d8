//! Research lifecycle.
//!
//! A research row (`sk = RESEARCH#<id>`) is owned by a user and carries
//! opaque study attributes. Its configuration documents and everything
//! participants write live in the same partition, so deleting a research
//! is one partition sweep.

use std::sync::Arc;

use backon::{BackoffBuilder, ExponentialBuilder};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::storage::keys::{self, ConfigKind, EntityKind};
use crate::storage::schema::{self, INDEX_ENTITY_TYPE, INDEX_USER_ID};
use crate::storage::{
    from_item, query_all, to_item, EntityStore, Item, ItemKey, QueryOptions, QuerySource,
    StorageError, WriteCondition,
};

/// Attributes callers may not set through create or update.
const RESERVED_ATTRIBUTES: &[&str] = &[
    schema::ATTR_ID,
    schema::ATTR_SK,
    schema::ATTR_ENTITY_TYPE,
    schema::ATTR_USER_ID,
    schema::ATTR_RESEARCH_ID,
    schema::ATTR_PARTICIPANT_ID,
    schema::ATTR_VERSION,
    "createdAt",
    "updatedAt",
];

#[derive(Debug, thiserror::Error)]
pub enum ResearchError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Research not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Gave up updating {key} after {attempts} conflicting attempts")]
    Contention { key: ItemKey, attempts: usize },
}

pub type Result<T> = std::result::Result<T, ResearchError>;

/// A top-level research row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Research {
    pub id: String,
    pub sk: String,
    #[serde(rename = "EntityType")]
    pub entity_type: String,
    /// Owner.
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
    /// Study attributes (name, company, technique, ...), opaque here.
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

/// A research-scoped configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchConfig {
    pub id: String,
    pub sk: String,
    #[serde(rename = "EntityType")]
    pub entity_type: String,
    pub research_id: String,
    /// Opaque configuration payload.
    pub config: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Creates, updates, lists and deletes research rows and their configs.
pub struct ResearchRepository {
    store: Arc<dyn EntityStore>,
    conflict_backoff: ExponentialBuilder,
}

impl ResearchRepository {
    pub fn new(store: Arc<dyn EntityStore>, conflict_backoff: ExponentialBuilder) -> Self {
        Self {
            store,
            conflict_backoff,
        }
    }

    /// Create a research owned by `user_id` with a fresh id.
    pub async fn create(&self, user_id: &str, attributes: Map<String, Value>) -> Result<Research> {
        if user_id.trim().is_empty() {
            return Err(ResearchError::InvalidInput("userId is required".into()));
        }

        let id = Uuid::new_v4().to_string();
        let key = keys::research_key(&id);
        let now = Utc::now();
        let research = Research {
            id: key.id,
            sk: key.sk,
            entity_type: EntityKind::Research.entity_type().to_string(),
            user_id: user_id.to_string(),
            created_at: now,
            updated_at: now,
            version: 1,
            attributes: strip_reserved(attributes),
        };

        self.store
            .put_conditional(to_item(&research)?, WriteCondition::MustNotExist)
            .await?;
        info!(research_id = %research.id, user_id = %user_id, "Research created");
        Ok(research)
    }

    pub async fn get(&self, research_id: &str) -> Result<Option<Research>> {
        let key = keys::research_key(research_id);
        match self.store.get_one(&key.id, &key.sk).await? {
            Some(item) => Ok(Some(from_item(item)?)),
            None => Ok(None),
        }
    }

    /// Merge `patch` onto the stored attributes. Top-level keys in `patch`
    /// replace stored ones; a `null` value removes the attribute. Key,
    /// owner and bookkeeping attributes are ignored.
    pub async fn update(&self, research_id: &str, patch: Map<String, Value>) -> Result<Research> {
        let key = keys::research_key(research_id);
        let patch = strip_reserved(patch);
        let mut delays = self.conflict_backoff.build();
        let mut attempts = 0usize;

        loop {
            attempts += 1;
            let mut research = self
                .get(research_id)
                .await?
                .ok_or_else(|| ResearchError::NotFound(research_id.to_string()))?;
            let previous_version = research.version;

            for (name, value) in &patch {
                if value.is_null() {
                    research.attributes.remove(name);
                } else {
                    research.attributes.insert(name.clone(), value.clone());
                }
            }
            research.version = previous_version + 1;
            research.updated_at = Utc::now();

            match self
                .store
                .put_conditional(
                    to_item(&research)?,
                    WriteCondition::VersionEquals(previous_version),
                )
                .await
            {
                Ok(()) => return Ok(research),
                Err(StorageError::ConditionFailed { .. }) => match delays.next() {
                    Some(delay) => {
                        warn!(research_id = %research_id, attempts, "Concurrent research update, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(ResearchError::Contention { key, attempts }),
                },
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Research rows owned by a user, via the owner index.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Research>> {
        self.list(QuerySource::Index(INDEX_USER_ID), user_id).await
    }

    /// Every research row across owners, via the entity-type index.
    pub async fn list_all(&self) -> Result<Vec<Research>> {
        self.list(
            QuerySource::Index(INDEX_ENTITY_TYPE),
            EntityKind::Research.entity_type(),
        )
        .await
    }

    async fn list(&self, source: QuerySource<'_>, partition: &str) -> Result<Vec<Research>> {
        let items = query_all(
            self.store.as_ref(),
            source,
            partition,
            QueryOptions::default().with_prefix(keys::research_prefix()),
        )
        .await?;

        Ok(items
            .into_iter()
            .filter_map(|item| match from_item::<Research>(item) {
                Ok(research) => Some(research),
                Err(e) => {
                    warn!(error = %e, "Skipping undecodable research row");
                    None
                }
            })
            .collect())
    }

    /// Create or replace one configuration document of a research.
    pub async fn put_config(
        &self,
        research_id: &str,
        kind: ConfigKind,
        config: Value,
    ) -> Result<ResearchConfig> {
        if self.get(research_id).await?.is_none() {
            return Err(ResearchError::NotFound(research_id.to_string()));
        }

        let key = keys::config_key(research_id, kind);
        let now = Utc::now();
        let created_at = match self.store.get_one(&key.id, &key.sk).await? {
            Some(item) => from_item::<ResearchConfig>(item)
                .map(|existing| existing.created_at)
                .unwrap_or(now),
            None => now,
        };

        let record = ResearchConfig {
            id: key.id,
            sk: key.sk,
            entity_type: kind.entity_kind().entity_type().to_string(),
            research_id: research_id.to_string(),
            config,
            created_at,
            updated_at: now,
        };
        self.store.put(to_item(&record)?).await?;
        Ok(record)
    }

    pub async fn get_config(
        &self,
        research_id: &str,
        kind: ConfigKind,
    ) -> Result<Option<ResearchConfig>> {
        let key = keys::config_key(research_id, kind);
        match self.store.get_one(&key.id, &key.sk).await? {
            Some(item) => Ok(Some(from_item(item)?)),
            None => Ok(None),
        }
    }

    /// Remove a research and every row in its partition. Children go
    /// first so an interrupted delete leaves the research visible for a
    /// retry. Returns the number of rows removed.
    pub async fn delete(&self, research_id: &str) -> Result<usize> {
        let research_key = keys::research_key(research_id);
        let rows = query_all(
            self.store.as_ref(),
            QuerySource::Table,
            research_id,
            QueryOptions::default(),
        )
        .await?;

        let mut children: Vec<ItemKey> = Vec::new();
        let mut has_research_row = false;
        for row in &rows {
            let key = row_key(row)?;
            if key == research_key {
                has_research_row = true;
            } else {
                children.push(key);
            }
        }

        for key in &children {
            self.store.delete(&key.id, &key.sk).await?;
        }
        if has_research_row {
            self.store
                .delete(&research_key.id, &research_key.sk)
                .await?;
        }

        let removed = children.len() + usize::from(has_research_row);
        info!(research_id = %research_id, removed, "Research deleted");
        Ok(removed)
    }
}

fn strip_reserved(mut attributes: Map<String, Value>) -> Map<String, Value> {
    attributes.retain(|name, _| !RESERVED_ATTRIBUTES.contains(&name.as_str()));
    attributes
}

fn row_key(item: &Item) -> Result<ItemKey> {
    let get = |attr: &'static str| {
        item.get(attr)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(StorageError::MissingKey(attr))
    };
    Ok(ItemKey::new(get(schema::ATTR_ID)?, get(schema::ATTR_SK)?))
}

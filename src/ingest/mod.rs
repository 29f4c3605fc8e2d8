//! Participant response ingestion.
//!
//! One row per `(research, participant, step)`:
//! `id = researchId`, `sk = RESPONSE#<participantId>#<stepId>`. A first
//! answer creates the row; a re-entry to the same step merges metadata
//! onto it. Writes are compare-and-swap on the row's `version`, so two
//! concurrent re-entries cannot silently drop each other's merge.

use std::sync::Arc;

use backon::{BackoffBuilder, ExponentialBuilder};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::IngestConfig;
use crate::storage::keys::{self, EntityKind};
use crate::storage::schema::{INDEX_RESEARCH_ID, INDEX_RESEARCH_PARTICIPANT};
use crate::storage::{
    from_item, item_version, query_all, to_item, EntityStore, Item, ItemKey, QueryOptions,
    QuerySource, StorageError, WriteCondition,
};
use crate::utils::retry::write_conflict_backoff;

pub mod metadata;

pub use metadata::{
    merge, DeviceInfo, DeviceType, LocationInfo, MergeConflict, Merged, ReentryPolicy,
    ResponseMetadata, SectionTiming, SessionInfo, TechnicalInfo, TimingInfo,
};

/// Errors from the ingestion path.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A `reentryCount` regression under [`ReentryPolicy::Reject`].
    #[error("Rejected re-entry: {0}")]
    Conflict(#[from] MergeConflict),

    /// Conditional writes kept losing to concurrent writers.
    #[error("Gave up writing {key} after {attempts} conflicting attempts")]
    Contention { key: ItemKey, attempts: usize },
}

pub type Result<T> = std::result::Result<T, IngestError>;

/// One participant answer, as posted by the participant client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    pub research_id: String,
    pub participant_id: String,
    /// Step identifier within the study flow. Defaults to `stepType`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub step_type: String,
    #[serde(default)]
    pub step_title: String,
    /// Opaque answer payload.
    pub response: Value,
    pub metadata: ResponseMetadata,
}

impl IngestRequest {
    pub fn effective_step_id(&self) -> &str {
        self.step_id.as_deref().unwrap_or(&self.step_type)
    }
}

/// The stored row for one participant's answer to one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleResponse {
    pub id: String,
    pub sk: String,
    #[serde(rename = "EntityType")]
    pub entity_type: String,
    pub research_id: String,
    pub participant_id: String,
    pub step_id: String,
    pub step_type: String,
    #[serde(default)]
    pub step_title: String,
    pub response: Value,
    pub metadata: ResponseMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Compare-and-swap counter. Rows written before versioning read as 0.
    #[serde(default)]
    pub version: u64,
}

/// A participant's session row (`sk = SESSION#<participantId>`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantSession {
    pub id: String,
    pub sk: String,
    #[serde(rename = "EntityType")]
    pub entity_type: String,
    pub research_id: String,
    pub participant_id: String,
    pub is_completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Writes and reads participant responses.
pub struct ResponseIngestor {
    store: Arc<dyn EntityStore>,
    policy: ReentryPolicy,
    conflict_backoff: ExponentialBuilder,
}

impl ResponseIngestor {
    pub fn new(store: Arc<dyn EntityStore>, config: &IngestConfig) -> Self {
        Self {
            store,
            policy: config.reentry_policy,
            conflict_backoff: write_conflict_backoff(config),
        }
    }

    /// Override the reentryCount regression policy.
    pub fn with_policy(mut self, policy: ReentryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Override the write-conflict backoff.
    pub fn with_conflict_backoff(mut self, backoff: ExponentialBuilder) -> Self {
        self.conflict_backoff = backoff;
        self
    }

    pub fn policy(&self) -> ReentryPolicy {
        self.policy
    }

    /// Store an answer, merging metadata onto any earlier answer to the
    /// same step. Returns the row as written.
    #[tracing::instrument(
        name = "ingest.response",
        skip_all,
        fields(
            research_id = %request.research_id,
            participant_id = %request.participant_id,
            step_id = %request.effective_step_id(),
        )
    )]
    pub async fn ingest(&self, request: IngestRequest) -> Result<ModuleResponse> {
        keys::validate_component("researchId", &request.research_id)?;
        keys::validate_component("participantId", &request.participant_id)?;
        keys::validate_component("stepId", request.effective_step_id())?;

        let key = keys::response_key(
            &request.research_id,
            &request.participant_id,
            request.effective_step_id(),
        );

        let mut delays = self.conflict_backoff.build();
        let mut attempts = 0usize;

        loop {
            attempts += 1;
            let existing = self.store.get_one(&key.id, &key.sk).await?;
            let (record, condition) = match existing {
                None => (
                    self.new_record(&key, request.clone()),
                    WriteCondition::MustNotExist,
                ),
                Some(item) => {
                    let version = item_version(&item);
                    let record = self.merged_record(item, request.clone())?;
                    (record, WriteCondition::VersionEquals(version))
                }
            };

            match self.store.put_conditional(to_item(&record)?, condition).await {
                Ok(()) => {
                    debug!(version = record.version, attempts, "Response stored");
                    return Ok(record);
                }
                Err(StorageError::ConditionFailed { key }) => match delays.next() {
                    Some(delay) => {
                        warn!(%key, attempts, ?delay, "Concurrent write detected, retrying merge");
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(IngestError::Contention { key, attempts }),
                },
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn new_record(&self, key: &ItemKey, request: IngestRequest) -> ModuleResponse {
        let now = Utc::now();
        let step_id = request.effective_step_id().to_string();
        ModuleResponse {
            id: key.id.clone(),
            sk: key.sk.clone(),
            entity_type: EntityKind::ModuleResponse.entity_type().to_string(),
            research_id: request.research_id,
            participant_id: request.participant_id,
            step_id,
            step_type: request.step_type,
            step_title: request.step_title,
            response: request.response,
            metadata: request.metadata,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    fn merged_record(&self, item: Item, request: IngestRequest) -> Result<ModuleResponse> {
        let previous: ModuleResponse = from_item(item)?;
        let merged = merge(&previous.metadata, request.metadata, self.policy)?;

        if let Some(conflict) = merged.regression {
            warn!(
                stored = conflict.stored,
                incoming = conflict.incoming,
                policy = ?self.policy,
                "reentryCount regression"
            );
        }

        Ok(ModuleResponse {
            step_type: request.step_type,
            step_title: request.step_title,
            response: request.response,
            metadata: merged.metadata,
            updated_at: Utc::now(),
            version: previous.version + 1,
            ..previous
        })
    }

    /// Every stored response of a research, ordered by sort key.
    ///
    /// Served by the research index, so a just-written row may be missing.
    pub async fn responses_for_research(&self, research_id: &str) -> Result<Vec<ModuleResponse>> {
        keys::validate_component("researchId", research_id)?;
        Ok(research_responses(self.store.as_ref(), research_id).await?)
    }

    /// One participant's responses, ordered by step id.
    pub async fn responses_for_participant(
        &self,
        research_id: &str,
        participant_id: &str,
    ) -> Result<Vec<ModuleResponse>> {
        keys::validate_component("researchId", research_id)?;
        keys::validate_component("participantId", participant_id)?;
        let items = query_all(
            self.store.as_ref(),
            QuerySource::Table,
            research_id,
            QueryOptions::default().with_prefix(keys::participant_response_prefix(participant_id)),
        )
        .await?;
        Ok(decode_responses(items))
    }

    /// Distinct participants with any row in a research, ascending.
    pub async fn participant_ids(&self, research_id: &str) -> Result<Vec<String>> {
        keys::validate_component("researchId", research_id)?;
        let items = query_all(
            self.store.as_ref(),
            QuerySource::Index(INDEX_RESEARCH_PARTICIPANT),
            research_id,
            QueryOptions::default(),
        )
        .await?;

        let mut ids: Vec<String> = items
            .iter()
            .filter_map(|item| item.get("participantId").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        ids.dedup();
        Ok(ids)
    }

    /// Record that a participant finished the study.
    pub async fn mark_completed(
        &self,
        research_id: &str,
        participant_id: &str,
    ) -> Result<ParticipantSession> {
        keys::validate_component("researchId", research_id)?;
        keys::validate_component("participantId", participant_id)?;

        let key = keys::session_key(research_id, participant_id);
        let now = Utc::now();
        let session = ParticipantSession {
            id: key.id,
            sk: key.sk,
            entity_type: EntityKind::ParticipantSession.entity_type().to_string(),
            research_id: research_id.to_string(),
            participant_id: participant_id.to_string(),
            is_completed: true,
            completed_at: Some(now),
            updated_at: now,
        };
        self.store.put(to_item(&session)?).await?;
        Ok(session)
    }

    /// A participant's session row, if one was written.
    pub async fn session_status(
        &self,
        research_id: &str,
        participant_id: &str,
    ) -> Result<Option<ParticipantSession>> {
        keys::validate_component("researchId", research_id)?;
        keys::validate_component("participantId", participant_id)?;
        let key = keys::session_key(research_id, participant_id);
        match self.store.get_one(&key.id, &key.sk).await? {
            Some(item) => Ok(Some(from_item(item)?)),
            None => Ok(None),
        }
    }
}

/// Every decodable response row of a research, via the research index.
pub async fn research_responses(
    store: &dyn EntityStore,
    research_id: &str,
) -> crate::storage::Result<Vec<ModuleResponse>> {
    let items = query_all(
        store,
        QuerySource::Index(INDEX_RESEARCH_ID),
        research_id,
        QueryOptions::default().with_prefix(keys::response_prefix()),
    )
    .await?;
    Ok(decode_responses(items))
}

fn decode_responses(items: Vec<Item>) -> Vec<ModuleResponse> {
    items
        .into_iter()
        .filter_map(|item| {
            let sk = item
                .get("sk")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            match from_item::<ModuleResponse>(item) {
                Ok(response) => Some(response),
                Err(e) => {
                    warn!(sk = %sk, error = %e, "Skipping undecodable response row");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests;

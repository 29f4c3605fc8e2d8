//! In-memory schema administration.

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::provisioning::{AdminError, TableAdmin, TableDescription, TableStatus};
use crate::storage::SchemaCatalog;

struct MockTable {
    index_names: Vec<String>,
    status: TableStatus,
    /// Describe calls still reporting a non-active status.
    polls_until_active: usize,
}

/// Mock table admin with call counters and failure injection.
///
/// A created table reports `Creating` for a configurable number of
/// describe calls before it turns `Active`.
#[derive(Default)]
pub struct MockTableAdmin {
    tables: RwLock<HashMap<String, MockTable>>,
    activation_polls: AtomicUsize,
    describe_calls: AtomicUsize,
    create_calls: AtomicUsize,
    failing_describes: RwLock<Option<RangeInclusive<usize>>>,
    fail_describe: RwLock<bool>,
    fail_create: RwLock<bool>,
    peer_creates_table: RwLock<bool>,
    never_activate: RwLock<bool>,
    describe_delay: RwLock<Option<Duration>>,
}

impl MockTableAdmin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an existing table.
    pub async fn with_table(self, name: &str, status: TableStatus, indexes: &[&str]) -> Self {
        self.tables.write().await.insert(
            name.to_string(),
            MockTable {
                index_names: indexes.iter().map(|s| s.to_string()).collect(),
                status,
                polls_until_active: 0,
            },
        );
        self
    }

    /// Number of describe calls a newly created table stays `Creating`.
    pub fn set_activation_polls(&self, polls: usize) {
        self.activation_polls.store(polls, Ordering::SeqCst);
    }

    /// Fail every describe call.
    pub async fn set_fail_describe(&self, fail: bool) {
        *self.fail_describe.write().await = fail;
    }

    /// Fail the describe calls whose 1-based sequence number falls in
    /// `calls`, then recover.
    pub async fn fail_describes(&self, calls: RangeInclusive<usize>) {
        *self.failing_describes.write().await = Some(calls);
    }

    pub async fn set_fail_create(&self, fail: bool) {
        *self.fail_create.write().await = fail;
    }

    /// Simulate losing the create race: the create call reports the table
    /// already exists, and the peer's table appears in `Creating`.
    pub async fn set_peer_creates_table(&self, peer: bool) {
        *self.peer_creates_table.write().await = peer;
    }

    /// Keep created tables in `Creating` forever.
    pub async fn set_never_activate(&self, never: bool) {
        *self.never_activate.write().await = never;
    }

    /// Delay every describe call, to widen concurrency windows.
    pub async fn set_describe_delay(&self, delay: Duration) {
        *self.describe_delay.write().await = Some(delay);
    }

    pub fn describe_calls(&self) -> usize {
        self.describe_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Index names of a stored table.
    pub async fn index_names(&self, table_name: &str) -> Option<Vec<String>> {
        self.tables
            .read()
            .await
            .get(table_name)
            .map(|t| t.index_names.clone())
    }

    async fn insert_creating(&self, table_name: &str, catalog: &SchemaCatalog) {
        let polls = if *self.never_activate.read().await {
            usize::MAX
        } else {
            self.activation_polls.load(Ordering::SeqCst)
        };
        self.tables.write().await.insert(
            table_name.to_string(),
            MockTable {
                index_names: catalog
                    .required_index_names()
                    .map(str::to_string)
                    .collect(),
                status: if polls == 0 {
                    TableStatus::Active
                } else {
                    TableStatus::Creating
                },
                polls_until_active: polls,
            },
        );
    }
}

#[async_trait]
impl TableAdmin for MockTableAdmin {
    async fn describe_table(
        &self,
        table_name: &str,
    ) -> Result<Option<TableDescription>, AdminError> {
        let call = self.describe_calls.fetch_add(1, Ordering::SeqCst) + 1;

        let delay = *self.describe_delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if *self.fail_describe.read().await {
            return Err(AdminError::Service("Mock describe failure".to_string()));
        }
        if self
            .failing_describes
            .read()
            .await
            .as_ref()
            .is_some_and(|calls| calls.contains(&call))
        {
            return Err(AdminError::Service(format!(
                "Mock transient describe failure (call {call})"
            )));
        }

        let mut tables = self.tables.write().await;
        let Some(table) = tables.get_mut(table_name) else {
            return Ok(None);
        };

        let description = TableDescription {
            status: table.status,
            index_names: table.index_names.clone(),
        };

        if table.status == TableStatus::Creating && table.polls_until_active != usize::MAX {
            table.polls_until_active = table.polls_until_active.saturating_sub(1);
            if table.polls_until_active == 0 {
                table.status = TableStatus::Active;
            }
        }

        Ok(Some(description))
    }

    async fn create_table(
        &self,
        table_name: &str,
        catalog: &SchemaCatalog,
    ) -> Result<(), AdminError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        if *self.fail_create.read().await {
            return Err(AdminError::Service("Mock create failure".to_string()));
        }

        if *self.peer_creates_table.read().await {
            self.insert_creating(table_name, catalog).await;
            return Err(AdminError::AlreadyExists(table_name.to_string()));
        }

        if self.tables.read().await.contains_key(table_name) {
            return Err(AdminError::AlreadyExists(table_name.to_string()));
        }

        self.insert_creating(table_name, catalog).await;
        Ok(())
    }
}

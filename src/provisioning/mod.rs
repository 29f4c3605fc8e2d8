//! Table provisioning.
//!
//! Makes the physical table match [`SchemaCatalog`], issuing at most one
//! `CreateTable` per missing table. State machine per table:
//!
//! ```text
//! UNKNOWN --describe--> MISSING --create--> CREATING --poll--> ACTIVE
//!                   \-> EXISTS_COMPLETE ----------(poll)-----> ACTIVE
//!                   \-> EXISTS_PARTIAL  ----------(poll)-----> ACTIVE (missing indexes reported)
//! ```
//!
//! Missing indexes on an existing table are reported, never added: adding a
//! GSI to a live table is a long-running, throughput-consuming operation and
//! stays an operator action.

use std::sync::Arc;

use async_trait::async_trait;
use backon::{BackoffBuilder, ExponentialBuilder};
use tracing::{debug, info, warn};

use crate::storage::SchemaCatalog;

pub mod coordinator;

pub use coordinator::{BootstrapCoordinator, BootstrapOutcome, HealthReport};

/// Lifecycle status of a table as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStatus {
    Creating,
    Updating,
    Deleting,
    Active,
    Other,
}

/// The subset of a table description provisioning cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescription {
    pub status: TableStatus,
    /// Names of the global secondary indexes currently defined.
    pub index_names: Vec<String>,
}

/// Errors from schema administration calls.
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    /// `CreateTable` lost a race against another creator.
    #[error("Table already exists: {0}")]
    AlreadyExists(String),

    #[error("{0}")]
    Service(String),
}

/// Interface for schema administration on the backing store.
///
/// Implementations:
/// - `DynamoTableAdmin`: DynamoDB `DescribeTable` / `CreateTable`
/// - `MockTableAdmin`: in-memory, with call counters and failure injection
#[async_trait]
pub trait TableAdmin: Send + Sync {
    /// Describe a table. A table that does not exist is `Ok(None)`.
    async fn describe_table(
        &self,
        table_name: &str,
    ) -> Result<Option<TableDescription>, AdminError>;

    /// Create a table with the catalog's key schema, attributes and indexes.
    async fn create_table(&self, table_name: &str, catalog: &SchemaCatalog)
        -> Result<(), AdminError>;
}

/// Fatal provisioning failures.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// Describing the table failed for a reason other than "not found".
    #[error("Failed to describe table {table}: {reason}")]
    DescribeFailed { table: String, reason: String },

    /// The create request itself failed.
    #[error("Failed to create table {table}: {reason}")]
    CreateFailed { table: String, reason: String },

    /// The table did not become ACTIVE within the polling budget.
    #[error("Table {table} not active after {attempts} status checks")]
    Timeout { table: String, attempts: usize },
}

impl ProvisionError {
    /// True for a polling timeout, which a caller may choose to retry later.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProvisionError::Timeout { .. })
    }
}

/// How the table was found or made ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionState {
    /// The table did not exist and was created with the full catalog.
    Created,
    /// Another process created the table while this one tried to.
    CreatedByPeer,
    /// The table existed with every required index.
    Complete,
    /// The table existed but lacks these required indexes.
    Partial { missing: Vec<String> },
}

/// The table is ACTIVE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ready {
    pub table: String,
    pub state: ProvisionState,
}

impl Ready {
    /// Required indexes the table is known to lack.
    pub fn missing_indexes(&self) -> &[String] {
        match &self.state {
            ProvisionState::Partial { missing } => missing,
            _ => &[],
        }
    }
}

/// Ensures the shared table and its indexes exist.
pub struct TableProvisioner {
    admin: Arc<dyn TableAdmin>,
    table_name: String,
    catalog: &'static SchemaCatalog,
    poll_backoff: ExponentialBuilder,
}

impl TableProvisioner {
    /// Create a provisioner.
    ///
    /// `poll_backoff` bounds the wait for ACTIVE: each yielded delay is one
    /// more status check; exhaustion is a [`ProvisionError::Timeout`].
    pub fn new(
        admin: Arc<dyn TableAdmin>,
        table_name: impl Into<String>,
        catalog: &'static SchemaCatalog,
        poll_backoff: ExponentialBuilder,
    ) -> Self {
        Self {
            admin,
            table_name: table_name.into(),
            catalog,
            poll_backoff,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Make the table exist and be ACTIVE.
    #[tracing::instrument(name = "provision.ensure_table", skip_all, fields(table = %self.table_name))]
    pub async fn ensure_table(&self) -> Result<Ready, ProvisionError> {
        let description = self
            .admin
            .describe_table(&self.table_name)
            .await
            .map_err(|e| ProvisionError::DescribeFailed {
                table: self.table_name.clone(),
                reason: e.to_string(),
            })?;

        let state = match description {
            Some(existing) => {
                info!("Table already exists");
                let state = self.check_indexes(&existing);
                if existing.status != TableStatus::Active {
                    debug!(status = ?existing.status, "Existing table not active yet");
                    self.wait_until_active().await?;
                }
                state
            }
            None => {
                info!("Table not found, creating");
                let state = match self.admin.create_table(&self.table_name, self.catalog).await {
                    Ok(()) => {
                        info!("Create table request accepted");
                        ProvisionState::Created
                    }
                    Err(AdminError::AlreadyExists(_)) => {
                        info!("Table was created concurrently by another process");
                        ProvisionState::CreatedByPeer
                    }
                    Err(e) => {
                        return Err(ProvisionError::CreateFailed {
                            table: self.table_name.clone(),
                            reason: e.to_string(),
                        })
                    }
                };
                self.wait_until_active().await?;
                state
            }
        };

        Ok(Ready {
            table: self.table_name.clone(),
            state,
        })
    }

    /// Lightweight reachability probe. Never fails; errors become `false`.
    pub async fn test_connection(&self) -> bool {
        match self.admin.describe_table(&self.table_name).await {
            Ok(Some(_)) => true,
            Ok(None) => {
                warn!(table = %self.table_name, "Connection check: table does not exist");
                false
            }
            Err(e) => {
                warn!(table = %self.table_name, error = %e, "Connection check failed");
                false
            }
        }
    }

    fn check_indexes(&self, description: &TableDescription) -> ProvisionState {
        let missing = self.catalog.missing_indexes(&description.index_names);
        if missing.is_empty() {
            info!("All required indexes present");
            return ProvisionState::Complete;
        }

        for index in &missing {
            warn!(
                index = %index,
                "Required index missing; add it with `aws dynamodb update-table --table-name {} --global-secondary-index-updates ...`",
                self.table_name
            );
        }
        ProvisionState::Partial {
            missing: missing.into_iter().map(str::to_string).collect(),
        }
    }

    async fn wait_until_active(&self) -> Result<(), ProvisionError> {
        let mut delays = self.poll_backoff.build();
        let mut attempts = 0usize;

        loop {
            attempts += 1;
            match self.admin.describe_table(&self.table_name).await {
                Ok(Some(desc)) if desc.status == TableStatus::Active => {
                    info!(attempts, "Table is active");
                    return Ok(());
                }
                Ok(Some(desc)) => {
                    debug!(attempts, status = ?desc.status, "Waiting for table to become active");
                }
                Ok(None) => {
                    debug!(attempts, "Table not visible yet");
                }
                Err(e) => {
                    warn!(attempts, error = %e, "Status check failed");
                }
            }

            match delays.next() {
                Some(delay) => tokio::time::sleep(delay).await,
                None => {
                    return Err(ProvisionError::Timeout {
                        table: self.table_name.clone(),
                        attempts,
                    })
                }
            }
        }
    }
}
